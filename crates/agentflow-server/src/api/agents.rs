//! Agents API - /api/agents
//!
//! GET    /api/agents                      - List agents of a workspace
//! POST   /api/agents                      - Create or replace an agent (JSON or YAML body)
//! GET    /api/agents/{id}                 - Get an agent
//! DELETE /api/agents/{id}                 - Delete an agent and its runs
//! POST   /api/agents/{id}/run             - Manual trigger
//! POST   /api/agents/{id}/webhook?token=  - Webhook trigger
//! GET    /api/agents/{id}/runs            - Recent runs of an agent
//! GET    /api/agents/{id}/runs/{runId}    - Get one run
//! DELETE /api/agents/{id}/runs/{runId}    - Delete one run

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use agentflow_core::error::CoreError;
use agentflow_core::executor::RunOptions;
use agentflow_core::models::agent::Agent;
use agentflow_core::models::run::RunTrigger;
use agentflow_core::template::InputValue;
use agentflow_core::triggers::{build_trigger_prompt, check_webhook_token, run_to_completion, start_run};
use agentflow_core::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_agents).post(upsert_agent))
        .route("/{id}", get(get_agent).delete(delete_agent))
        .route("/{id}/run", post(run_agent))
        .route("/{id}/webhook", post(webhook))
        .route("/{id}/runs", get(list_runs))
        .route("/{id}/runs/{run_id}", get(get_run).delete(delete_run))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    workspace_id: Option<String>,
}

/// Webhook secrets never leave the server.
fn redacted(mut agent: Agent) -> Agent {
    agent.webhook_token = None;
    agent
}

async fn load_agent(state: &AppState, id: &str) -> Result<Agent, CoreError> {
    state
        .agent_store
        .get(id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Agent {} not found", id)))
}

async fn list_agents(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let workspace_id = q.workspace_id.as_deref().unwrap_or("default");
    let agents: Vec<Agent> = state
        .agent_store
        .list_by_workspace(workspace_id)
        .await?
        .into_iter()
        .map(redacted)
        .collect();
    Ok(Json(serde_json::json!({ "agents": agents })))
}

/// POST /api/agents - bodies with a YAML content type are parsed as YAML,
/// everything else as JSON.
async fn upsert_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, CoreError> {
    let is_yaml = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("yaml"));

    let agent = if is_yaml {
        Agent::from_yaml(&body).map_err(CoreError::BadRequest)?
    } else {
        serde_json::from_str::<Agent>(&body)
            .map_err(|e| CoreError::BadRequest(format!("Invalid agent JSON: {}", e)))?
    };
    agent.validate().map_err(CoreError::BadRequest)?;

    state.agent_store.save(&agent).await?;
    tracing::info!("[Agents] Saved agent {} ({})", agent.id, agent.name);
    Ok(Json(serde_json::json!({ "agent": redacted(agent) })))
}

async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let agent = load_agent(&state, &id).await?;
    Ok(Json(serde_json::json!({ "agent": redacted(agent) })))
}

async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let deleted = state.agent_store.delete(&id).await?;
    let runs = state.run_store.delete_by_agent(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted, "deletedRuns": runs })))
}

// ─── Triggers ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest {
    prompt: Option<String>,
    #[serde(default)]
    inputs: HashMap<String, InputValue>,
    /// Block until the run finishes and return the record
    #[serde(default)]
    wait: bool,
    #[serde(default)]
    ephemeral: bool,
    engine: Option<String>,
    model: Option<String>,
    locale: Option<String>,
}

/// POST /api/agents/{id}/run - Start a manual run
async fn run_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<RunRequest>>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let agent = load_agent(&state, &id).await?;
    let prompt = build_trigger_prompt(&agent, req.prompt.as_deref(), &req.inputs)?;

    let opts = RunOptions {
        ephemeral: req.ephemeral,
        engine: req.engine,
        model: req.model,
        locale: req.locale,
        ..Default::default()
    };

    if req.wait {
        let run = run_to_completion(&state, agent, RunTrigger::Manual, prompt, opts).await?;
        return Ok(Json(serde_json::json!({ "run": run })));
    }

    let handle = start_run(&state, agent, RunTrigger::Manual, prompt, opts);
    Ok(Json(serde_json::json!({
        "runId": handle.run_id,
        "status": "running",
    })))
}

#[derive(Debug, Deserialize)]
struct WebhookQuery {
    token: Option<String>,
}

/// POST /api/agents/{id}/webhook?token= - Start a run from an external
/// system. The optional JSON body maps input names to values.
async fn webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<WebhookQuery>,
    body: Option<Json<HashMap<String, InputValue>>>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let agent = load_agent(&state, &id).await?;
    check_webhook_token(&agent, q.token.as_deref())?;

    let inputs = body.map(|Json(b)| b).unwrap_or_default();
    let prompt = build_trigger_prompt(&agent, None, &inputs)?;
    let handle = start_run(&state, agent, RunTrigger::Webhook, prompt, RunOptions::default());
    Ok(Json(serde_json::json!({ "runId": handle.run_id })))
}

// ─── Runs of an agent ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RunsQuery {
    limit: Option<usize>,
}

async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<RunsQuery>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let runs = state.run_store.list_by_agent(&id, q.limit.unwrap_or(50)).await?;
    Ok(Json(serde_json::json!({ "runs": runs })))
}

async fn get_run(
    State(state): State<AppState>,
    Path((id, run_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, CoreError> {
    match state.run_store.get(&id, &run_id).await? {
        Some(run) => Ok(Json(serde_json::json!({
            "run": run,
            "active": state.active_runs.contains(&run_id),
        }))),
        None => Err(CoreError::NotFound(format!("Run {} not found", run_id))),
    }
}

async fn delete_run(
    State(state): State<AppState>,
    Path((id, run_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, CoreError> {
    if state.active_runs.contains(&run_id) {
        return Err(CoreError::Conflict(format!("Run {} is still running", run_id)));
    }
    let deleted = state.run_store.delete(&id, &run_id).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}
