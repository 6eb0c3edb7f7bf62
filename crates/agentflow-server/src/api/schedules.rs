//! Schedules API - /api/schedules
//!
//! GET/POST            /api/schedules          - List / create schedules
//! GET/POST            /api/schedules/tick     - Tick status / fire due schedules now
//! GET/PATCH/DELETE    /api/schedules/{id}     - Manage one schedule
//! POST                /api/schedules/{id}/run - Fire a schedule immediately

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use agentflow_core::error::CoreError;
use agentflow_core::models::schedule::{CreateScheduleInput, UpdateScheduleInput};
use agentflow_core::AppState;

use crate::scheduler;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_schedules).post(create_schedule))
        .route("/tick", get(get_tick_status).post(trigger_tick))
        .route("/{id}", get(get_schedule).patch(update_schedule).delete(delete_schedule))
        .route("/{id}/run", post(run_schedule_now))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    workspace_id: Option<String>,
}

async fn list_schedules(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let workspace_id = q.workspace_id.as_deref().unwrap_or("default");
    let schedules = state.schedule_store.list_by_workspace(workspace_id).await?;
    Ok(Json(serde_json::json!({ "schedules": schedules })))
}

async fn create_schedule(
    State(state): State<AppState>,
    Json(body): Json<CreateScheduleInput>,
) -> Result<Json<serde_json::Value>, CoreError> {
    if state.agent_store.get(&body.agent_id).await?.is_none() {
        return Err(CoreError::NotFound(format!("Agent {} not found", body.agent_id)));
    }
    let schedule = state.schedule_store.create(body).await?;
    tracing::info!(
        "[Schedules] Created schedule {} ({}) for agent {}",
        schedule.id,
        schedule.cron_expr,
        schedule.agent_id
    );
    Ok(Json(serde_json::json!({ "schedule": schedule })))
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, CoreError> {
    match state.schedule_store.get(&id).await? {
        Some(s) => Ok(Json(serde_json::json!({ "schedule": s }))),
        None => Err(CoreError::NotFound(format!("Schedule {} not found", id))),
    }
}

async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateScheduleInput>,
) -> Result<Json<serde_json::Value>, CoreError> {
    match state.schedule_store.update(&id, body).await? {
        Some(s) => Ok(Json(serde_json::json!({ "schedule": s }))),
        None => Err(CoreError::NotFound(format!("Schedule {} not found", id))),
    }
}

async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let deleted = state.schedule_store.delete(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

/// POST /api/schedules/{id}/run - Fire a schedule without moving its next
/// fire time
async fn run_schedule_now(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let schedule = state
        .schedule_store
        .get(&id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Schedule {} not found", id)))?;
    let run_id = scheduler::fire(&state, &schedule).await?;
    Ok(Json(serde_json::json!({
        "triggered": true,
        "scheduleId": schedule.id,
        "runId": run_id,
    })))
}

/// GET /api/schedules/tick - Runs currently in flight
async fn get_tick_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let active = state.active_runs.ids();
    Json(serde_json::json!({
        "status": if active.is_empty() { "idle" } else { "running" },
        "activeRuns": active.len(),
    }))
}

/// POST /api/schedules/tick - Fire every due schedule now
async fn trigger_tick(State(state): State<AppState>) -> Result<Json<serde_json::Value>, CoreError> {
    let fired = scheduler::tick(&state, chrono::Utc::now()).await?;
    Ok(Json(serde_json::json!({ "ticked": true, "fired": fired })))
}
