//! HTTP API tests over a real listener.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use agentflow_core::error::CoreError;
use agentflow_core::generation::{
    ChunkSink, EchoGeneration, Generation, GenerationOptions, GenerationOutcome, GenerationRequest,
    LlmChunk,
};
use agentflow_core::models::run::Message;
use agentflow_core::{AppStateInner, Database, EngineConfig};
use agentflow_server::{start_server_with_state, ServerConfig};

/// Echoes the prompt, except prompts containing "hold" which block until
/// the run is cancelled.
struct HoldingGeneration;

#[async_trait]
impl Generation for HoldingGeneration {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
        on_chunk: ChunkSink<'_>,
    ) -> GenerationOutcome {
        if request.user.content.contains("hold") {
            request.abort.cancelled().await;
            return GenerationOutcome::Stopped;
        }
        on_chunk(LlmChunk::text(request.user.content.clone()));
        on_chunk(LlmChunk::done());
        GenerationOutcome::Success
    }

    async fn title(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<String, CoreError> {
        EchoGeneration.title(messages, options).await
    }
}

async fn spawn_server() -> String {
    let db = Database::open_in_memory().unwrap();
    let state = Arc::new(AppStateInner::new(
        db,
        EngineConfig::new(Arc::new(HoldingGeneration)),
    ));
    let config = ServerConfig {
        port: 0,
        tick_interval_secs: 0,
        ..Default::default()
    };
    let addr = start_server_with_state(config, state).await.unwrap();
    format!("http://{}", addr)
}

const WRITER_YAML: &str = r#"
id: writer
name: Writer
webhookToken: s3cret
steps:
  - description: Draft
    prompt: "Draft a note about {{topic::rust}}"
    tools: []
  - description: Polish
    prompt: "Polish: {{output.1}}"
    tools: []
"#;

async fn create_writer(client: &reqwest::Client, base: &str) {
    let resp = client
        .post(format!("{}/api/agents", base))
        .header("content-type", "application/yaml")
        .body(WRITER_YAML)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["agent"]["id"], "writer");
    assert!(body["agent"].get("webhookToken").is_none());
}

async fn wait_for_status(client: &reqwest::Client, base: &str, run_id: &str, status: &str) -> Value {
    for _ in 0..100 {
        let resp = client
            .get(format!("{}/api/agents/writer/runs/{}", base, run_id))
            .send()
            .await
            .unwrap();
        if resp.status() == 200 {
            let body: Value = resp.json().await.unwrap();
            if body["run"]["status"] == status {
                return body["run"].clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {} never reached status {}", run_id, status);
}

#[tokio::test]
async fn test_health() {
    let base = spawn_server().await;
    let body: Value = reqwest::get(format!("{}/api/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["server"], "agentflow-server");
}

#[tokio::test]
async fn test_agent_crud_and_validation() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    create_writer(&client, &base).await;

    let list: Value = client
        .get(format!("{}/api/agents", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["agents"].as_array().unwrap().len(), 1);

    let invalid = client
        .post(format!("{}/api/agents", base))
        .json(&json!({ "id": "empty", "name": "Empty", "steps": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 400);

    let deleted: Value = client
        .delete(format!("{}/api/agents/writer", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["deleted"], true);

    let missing = client
        .get(format!("{}/api/agents/writer", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn test_manual_run_chains_outputs() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    create_writer(&client, &base).await;

    let body: Value = client
        .post(format!("{}/api/agents/writer/run", base))
        .json(&json!({ "inputs": { "topic": "tides" }, "wait": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let run = &body["run"];
    assert_eq!(run["status"], "success");
    assert_eq!(run["trigger"], "manual");
    assert_eq!(run["prompt"], "Draft a note about tides");
    let messages = run["messages"].as_array().unwrap();
    // system, then user + assistant per step
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[4]["content"], "Polish: Draft a note about tides");

    let runs: Value = client
        .get(format!("{}/api/agents/writer/runs", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(runs["runs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_webhook_requires_token() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    create_writer(&client, &base).await;

    let rejected = client
        .post(format!("{}/api/agents/writer/webhook?token=wrong", base))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 404);

    let accepted: Value = client
        .post(format!("{}/api/agents/writer/webhook?token=s3cret", base))
        .json(&json!({ "topic": "webhooks" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let run_id = accepted["runId"].as_str().unwrap().to_string();

    let run = wait_for_status(&client, &base, &run_id, "success").await;
    assert_eq!(run["trigger"], "webhook");
    assert_eq!(run["prompt"], "Draft a note about webhooks");
}

#[tokio::test]
async fn test_cancel_in_flight_run() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    create_writer(&client, &base).await;

    let started: Value = client
        .post(format!("{}/api/agents/writer/run", base))
        .json(&json!({ "prompt": "hold on" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let run_id = started["runId"].as_str().unwrap().to_string();
    wait_for_status(&client, &base, &run_id, "running").await;

    let canceled = client
        .post(format!("{}/api/runs/{}/cancel", base, run_id))
        .send()
        .await
        .unwrap();
    assert_eq!(canceled.status(), 200);

    let run = wait_for_status(&client, &base, &run_id, "canceled").await;
    assert!(run["error"].is_null());

    // The run leaves the active set right after its final save
    for _ in 0..100 {
        let active: Value = client
            .get(format!("{}/api/runs", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if active["active"].as_array().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let again = client
        .post(format!("{}/api/runs/{}/cancel", base, run_id))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
}

#[tokio::test]
async fn test_schedule_lifecycle() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    create_writer(&client, &base).await;

    let bad_cron = client
        .post(format!("{}/api/schedules", base))
        .json(&json!({ "name": "Bad", "cronExpr": "whenever", "agentId": "writer" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_cron.status(), 400);

    let created: Value = client
        .post(format!("{}/api/schedules", base))
        .json(&json!({
            "name": "Hourly",
            "cronExpr": "0 * * * *",
            "agentId": "writer",
            "inputValues": { "topic": "cron" }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["schedule"]["id"].as_str().unwrap().to_string();
    assert!(created["schedule"]["nextRunAt"].is_string());

    // Not due yet
    let tick: Value = client
        .post(format!("{}/api/schedules/tick", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(tick["fired"].as_array().unwrap().is_empty());

    let fired: Value = client
        .post(format!("{}/api/schedules/{}/run", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let run_id = fired["runId"].as_str().unwrap().to_string();
    let run = wait_for_status(&client, &base, &run_id, "success").await;
    assert_eq!(run["trigger"], "schedule");
    assert_eq!(run["prompt"], "Draft a note about cron");

    let patched: Value = client
        .patch(format!("{}/api/schedules/{}", base, id))
        .json(&json!({ "enabled": false }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(patched["schedule"]["enabled"], false);
}
