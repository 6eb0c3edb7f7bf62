//! Integration tests for the agentflow-cli commands.
//!
//! These tests exercise the same code paths as the binary, using in-memory
//! SQLite databases and the offline echo engine.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use agentflow_cli::commands::{self, agent, run, run::RunArgs, EngineArgs};
use agentflow_core::models::run::{MessageRole, RunStatus};
use agentflow_core::AppState;

fn test_state() -> AppState {
    let engine = commands::engine_config(&EngineArgs {
        dry_run: true,
        ..Default::default()
    });
    commands::init_state(":memory:", engine).expect("Failed to open in-memory database")
}

const WRITER: &str = r#"
id: writer
name: Writer
steps:
  - description: Draft
    prompt: "Draft a haiku about {{topic:Subject of the poem}}"
  - description: Title
    prompt: "Give this a title: {{output.1}}"
"#;

fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn test_execute_agent_file_with_inputs() {
    let state = test_state();
    let agent = agentflow_core::models::agent::Agent::from_yaml(WRITER).unwrap();
    let args = RunArgs {
        inputs: vec!["topic=autumn".to_string()],
        ..Default::default()
    };

    let record = run::execute(&state, agent, &args, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(record.status, RunStatus::Success);
    assert_eq!(record.prompt, "Draft a haiku about autumn");
    let assistant: Vec<_> = record
        .messages
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .collect();
    assert_eq!(assistant.len(), 2);
    assert_eq!(
        assistant[1].content,
        "Give this a title: Draft a haiku about autumn"
    );

    let stored = state.run_store.get("writer", &record.id).await.unwrap();
    assert!(stored.is_some());
    assert!(state.active_runs.ids().is_empty());
}

#[tokio::test]
async fn test_missing_input_is_reported() {
    let state = test_state();
    let agent = agentflow_core::models::agent::Agent::from_yaml(WRITER).unwrap();

    let err = run::execute(&state, agent, &RunArgs::default(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.contains("topic"), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_ephemeral_run_is_not_stored() {
    let state = test_state();
    let agent = agentflow_core::models::agent::Agent::from_yaml(WRITER).unwrap();
    let args = RunArgs {
        prompt: Some("Just say hi".to_string()),
        ephemeral: true,
        ..Default::default()
    };

    let record = run::execute(&state, agent, &args, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(record.status, RunStatus::Success);
    assert!(state
        .run_store
        .list_by_agent("writer", 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_cancelled_run_is_marked_canceled() {
    let state = test_state();
    let agent = agentflow_core::models::agent::Agent::from_yaml(WRITER).unwrap();
    let args = RunArgs {
        prompt: Some("Never answered".to_string()),
        ..Default::default()
    };
    let abort = CancellationToken::new();
    abort.cancel();

    let record = run::execute(&state, agent, &args, abort).await.unwrap();
    assert_eq!(record.status, RunStatus::Canceled);
}

#[tokio::test]
async fn test_import_directory_and_file() {
    let state = test_state();
    let dir = tempfile::tempdir().unwrap();
    write_file(&dir, "writer.yaml", WRITER);
    write_file(
        &dir,
        "critic.json",
        r#"{ "id": "critic", "name": "Critic", "steps": [{ "prompt": "Critique this" }] }"#,
    );
    write_file(&dir, "README.md", "not an agent");

    let count = agent::import(&state, dir.path().to_str().unwrap()).await.unwrap();
    assert_eq!(count, 2);

    let agents = state.agent_store.list_by_workspace("default").await.unwrap();
    let ids: Vec<_> = agents.iter().map(|a| a.id.as_str()).collect();
    // Ordered by name
    assert_eq!(ids, vec!["critic", "writer"]);

    let single = tempfile::tempdir().unwrap();
    let path = write_file(&single, "solo.yaml", "id: solo\nname: Solo\nsteps:\n  - prompt: hi\n");
    assert_eq!(agent::import(&state, path.to_str().unwrap()).await.unwrap(), 1);
    assert!(state.agent_store.get("solo").await.unwrap().is_some());
}

#[tokio::test]
async fn test_run_stored_agent_and_delete() {
    let state = test_state();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "writer.yaml", WRITER);
    agent::import(&state, path.to_str().unwrap()).await.unwrap();

    let args = RunArgs {
        inputs: vec!["topic=rain".to_string()],
        ..Default::default()
    };
    agent::run(&state, "writer", &args).await.unwrap();
    assert_eq!(state.run_store.list_by_agent("writer", 10).await.unwrap().len(), 1);

    agent::delete(&state, "writer").await.unwrap();
    assert!(state.agent_store.get("writer").await.unwrap().is_none());
    assert!(state.run_store.list_by_agent("writer", 10).await.unwrap().is_empty());
    assert!(agent::delete(&state, "writer").await.is_err());
}

#[test]
fn test_validate() {
    let dir = tempfile::tempdir().unwrap();
    let valid = write_file(&dir, "writer.yaml", WRITER);
    assert!(run::validate(valid.to_str().unwrap()).is_ok());

    let no_steps = write_file(&dir, "empty.yaml", "id: empty\nname: Empty\nsteps: []\n");
    let err = run::validate(no_steps.to_str().unwrap()).unwrap_err();
    assert!(err.contains("at least one step"));

    let broken = write_file(&dir, "broken.yaml", "id: [unclosed\n");
    assert!(run::validate(broken.to_str().unwrap()).is_err());
}
