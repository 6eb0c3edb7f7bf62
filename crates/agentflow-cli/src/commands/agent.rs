//! `agentflow agent` - Manage stored agents.

use std::path::Path;

use agentflow_core::models::agent::Agent;
use agentflow_core::AppState;

use super::output::truncate;
use super::print_json;
use super::run::{import_dir, run_agent, RunArgs};

/// Import one agent file, or every definition in a directory.
pub async fn import(state: &AppState, path: &str) -> Result<usize, String> {
    if Path::new(path).is_dir() {
        let count = import_dir(state, path).await?;
        println!("Imported {} agent(s) from '{}'", count, path);
        return Ok(count);
    }

    let agent = Agent::from_file(path)?;
    agent.validate()?;
    state
        .agent_store
        .save(&agent)
        .await
        .map_err(|e| format!("Failed to save agent '{}': {}", agent.id, e))?;
    println!("Imported agent '{}' ({})", agent.id, agent.name);
    Ok(1)
}

pub async fn list(state: &AppState, workspace_id: &str) -> Result<(), String> {
    let agents = state
        .agent_store
        .list_by_workspace(workspace_id)
        .await
        .map_err(|e| e.to_string())?;

    if agents.is_empty() {
        println!("No agents in workspace '{}'", workspace_id);
        return Ok(());
    }

    println!("┌──────────────────┬────────────────────┬────────┬───────┐");
    println!("│ ID               │ Name               │ Source │ Steps │");
    println!("├──────────────────┼────────────────────┼────────┼───────┤");
    for agent in &agents {
        println!(
            "│ {:<16} │ {:<18} │ {:<6} │ {:>5} │",
            truncate(&agent.id, 16),
            truncate(&agent.name, 18),
            agent.source.as_str(),
            agent.steps.len()
        );
    }
    println!("└──────────────────┴────────────────────┴────────┴───────┘");
    Ok(())
}

pub async fn show(state: &AppState, agent_id: &str) -> Result<(), String> {
    let agent = load(state, agent_id).await?;
    let value = serde_json::to_value(&agent).map_err(|e| e.to_string())?;
    print_json(&value);
    Ok(())
}

pub async fn delete(state: &AppState, agent_id: &str) -> Result<(), String> {
    let deleted = state.agent_store.delete(agent_id).await.map_err(|e| e.to_string())?;
    if !deleted {
        return Err(format!("Agent '{}' not found", agent_id));
    }
    let runs = state
        .run_store
        .delete_by_agent(agent_id)
        .await
        .map_err(|e| e.to_string())?;
    println!("Deleted agent '{}' and {} run(s)", agent_id, runs);
    Ok(())
}

/// Run a stored agent.
pub async fn run(state: &AppState, agent_id: &str, args: &RunArgs) -> Result<(), String> {
    let agent = load(state, agent_id).await?;
    run_agent(state, agent, args).await
}

async fn load(state: &AppState, agent_id: &str) -> Result<Agent, String> {
    state
        .agent_store
        .get(agent_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Agent '{}' not found", agent_id))
}
