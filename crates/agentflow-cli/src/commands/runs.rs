//! `agentflow runs` - Inspect persisted runs.

use agentflow_core::models::run::MessageRole;
use agentflow_core::AppState;

use super::output::{run_summary, truncate};
use super::print_json;

pub async fn list(state: &AppState, agent_id: &str, limit: usize) -> Result<(), String> {
    let runs = state
        .run_store
        .list_by_agent(agent_id, limit)
        .await
        .map_err(|e| e.to_string())?;

    if runs.is_empty() {
        println!("No runs for agent '{}'", agent_id);
        return Ok(());
    }

    for run in &runs {
        println!(
            "{}  {:<8}  {:<9}  {}",
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.trigger.as_str(),
            run.status.as_str(),
            run.id
        );
        println!("    {}", truncate(run.prompt.lines().next().unwrap_or(""), 72));
    }
    Ok(())
}

/// Print a run. `json` dumps the whole record, otherwise the conversation.
pub async fn show(state: &AppState, agent_id: &str, run_id: &str, json: bool) -> Result<(), String> {
    let run = state
        .run_store
        .get(agent_id, run_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Run '{}' of agent '{}' not found", run_id, agent_id))?;

    if json {
        let value = serde_json::to_value(&run).map_err(|e| e.to_string())?;
        print_json(&value);
        return Ok(());
    }

    println!("{}", run_summary(&run));
    for message in run.messages.iter().filter(|m| !m.content.is_empty()) {
        let label = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        println!("\n[{}]\n{}", label, message.content);
    }
    for call in &run.tool_calls {
        println!("\n[tool {}] {} → {}", call.name, call.params, call.result);
    }
    Ok(())
}
