//! Sub-agent proxy tool: lets a step delegate to another agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{Plugin, ToolDefinition};
use crate::error::CoreError;
use crate::executor::{executor_for, ExecutorContext, RunOptions};
use crate::models::agent::Agent;
use crate::models::run::{RunStatus, RunTrigger};

pub struct AgentPlugin {
    agent: Agent,
    ctx: Arc<ExecutorContext>,
    tool_name: String,
    parent: RunOptions,
}

impl AgentPlugin {
    pub fn new(agent: Agent, ctx: Arc<ExecutorContext>, parent: &RunOptions) -> Self {
        Self {
            tool_name: Self::tool_name_for(&agent.id),
            agent,
            ctx,
            parent: parent.clone(),
        }
    }

    /// Tool name exposed for an agent id (`agent_` + id, restricted to
    /// characters every provider accepts).
    pub fn tool_name_for(agent_id: &str) -> String {
        let sanitized: String = agent_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        format!("agent_{}", sanitized)
    }
}

#[async_trait]
impl Plugin for AgentPlugin {
    fn name(&self) -> &str {
        &self.tool_name
    }

    async fn tools(&self) -> Result<Vec<ToolDefinition>, CoreError> {
        let description = format!(
            "Ask the agent \"{}\" to handle a task. {}",
            self.agent.name,
            self.agent.description.as_deref().unwrap_or("")
        );
        Ok(vec![ToolDefinition::new(
            &self.tool_name,
            description.trim_end(),
            json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "Complete instructions for the agent"
                    }
                },
                "required": ["prompt"]
            }),
        )])
    }

    async fn execute(
        &self,
        _tool: &str,
        params: serde_json::Value,
        abort: &CancellationToken,
    ) -> Result<serde_json::Value, CoreError> {
        let prompt = params["prompt"]
            .as_str()
            .ok_or_else(|| CoreError::Tool("Missing 'prompt' argument".to_string()))?;

        tracing::info!("[AgentPlugin] Delegating to sub-agent {}", self.agent.id);

        let executor = executor_for(self.agent.clone(), self.ctx.clone());
        let run = executor
            .run(RunTrigger::Workflow, prompt, self.parent.child(abort))
            .await?
            .ok_or_else(|| CoreError::Tool(format!("Agent {} received an empty prompt", self.agent.id)))?;

        Ok(json!({
            "success": run.status == RunStatus::Success,
            "status": run.status.as_str(),
            "runId": run.id,
            "content": run.last_output().unwrap_or_default(),
            "error": run.error,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_name_is_sanitized() {
        assert_eq!(AgentPlugin::tool_name_for("writer"), "agent_writer");
        assert_eq!(AgentPlugin::tool_name_for("team/writer v2"), "agent_team_writer_v2");
    }
}
