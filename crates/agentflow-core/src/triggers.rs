//! Triggers - build a `(trigger, prompt)` pair and start a run.
//!
//! Manual, webhook and schedule triggers all end up in [`start_run`], which
//! registers the run's cancellation token in [`ActiveRuns`] for its
//! lifetime.
//!
//! [`ActiveRuns`]: crate::state::ActiveRuns

use std::collections::HashMap;

use tokio::task::JoinHandle;

use crate::error::CoreError;
use crate::executor::RunOptions;
use crate::models::agent::Agent;
use crate::models::run::{RunRecord, RunTrigger};
use crate::state::AppState;
use crate::template::{self, InputValue};

/// Prompt for a triggered run: `prompt` when given, otherwise the first
/// step's template filled with `values` and the declared defaults.
pub fn build_trigger_prompt(
    agent: &Agent,
    prompt: Option<&str>,
    values: &HashMap<String, InputValue>,
) -> Result<String, CoreError> {
    if let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) {
        return Ok(prompt.to_string());
    }
    let template_text = agent
        .steps
        .first()
        .and_then(|s| s.prompt.as_deref())
        .unwrap_or("");
    template::fill_with_defaults(template_text, values)
}

/// Check the shared secret of a webhook call. Agents without a token do not
/// accept webhooks; both failures look like a missing webhook.
pub fn check_webhook_token(agent: &Agent, token: Option<&str>) -> Result<(), CoreError> {
    match (&agent.webhook_token, token) {
        (Some(expected), Some(given)) if !expected.is_empty() && expected == given => Ok(()),
        _ => Err(CoreError::NotFound(format!("Webhook for agent {}", agent.id))),
    }
}

/// A run started in the background.
pub struct RunHandle {
    pub run_id: String,
    pub join: JoinHandle<Result<Option<RunRecord>, CoreError>>,
}

/// Spawn a run. The run id is assigned up front so callers can return it
/// (and cancel the run) before it finishes.
pub fn start_run(
    state: &AppState,
    agent: Agent,
    trigger: RunTrigger,
    prompt: String,
    mut opts: RunOptions,
) -> RunHandle {
    let run_id = opts
        .run_id
        .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
        .clone();
    state.active_runs.register(&run_id, opts.abort.clone());

    tracing::info!(
        "[Trigger] {} run {} of agent {}",
        trigger.as_str(),
        run_id,
        agent.id
    );

    let state = state.clone();
    let id = run_id.clone();
    let join = tokio::spawn(async move {
        let executor = state.executor(agent);
        let result = executor.run(trigger, &prompt, opts).await;
        state.active_runs.finish(&id);
        if let Err(e) = &result {
            tracing::error!("[Trigger] Run {} could not start: {}", id, e);
        }
        result
    });

    RunHandle { run_id, join }
}

/// Start a run and wait for it.
pub async fn run_to_completion(
    state: &AppState,
    agent: Agent,
    trigger: RunTrigger,
    prompt: String,
    opts: RunOptions,
) -> Result<Option<RunRecord>, CoreError> {
    let handle = start_run(state, agent, trigger, prompt, opts);
    handle
        .join
        .await
        .map_err(|e| CoreError::Internal(format!("Run task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::agent::AgentStep;

    fn agent(prompt: &str) -> Agent {
        Agent::new(
            "a",
            "A",
            vec![AgentStep {
                prompt: Some(prompt.to_string()),
                ..Default::default()
            }],
        )
    }

    #[test]
    fn test_explicit_prompt_wins() {
        let a = agent("{{topic}}");
        assert_eq!(
            build_trigger_prompt(&a, Some("Write about Rust"), &HashMap::new()).unwrap(),
            "Write about Rust"
        );
    }

    #[test]
    fn test_template_filled_with_values_and_defaults() {
        let a = agent("Write about {{topic}} in {{style::haiku}}");
        let values = HashMap::from([("topic".to_string(), InputValue::from("tides"))]);
        assert_eq!(
            build_trigger_prompt(&a, None, &values).unwrap(),
            "Write about tides in haiku"
        );
        assert!(matches!(
            build_trigger_prompt(&a, Some(" "), &HashMap::new()),
            Err(CoreError::BadRequest(_))
        ));
    }

    #[test]
    fn test_webhook_token() {
        let mut a = agent("hi");
        assert!(check_webhook_token(&a, Some("x")).is_err());
        a.webhook_token = Some("secret".to_string());
        assert!(check_webhook_token(&a, Some("secret")).is_ok());
        assert!(check_webhook_token(&a, Some("wrong")).is_err());
        assert!(check_webhook_token(&a, None).is_err());
    }
}
