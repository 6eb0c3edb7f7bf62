//! Schedule tick loop.
//!
//! Every tick lists the enabled schedules whose `next_run_at` has passed,
//! starts one `schedule`-triggered run per schedule and moves the schedule's
//! next fire time forward. A schedule is advanced even when its run cannot
//! start, so a broken schedule does not fire on every tick.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use agentflow_core::error::CoreError;
use agentflow_core::executor::RunOptions;
use agentflow_core::models::run::RunTrigger;
use agentflow_core::models::schedule::Schedule;
use agentflow_core::triggers::{build_trigger_prompt, start_run};
use agentflow_core::AppState;

/// Outcome of one schedule firing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FiredSchedule {
    pub schedule_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fire every schedule due at `now`.
pub async fn tick(state: &AppState, now: DateTime<Utc>) -> Result<Vec<FiredSchedule>, CoreError> {
    let due = state.schedule_store.list_due(now).await?;
    if !due.is_empty() {
        tracing::info!("[Scheduler] {} schedule(s) due", due.len());
    }

    let mut fired = Vec::with_capacity(due.len());
    for schedule in due {
        let outcome = fire(state, &schedule).await;
        let run_id = outcome.as_ref().ok().cloned();
        if let Err(e) = state
            .schedule_store
            .mark_fired(&schedule.id, run_id.clone(), now)
            .await
        {
            tracing::warn!("[Scheduler] Failed to advance schedule {}: {}", schedule.id, e);
        }
        fired.push(FiredSchedule {
            schedule_id: schedule.id.clone(),
            agent_id: schedule.agent_id.clone(),
            run_id,
            error: outcome.err().map(|e| e.to_string()),
        });
    }
    Ok(fired)
}

/// Start the run for one schedule and return its id.
pub async fn fire(state: &AppState, schedule: &Schedule) -> Result<String, CoreError> {
    let agent = state
        .agent_store
        .get(&schedule.agent_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Agent {}", schedule.agent_id)))?;

    let prompt = build_trigger_prompt(&agent, schedule.prompt.as_deref(), &schedule.input_values)
        .inspect_err(|e| {
            tracing::warn!("[Scheduler] Schedule {} has no usable prompt: {}", schedule.id, e)
        })?;

    let opts = RunOptions {
        workspace_id: Some(schedule.workspace_id.clone()),
        ..Default::default()
    };
    let handle = start_run(state, agent, RunTrigger::Schedule, prompt, opts);
    Ok(handle.run_id)
}

/// Run [`tick`] every `interval` until `shutdown` is cancelled.
pub fn spawn_tick_loop(
    state: AppState,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tracing::info!("[Scheduler] Tick loop started ({:?} interval)", interval);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = tick(&state, Utc::now()).await {
                        tracing::error!("[Scheduler] Tick failed: {}", e);
                    }
                }
            }
        }
        tracing::info!("[Scheduler] Tick loop stopped");
    })
}
