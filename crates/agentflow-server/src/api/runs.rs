//! Runs API - /api/runs
//!
//! GET  /api/runs                - Runs currently in flight
//! POST /api/runs/{runId}/cancel - Signal an in-flight run to stop

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use agentflow_core::error::CoreError;
use agentflow_core::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_active))
        .route("/{run_id}/cancel", post(cancel_run))
}

/// Persisted `running` records plus the ids this process can still cancel.
/// A record that is `running` but not active was interrupted by a restart.
async fn list_active(State(state): State<AppState>) -> Result<Json<serde_json::Value>, CoreError> {
    let runs = state.run_store.list_running().await?;
    let mut active = state.active_runs.ids();
    active.sort();
    Ok(Json(serde_json::json!({ "runs": runs, "active": active })))
}

/// Cancellation is cooperative: the executor notices at its next check
/// point and marks the run `canceled`.
async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, CoreError> {
    if !state.active_runs.cancel(&run_id) {
        return Err(CoreError::NotFound(format!("Run {} is not running", run_id)));
    }
    tracing::info!("[Runs] Cancel requested for run {}", run_id);
    Ok(Json(serde_json::json!({ "canceled": true, "runId": run_id })))
}
