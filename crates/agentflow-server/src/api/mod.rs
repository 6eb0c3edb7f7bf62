pub mod agents;
pub mod runs;
pub mod schedules;

use axum::Router;

use agentflow_core::AppState;

/// Build the complete API router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/api/agents", agents::router())
        .nest("/api/runs", runs::router())
        .nest("/api/schedules", schedules::router())
}
