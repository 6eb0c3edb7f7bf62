//! agentflow Server - HTTP surface for the agent run engine.
//!
//! - RESTful HTTP API via axum (agents, runs, schedules)
//! - Manual and webhook triggers
//! - Cron schedule tick loop
//!
//! The engine itself lives in `agentflow-core`; this crate only adapts it
//! to HTTP.

pub mod api;
pub mod scheduler;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use agentflow_core::{AppState, AppStateInner, Database, EngineConfig};

/// Configuration for the agentflow server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    /// Seconds between schedule ticks. `0` disables the tick loop.
    pub tick_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3210,
            db_path: "agentflow.db".to_string(),
            tick_interval_secs: 30,
        }
    }
}

/// Create a shared `AppState` from a database path and engine wiring.
pub fn create_app_state(db_path: &str, engine: EngineConfig) -> Result<AppState, String> {
    let db = Database::open(db_path).map_err(|e| format!("Failed to open database: {}", e))?;
    Ok(Arc::new(AppStateInner::new(db, engine)))
}

/// Start the server with the environment-configured generation client.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    // try_init: the CLI may already have installed a subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "agentflow_core=info,agentflow_server=info,tower_http=info".into()
            }),
        )
        .try_init();

    tracing::info!(
        "Starting agentflow server on {}:{}",
        config.host,
        config.port
    );

    let state = create_app_state(&config.db_path, EngineConfig::from_env())?;
    start_server_with_state(config, state).await
}

/// Build the full router over `state`.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::api_router())
        .route("/api/health", axum::routing::get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server (and the schedule tick loop) with a pre-built
/// `AppState`.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("agentflow server listening on {}", local_addr);

    let shutdown = CancellationToken::new();
    if config.tick_interval_secs > 0 {
        scheduler::spawn_tick_loop(
            state.clone(),
            Duration::from_secs(config.tick_interval_secs),
            shutdown.clone(),
        );
    }

    let router = app(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("Server error: {}", e);
        }
        shutdown.cancel();
    });

    Ok(local_addr)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "agentflow-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
