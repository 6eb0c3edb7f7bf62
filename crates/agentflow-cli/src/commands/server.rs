//! `agentflow server` - Start the HTTP server.

use agentflow_core::EngineConfig;

pub async fn run(
    host: String,
    port: u16,
    db_path: String,
    tick_interval_secs: u64,
    engine: EngineConfig,
) -> Result<(), String> {
    let state = agentflow_server::create_app_state(&db_path, engine)?;
    let config = agentflow_server::ServerConfig {
        host: host.clone(),
        port,
        db_path,
        tick_interval_secs,
    };

    println!("Starting agentflow server on {}:{}...", host, port);

    let addr = agentflow_server::start_server_with_state(config, state).await?;
    println!("agentflow server listening on http://{}", addr);

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    println!("\nShutting down...");
    Ok(())
}
