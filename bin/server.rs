// Policy Gate - Web Server
// REST API with Axum over the SQLite rule store

use anyhow::{Context, Result};
use policy_gate::api::{router, AppState};
use policy_gate::{logging, open_database, Config, HttpCurrencyConverter};
use std::sync::Arc;
use tracing::info;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    logging::init(config.log_format)?;

    info!(version = policy_gate::VERSION, "Policy Gate - Web Server");

    let conn = open_database(&config.db_path)?;
    info!("Database opened: {:?}", config.db_path);

    let converter = HttpCurrencyConverter::new(config.price_url.clone(), config.price_timeout())?;
    let state = AppState::new(conn, Arc::new(converter));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("Server running on http://{}", config.bind_addr);
    info!("   Rules:        /policy_rule/");
    info!("   Transactions: /transactions/");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
