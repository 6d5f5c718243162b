mod bootstrap;
mod health;
mod routes;

use std::time::Duration;

use anyhow::Result;
use penny_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use penny_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    let router = routes::router(app.orchestrator.clone()).merge(health::router(app.db_pool.clone()));

    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        llm_model = %app.config.llm.model,
        "penny-server listening"
    );

    let shutdown_grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown(shutdown_grace)).await?;

    tracing::info!(event_name = "system.server.stopping", "penny-server stopping");
    Ok(())
}

async fn wait_for_shutdown(grace: Duration) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::info!(
        event_name = "system.server.shutdown_signal",
        grace_secs = grace.as_secs(),
        "shutdown signal received, draining connections"
    );
}
