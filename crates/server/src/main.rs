mod api;
mod bootstrap;
mod chat;
mod health;
mod sessions;
mod tracker;
mod webhook;

use std::future::IntoFuture;
use std::time::Duration;

use anyhow::Result;
use scout_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use scout_core::config::LogFormat::*;
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
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    app.tracker.clone().spawn(app.config.tracker.sweep_interval_secs);

    let router = api::router(app.api_state.clone()).merge(webhook::router(app.webhook_state.clone()));
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(bind_address = %address, "scout-server started");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    let server_handle = tokio::spawn(server.into_future());

    tokio::signal::ctrl_c().await?;
    tracing::info!("scout-server stopping");
    let _ = shutdown_tx.send(());

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs.max(1));
    match tokio::time::timeout(grace, server_handle).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!("graceful shutdown window elapsed, exiting"),
    }

    Ok(())
}
