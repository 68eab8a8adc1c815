//! SimLink Server
//!
//! Runs the demo source through the resilience engine and serves the
//! status API

use anyhow::{Context, Result};
use simlink_adapters::DemoSource;
use simlink_core::SimulatorType;
use simlink_server::{api, config::ServerConfig, manager, state::AppState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting SimLink Server");

    let config = ServerConfig::load()?;
    let state = AppState::new(&config);

    state
        .register_source(Arc::new(DemoSource::with_config(config.demo.clone())))
        .await;

    let cancel = CancellationToken::new();
    let consumer = manager::start(&state, SimulatorType::Demo, &cancel)
        .await
        .context("Failed to start telemetry pipeline")?;

    let app = api::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!("Server listening on http://{}", config.bind_address);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    manager::shutdown(&state).await;
    let stats = consumer.await?;
    info!(
        high = stats.high,
        medium = stats.medium,
        low = stats.low,
        errors = stats.errors,
        "SimLink Server stopped"
    );

    Ok(())
}
