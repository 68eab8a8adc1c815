//! Engine lifecycle manager
//!
//! This module handles:
//! - Selecting the active source and starting the poller
//! - Starting the background health checks
//! - Draining the tier channels so the poller never backs up
//! - Shutting everything down in order

use crate::state::AppState;
use simlink_core::{SimulatorType, TelemetryData, TelemetryError};
use simlink_engine::DataChannels;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const SUMMARY_INTERVAL: Duration = Duration::from_secs(10);

/// Frames and errors seen by the consumer since it started
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub errors: u64,
}

/// Activate `simulator`, start polling and health checks, and spawn the
/// channel consumer
pub async fn start(
    state: &AppState,
    simulator: SimulatorType,
    cancel: &CancellationToken,
) -> Result<JoinHandle<ConsumerStats>, TelemetryError> {
    state.polling.set_active_simulator(simulator).await?;

    let channels = state
        .polling
        .data_channels()
        .ok_or_else(|| TelemetryError::other("polling channels already taken"))?;
    state.monitor.start_health_checking()?;
    state.polling.start(cancel).await?;

    info!(simulator = %simulator, "telemetry pipeline started");
    Ok(tokio::spawn(consume(channels, cancel.child_token())))
}

/// Stop the poller (closing its channels) and the health monitor
pub async fn shutdown(state: &AppState) {
    state.polling.stop().await;
    state.monitor.stop().await;
    info!("telemetry pipeline stopped");
}

/// Drain all tier channels until they close or `cancel` fires
pub async fn consume(mut channels: DataChannels, cancel: CancellationToken) -> ConsumerStats {
    let mut stats = ConsumerStats::default();
    let mut summary = tokio::time::interval(SUMMARY_INTERVAL);
    summary.tick().await;

    let (mut high_open, mut medium_open, mut low_open, mut errors_open) = (true, true, true, true);

    while high_open || medium_open || low_open || errors_open {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = channels.high.recv(), if high_open => match msg {
                Some(data) => record(&mut stats.high, "high", &data),
                None => high_open = false,
            },
            msg = channels.medium.recv(), if medium_open => match msg {
                Some(data) => record(&mut stats.medium, "medium", &data),
                None => medium_open = false,
            },
            msg = channels.low.recv(), if low_open => match msg {
                Some(data) => record(&mut stats.low, "low", &data),
                None => low_open = false,
            },
            msg = channels.errors.recv(), if errors_open => match msg {
                Some(e) => {
                    stats.errors += 1;
                    warn!(error = %e, "polling error");
                }
                None => errors_open = false,
            },
            _ = summary.tick() => {
                info!(
                    high = stats.high,
                    medium = stats.medium,
                    low = stats.low,
                    errors = stats.errors,
                    "telemetry throughput"
                );
            }
        }
    }

    debug!(?stats, "consumer finished");
    stats
}

fn record(counter: &mut u64, tier: &str, data: &TelemetryData) {
    *counter += 1;
    trace!(
        tier,
        simulator = %data.simulator_type,
        lap = data.player.current_lap,
        speed = data.player.speed.0,
        "snapshot"
    );
}
