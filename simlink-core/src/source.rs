//! Telemetry source trait definition

use crate::error::{Result, TelemetryError};
use crate::model::{SimulatorType, TelemetryData};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Receivers produced by [`TelemetrySource::start_data_stream`]
pub struct DataStream {
    pub data: mpsc::Receiver<TelemetryData>,
    pub errors: mpsc::Receiver<TelemetryError>,
}

/// Trait for simulator-specific telemetry sources
///
/// Each source is responsible for:
/// - Reaching its simulator (SDK, shared memory, network, ...)
/// - Converting native data to the unified `TelemetryData` snapshot
/// - Reporting transient failures as retryable `ConnectionError`s
///
/// The engine only ever calls these methods and shares sources between
/// tasks behind an `Arc`, so implementations use interior mutability.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Which simulator this source reads from
    fn identifier(&self) -> SimulatorType;

    /// Open the connection to the simulator
    async fn connect(&self, cancel: &CancellationToken) -> Result<()>;

    /// Close the connection; closing an unconnected source is not an error
    async fn disconnect(&self) -> Result<()>;

    /// Lightweight connectivity flag, must not block
    fn is_connected(&self) -> bool;

    /// Read one snapshot
    async fn telemetry_data(&self, cancel: &CancellationToken) -> Result<TelemetryData>;

    /// Push snapshots at `interval` until `stop_data_stream` or cancellation
    async fn start_data_stream(
        &self,
        cancel: &CancellationToken,
        interval: Duration,
    ) -> Result<DataStream>;

    async fn stop_data_stream(&self);

    /// Probe connectivity without producing a snapshot
    async fn health_check(&self, cancel: &CancellationToken) -> Result<()>;
}
