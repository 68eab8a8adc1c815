//! Application state management

use simlink_core::TelemetrySource;
use simlink_engine::{ConnectionHealthMonitor, DataPollingSystem};
use std::sync::Arc;

use crate::config::ServerConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Guards on-demand fetches and tracks per-source health
    pub monitor: Arc<ConnectionHealthMonitor>,

    /// Drives the active source at the three polling cadences
    pub polling: Arc<DataPollingSystem>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            monitor: Arc::new(ConnectionHealthMonitor::with_config(config.health.clone())),
            polling: Arc::new(DataPollingSystem::new(config.polling.clone())),
        }
    }

    /// Register a source with both the health monitor and the poller
    pub async fn register_source(&self, source: Arc<dyn TelemetrySource>) {
        self.monitor.register_connector(source.clone()).await;
        self.polling.register_connector(source).await;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(&ServerConfig::default())
    }
}
