//! Per-source health monitoring
//!
//! Every registered source gets its own circuit breaker, retry handler and
//! validator. On-demand fetches run breaker -> retry -> fetch + validate,
//! and a background loop probes every source concurrently.

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};
use crate::periodic::spawn_periodic;
use crate::retry::{RetryConfig, RetryHandler};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simlink_core::error::{Result, TelemetryError};
use simlink_core::units::duration_ms;
use simlink_core::validation::{DataValidator, ValidationConfig};
use simlink_core::{SimulatorType, TelemetryData, TelemetrySource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Consumer-facing health label, coarser than the breaker state
///
/// The monitor never assigns `Recovering`; a successful fetch is `Healthy`
/// even while the breaker is still half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Healthy,
    Unhealthy,
    Failed,
    Recovering,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    /// Interval between background health passes
    #[serde(with = "duration_ms")]
    pub check_interval: Duration,

    /// Upper bound on a single source's health probe
    #[serde(with = "duration_ms")]
    pub check_timeout: Duration,

    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub validation: ValidationConfig,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            check_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl HealthMonitorConfig {
    /// Reject settings the health loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(TelemetryError::InvalidConfig("health check_interval must be non-zero".into()));
        }
        self.validation.check()
    }
}

/// Detailed per-source view returned by
/// [`ConnectionHealthMonitor::detailed_health_metrics`]
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorHealthMetrics {
    pub simulator: SimulatorType,
    pub state: ConnectionState,
    pub connected: bool,
    pub last_check: DateTime<Utc>,
    pub circuit_breaker: CircuitBreakerMetrics,
}

struct ConnectorHealth {
    source: Arc<dyn TelemetrySource>,
    retry: Arc<RetryHandler>,
    breaker: Arc<CircuitBreaker>,
    validator: Arc<DataValidator>,
    state: ConnectionState,
    last_check: DateTime<Utc>,
}

struct MonitorInner {
    config: HealthMonitorConfig,
    connectors: RwLock<HashMap<SimulatorType, ConnectorHealth>>,
}

impl MonitorInner {
    async fn set_state(&self, id: SimulatorType, state: ConnectionState) {
        let mut connectors = self.connectors.write().await;
        // The source may have been unregistered while the call was in flight
        if let Some(entry) = connectors.get_mut(&id) {
            if entry.state != state {
                match state {
                    ConnectionState::Healthy | ConnectionState::Recovering => {
                        info!(simulator = %id, from = ?entry.state, to = ?state, "connection state changed")
                    }
                    _ => warn!(simulator = %id, from = ?entry.state, to = ?state, "connection state changed"),
                }
            }
            entry.state = state;
            entry.last_check = Utc::now();
        }
    }

    async fn health_pass(self: &Arc<Self>, cancel: &CancellationToken) {
        let sources: Vec<(SimulatorType, Arc<dyn TelemetrySource>)> = {
            let connectors = self.connectors.read().await;
            connectors.iter().map(|(id, c)| (*id, c.source.clone())).collect()
        };

        // One task per source so a hung probe only holds up its own result
        let mut probes = JoinSet::new();
        for (id, source) in sources {
            let inner = self.clone();
            let cancel = cancel.clone();
            probes.spawn(async move { inner.probe(id, source, &cancel).await });
        }
        while probes.join_next().await.is_some() {}
    }

    async fn probe(&self, id: SimulatorType, source: Arc<dyn TelemetrySource>, cancel: &CancellationToken) {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            r = tokio::time::timeout(self.config.check_timeout, source.health_check(cancel)) => r,
        };

        let state = match outcome {
            Ok(Ok(())) => ConnectionState::Healthy,
            Ok(Err(e)) => {
                debug!(simulator = %id, error = %e, "health check failed");
                ConnectionState::Unhealthy
            }
            Err(_) => {
                debug!(simulator = %id, timeout = ?self.config.check_timeout, "health check timed out");
                ConnectionState::Unhealthy
            }
        };
        self.set_state(id, state).await;
    }
}

/// Tracks health for a set of sources and wraps their fetches with a
/// circuit breaker and retries
pub struct ConnectionHealthMonitor {
    inner: Arc<MonitorInner>,
    cancel: CancellationToken,
    checker: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionHealthMonitor {
    pub fn new(check_interval: Duration) -> Self {
        Self::with_config(HealthMonitorConfig {
            check_interval,
            ..Default::default()
        })
    }

    pub fn with_config(config: HealthMonitorConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                connectors: RwLock::new(HashMap::new()),
            }),
            cancel: CancellationToken::new(),
            checker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.inner.config
    }

    /// Register a source under its identifier with fresh resilience state
    ///
    /// Registering the same simulator again replaces the previous entry.
    pub async fn register_connector(&self, source: Arc<dyn TelemetrySource>) {
        let id = source.identifier();
        let config = &self.inner.config;
        let entry = ConnectorHealth {
            source,
            retry: Arc::new(RetryHandler::new(config.retry.clone())),
            breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            validator: Arc::new(DataValidator::new(config.validation.clone())),
            state: ConnectionState::Healthy,
            last_check: Utc::now(),
        };

        self.inner.connectors.write().await.insert(id, entry);
        info!(simulator = %id, "registered connector with health monitor");
    }

    /// Remove a source; returns whether it was registered
    pub async fn unregister_connector(&self, id: SimulatorType) -> bool {
        let removed = self.inner.connectors.write().await.remove(&id).is_some();
        if removed {
            info!(simulator = %id, "unregistered connector from health monitor");
        }
        removed
    }

    /// Fetch one snapshot through breaker, retries and validation
    ///
    /// A snapshot that fails validation counts as a failed (retryable)
    /// fetch; it is never returned to the caller.
    #[instrument(skip_all, fields(simulator = %id))]
    pub async fn get_telemetry_with_retry(&self, id: SimulatorType) -> Result<TelemetryData> {
        let (source, retry, breaker, validator) = {
            let connectors = self.inner.connectors.read().await;
            let entry = connectors.get(&id).ok_or(TelemetryError::NotRegistered(id))?;
            (
                entry.source.clone(),
                entry.retry.clone(),
                entry.breaker.clone(),
                entry.validator.clone(),
            )
        };
        let cancel = &self.cancel;

        let result = breaker
            .execute(|| {
                retry.retry(cancel, || async {
                    let data = source.telemetry_data(cancel).await?;
                    let errors = validator.validate_telemetry_data(&data);
                    if !errors.is_empty() {
                        debug!(count = errors.len(), "snapshot failed validation");
                        return Err(TelemetryError::Validation(errors));
                    }
                    Ok(data)
                })
            })
            .await;

        let state = if result.is_ok() {
            ConnectionState::Healthy
        } else {
            ConnectionState::Failed
        };
        self.inner.set_state(id, state).await;

        result
    }

    /// Current health label for every registered source
    pub async fn health_status(&self) -> HashMap<SimulatorType, ConnectionState> {
        let connectors = self.inner.connectors.read().await;
        connectors.iter().map(|(id, c)| (*id, c.state)).collect()
    }

    pub async fn detailed_health_metrics(&self) -> HashMap<SimulatorType, ConnectorHealthMetrics> {
        let connectors = self.inner.connectors.read().await;
        connectors
            .iter()
            .map(|(id, c)| {
                let metrics = ConnectorHealthMetrics {
                    simulator: *id,
                    state: c.state,
                    connected: c.source.is_connected(),
                    last_check: c.last_check,
                    circuit_breaker: c.breaker.metrics(),
                };
                (*id, metrics)
            })
            .collect()
    }

    /// Probe every registered source once, concurrently
    pub async fn run_health_pass(&self) {
        self.inner.health_pass(&self.cancel).await;
    }

    /// Start the background health loop; calling it twice is a no-op
    ///
    /// Fails when the configured check interval is zero.
    pub fn start_health_checking(&self) -> Result<()> {
        self.inner.config.validate()?;
        let mut checker = self.checker.lock().unwrap_or_else(PoisonError::into_inner);
        if checker.is_some() {
            debug!("health checking already started");
            return Ok(());
        }

        let inner = self.inner.clone();
        let cancel = self.cancel.clone();
        let interval = self.inner.config.check_interval;
        *checker = Some(spawn_periodic("health-monitor", interval, self.cancel.clone(), move || {
            let inner = inner.clone();
            let cancel = cancel.clone();
            async move { inner.health_pass(&cancel).await }
        }));
        info!(?interval, "health checking started");
        Ok(())
    }

    /// Cancel the health loop and any in-flight fetches, then wait for the
    /// loop to exit
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.checker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "health loop ended abnormally");
            }
        }
        info!("health monitor stopped");
    }
}
