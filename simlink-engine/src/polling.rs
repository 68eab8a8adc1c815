//! Priority-tiered polling of the active source
//!
//! Three independent tickers (high/medium/low) fetch from the active source
//! and publish to their own bounded channel; a fourth loop runs health
//! checks. Publishing never blocks: when a consumer falls behind, new
//! snapshots are dropped so the poller keeps its cadence. This is lossy
//! delivery on purpose, favouring freshness over completeness.

use crate::periodic::spawn_periodic;
use serde::{Deserialize, Serialize};
use simlink_core::error::{Result, TelemetryError};
use simlink_core::units::duration_ms;
use simlink_core::{SimulatorType, TelemetryData, TelemetrySource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Polling tier, ordered by cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Fast-changing inputs: speed, RPM, pedals (~60 Hz)
    High,
    /// Lap, fuel and position changes (~10 Hz)
    Medium,
    /// Opponent and session metadata (~1 Hz)
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    fn task_name(&self) -> &'static str {
        match self {
            Priority::High => "poll-high",
            Priority::Medium => "poll-medium",
            Priority::Low => "poll-low",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    #[serde(with = "duration_ms")]
    pub high_priority_interval: Duration,

    #[serde(with = "duration_ms")]
    pub medium_priority_interval: Duration,

    #[serde(with = "duration_ms")]
    pub low_priority_interval: Duration,

    /// Capacity of each tier channel and of the error channel
    pub buffer_size: usize,

    /// Connect retries in `set_active_simulator`; total attempts are
    /// `max_retries + 1`
    pub max_retries: u32,

    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,

    /// Upper bound on a single connect attempt
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Health-check loop cadence, independent of the tier intervals
    #[serde(with = "duration_ms")]
    pub health_check_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            high_priority_interval: Duration::from_millis(16),
            medium_priority_interval: Duration::from_millis(100),
            low_priority_interval: Duration::from_millis(1000),
            buffer_size: 10,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(5),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self, tier: Priority) -> Duration {
        match tier {
            Priority::High => self.high_priority_interval,
            Priority::Medium => self.medium_priority_interval,
            Priority::Low => self.low_priority_interval,
        }
    }

    /// Reject settings the loops cannot run with
    pub fn validate(&self) -> Result<()> {
        for (name, interval) in [
            ("high_priority_interval", self.high_priority_interval),
            ("medium_priority_interval", self.medium_priority_interval),
            ("low_priority_interval", self.low_priority_interval),
            ("health_check_interval", self.health_check_interval),
        ] {
            if interval.is_zero() {
                return Err(TelemetryError::InvalidConfig(format!("polling {name} must be non-zero")));
            }
        }
        if self.buffer_size == 0 {
            return Err(TelemetryError::InvalidConfig("polling buffer_size must be non-zero".into()));
        }
        Ok(())
    }
}

/// Receiving ends of one channel generation
pub struct DataChannels {
    pub high: mpsc::Receiver<TelemetryData>,
    pub medium: mpsc::Receiver<TelemetryData>,
    pub low: mpsc::Receiver<TelemetryData>,
    pub errors: mpsc::Receiver<TelemetryError>,
}

/// Most recent snapshot delivered by each tier
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatestData {
    pub high: Option<TelemetryData>,
    pub medium: Option<TelemetryData>,
    pub low: Option<TelemetryData>,
}

impl LatestData {
    pub fn get(&self, tier: Priority) -> Option<&TelemetryData> {
        match tier {
            Priority::High => self.high.as_ref(),
            Priority::Medium => self.medium.as_ref(),
            Priority::Low => self.low.as_ref(),
        }
    }

    fn set(&mut self, tier: Priority, data: TelemetryData) {
        let slot = match tier {
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        };
        *slot = Some(data);
    }
}

#[derive(Clone)]
struct Publishers {
    high: mpsc::Sender<TelemetryData>,
    medium: mpsc::Sender<TelemetryData>,
    low: mpsc::Sender<TelemetryData>,
    errors: mpsc::Sender<TelemetryError>,
}

impl Publishers {
    fn tier(&self, tier: Priority) -> &mpsc::Sender<TelemetryData> {
        match tier {
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }

    /// Best-effort error report; dropped when the error channel is full
    fn report(&self, err: TelemetryError) {
        if let Err(TrySendError::Full(err)) = self.errors.try_send(err) {
            debug!(error = %err, "error channel full, dropping error");
        }
    }
}

struct ChannelSet {
    publishers: Publishers,
    receivers: Option<DataChannels>,
}

impl ChannelSet {
    fn new(buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        let (high_tx, high_rx) = mpsc::channel(buffer_size);
        let (medium_tx, medium_rx) = mpsc::channel(buffer_size);
        let (low_tx, low_rx) = mpsc::channel(buffer_size);
        let (errors_tx, errors_rx) = mpsc::channel(buffer_size);

        Self {
            publishers: Publishers {
                high: high_tx,
                medium: medium_tx,
                low: low_tx,
                errors: errors_tx,
            },
            receivers: Some(DataChannels {
                high: high_rx,
                medium: medium_rx,
                low: low_rx,
                errors: errors_rx,
            }),
        }
    }
}

struct RunHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct PollerInner {
    config: PollingConfig,
    connectors: RwLock<HashMap<SimulatorType, Arc<dyn TelemetrySource>>>,
    active: RwLock<Option<Arc<dyn TelemetrySource>>>,
    latest: RwLock<LatestData>,
}

impl PollerInner {
    async fn active_source(&self) -> Option<Arc<dyn TelemetrySource>> {
        self.active.read().await.clone()
    }

    async fn poll_tier(&self, tier: Priority, publishers: &Publishers, cancel: &CancellationToken) {
        let Some(source) = self.active_source().await else {
            return;
        };
        if !source.is_connected() {
            trace!(?tier, simulator = %source.identifier(), "source not connected, skipping tick");
            return;
        }

        match source.telemetry_data(cancel).await {
            Ok(data) => {
                self.latest.write().await.set(tier, data.clone());
                match publishers.tier(tier).try_send(data) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => trace!(?tier, "channel full, dropping snapshot"),
                    Err(TrySendError::Closed(_)) => trace!(?tier, "channel closed"),
                }
            }
            Err(e) => publishers.report(e),
        }
    }

    async fn check_health(&self, publishers: &Publishers, cancel: &CancellationToken) {
        let Some(source) = self.active_source().await else {
            return;
        };
        if let Err(e) = source.health_check(cancel).await {
            debug!(simulator = %source.identifier(), error = %e, "active source health check failed");
            publishers.report(e);
        }
    }

    async fn connect_with_retry(&self, source: &Arc<dyn TelemetrySource>) -> Result<()> {
        let id = source.identifier();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let cancel = CancellationToken::new();
            let err = match tokio::time::timeout(self.config.connect_timeout, source.connect(&cancel)).await {
                Ok(Ok(())) => {
                    info!(simulator = %id, attempt, "connected");
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(_) => {
                    cancel.cancel();
                    TelemetryError::Timeout(format!(
                        "connecting to {id} took longer than {:?}",
                        self.config.connect_timeout
                    ))
                }
            };

            if attempt > self.config.max_retries {
                warn!(simulator = %id, attempts = attempt, error = %err, "giving up on connection");
                return Err(err);
            }
            warn!(simulator = %id, attempt, error = %err, "connection attempt failed, retrying");
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }
}

/// Drives the active source at three cadences and publishes snapshots
pub struct DataPollingSystem {
    inner: Arc<PollerInner>,
    channels: Mutex<ChannelSet>,
    run: AsyncMutex<Option<RunHandle>>,
}

impl DataPollingSystem {
    pub fn new(config: PollingConfig) -> Self {
        let channels = ChannelSet::new(config.buffer_size);
        Self {
            inner: Arc::new(PollerInner {
                config,
                connectors: RwLock::new(HashMap::new()),
                active: RwLock::new(None),
                latest: RwLock::new(LatestData::default()),
            }),
            channels: Mutex::new(channels),
            run: AsyncMutex::new(None),
        }
    }

    pub fn config(&self) -> &PollingConfig {
        &self.inner.config
    }

    pub async fn register_connector(&self, source: Arc<dyn TelemetrySource>) {
        let id = source.identifier();
        self.inner.connectors.write().await.insert(id, source);
        info!(simulator = %id, "registered connector with polling system");
    }

    /// Remove a source; unregistering the active source clears the active slot
    pub async fn unregister_connector(&self, id: SimulatorType) -> bool {
        let removed = self.inner.connectors.write().await.remove(&id).is_some();
        if removed {
            let mut active = self.inner.active.write().await;
            if active.as_ref().is_some_and(|s| s.identifier() == id) {
                *active = None;
            }
            info!(simulator = %id, "unregistered connector from polling system");
        }
        removed
    }

    pub async fn registered_simulators(&self) -> Vec<SimulatorType> {
        let mut ids: Vec<_> = self.inner.connectors.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Make `id` the polled source, connecting it if needed
    ///
    /// A different, still-connected active source is disconnected first.
    /// Connecting is attempted `max_retries + 1` times, `retry_delay` apart.
    pub async fn set_active_simulator(&self, id: SimulatorType) -> Result<()> {
        let source = self
            .inner
            .connectors
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(TelemetryError::NotRegistered(id))?;

        if let Some(previous) = self.inner.active_source().await {
            if previous.identifier() != id && previous.is_connected() {
                info!(simulator = %previous.identifier(), "disconnecting previous simulator");
                if let Err(e) = previous.disconnect().await {
                    warn!(simulator = %previous.identifier(), error = %e, "disconnect failed");
                }
            }
        }

        if !source.is_connected() {
            self.inner.connect_with_retry(&source).await?;
        }

        *self.inner.active.write().await = Some(source);
        info!(simulator = %id, "active simulator set");
        Ok(())
    }

    pub async fn active_simulator(&self) -> Option<SimulatorType> {
        self.inner.active_source().await.map(|s| s.identifier())
    }

    /// Launch the three tier loops and the health loop
    ///
    /// Fails on a zero interval, when already running, when no active
    /// source is set, or when the active source is not connected. The loops
    /// stop when `parent` is cancelled or on [`stop`](Self::stop); a run
    /// whose parent was cancelled no longer counts as running.
    pub async fn start(&self, parent: &CancellationToken) -> Result<()> {
        self.inner.config.validate()?;

        let mut run = self.run.lock().await;
        if let Some(handle) = run.take() {
            if !handle.cancel.is_cancelled() {
                *run = Some(handle);
                return Err(TelemetryError::AlreadyRunning);
            }
            // The parent was cancelled; reap the old run before starting over
            self.reap(handle).await;
        }

        let source = self.inner.active_source().await.ok_or(TelemetryError::NoActiveSource)?;
        if !source.is_connected() {
            return Err(TelemetryError::NotConnected(source.identifier()));
        }

        let cancel = parent.child_token();
        let publishers = self.lock_channels().publishers.clone();
        let mut tasks = Vec::with_capacity(Priority::ALL.len() + 1);

        for tier in Priority::ALL {
            let inner = self.inner.clone();
            let publishers = publishers.clone();
            let tick_cancel = cancel.clone();
            tasks.push(spawn_periodic(
                tier.task_name(),
                self.inner.config.interval(tier),
                cancel.clone(),
                move || {
                    let inner = inner.clone();
                    let publishers = publishers.clone();
                    let cancel = tick_cancel.clone();
                    async move { inner.poll_tier(tier, &publishers, &cancel).await }
                },
            ));
        }

        let inner = self.inner.clone();
        let tick_cancel = cancel.clone();
        tasks.push(spawn_periodic(
            "poll-health",
            self.inner.config.health_check_interval,
            cancel.clone(),
            move || {
                let inner = inner.clone();
                let publishers = publishers.clone();
                let cancel = tick_cancel.clone();
                async move { inner.check_health(&publishers, &cancel).await }
            },
        ));

        *run = Some(RunHandle { cancel, tasks });
        info!(simulator = %source.identifier(), "polling system started");
        Ok(())
    }

    /// Stop all loops, close the channels and allocate a fresh generation
    ///
    /// Every loop has exited by the time this returns. Stopping a system
    /// that is not running does nothing.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        let Some(handle) = run.take() else {
            return;
        };

        self.reap(handle).await;
        info!("polling system stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.run
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.cancel.is_cancelled())
    }

    async fn reap(&self, handle: RunHandle) {
        handle.cancel.cancel();
        for task in handle.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "polling task ended abnormally");
            }
        }

        // Dropping the old publishers closes the previous generation
        *self.lock_channels() = ChannelSet::new(self.inner.config.buffer_size);
    }

    /// Take the receivers of the current channel generation
    ///
    /// Returns `None` if they were already taken; a new generation becomes
    /// available after each [`stop`](Self::stop).
    pub fn data_channels(&self) -> Option<DataChannels> {
        self.lock_channels().receivers.take()
    }

    /// Last snapshot each tier fetched, without consuming the channels
    pub async fn latest_data(&self) -> LatestData {
        self.inner.latest.read().await.clone()
    }

    fn lock_channels(&self) -> MutexGuard<'_, ChannelSet> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DataPollingSystem {
    fn drop(&mut self) {
        if let Some(handle) = self.run.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}
