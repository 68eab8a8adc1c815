//! Scriptable in-memory source shared by the engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use simlink_core::error::{Result, TelemetryError};
use simlink_core::units::Kilometers;
use simlink_core::{ConnectionError, DataStream, SimulatorType, TelemetryData, TelemetrySource};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct MockSource {
    id: SimulatorType,
    connected: AtomicBool,
    healthy: AtomicBool,
    invalid_data: AtomicBool,
    connect_failures: AtomicU32,
    fetch_failures: AtomicU32,
    fetch_failures_retryable: AtomicBool,
    health_delay: Mutex<Duration>,
    sequence: AtomicU32,
    pub connect_calls: AtomicU32,
    pub disconnect_calls: AtomicU32,
    pub fetch_calls: AtomicU32,
    pub health_calls: AtomicU32,
    stream_cancel: Mutex<Option<CancellationToken>>,
}

impl MockSource {
    pub fn new(id: SimulatorType) -> Arc<Self> {
        Arc::new(Self {
            id,
            healthy: AtomicBool::new(true),
            fetch_failures_retryable: AtomicBool::new(true),
            ..Default::default()
        })
    }

    pub fn connected(id: SimulatorType) -> Arc<Self> {
        let source = Self::new(id);
        source.connected.store(true, Ordering::SeqCst);
        source
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected_now(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_invalid_data(&self, invalid: bool) {
        self.invalid_data.store(invalid, Ordering::SeqCst);
    }

    pub fn set_health_delay(&self, delay: Duration) {
        *self.health_delay.lock().unwrap() = delay;
    }

    /// Fail the next `n` connect attempts
    pub fn fail_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` fetches with a connection error
    pub fn fail_fetches(&self, n: u32, retryable: bool) {
        self.fetch_failures.store(n, Ordering::SeqCst);
        self.fetch_failures_retryable.store(retryable, Ordering::SeqCst);
    }

    pub fn calls(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> TelemetryData {
        let mut data = TelemetryData {
            timestamp: Utc::now(),
            simulator_type: self.id,
            is_connected: true,
            ..Default::default()
        };
        data.session.track_length = Kilometers(4.2);
        data.player.position = 1;
        data.player.current_lap = self.sequence.fetch_add(1, Ordering::SeqCst) as i32;
        if self.invalid_data.load(Ordering::SeqCst) {
            data.session.track_length = Kilometers(-1.0);
        }
        data
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TelemetrySource for MockSource {
    fn identifier(&self) -> SimulatorType {
        self.id
    }

    async fn connect(&self, _cancel: &CancellationToken) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.connect_failures) {
            return Err(ConnectionError::new(self.id, "connect", "connection refused", true).into());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn telemetry_data(&self, _cancel: &CancellationToken) -> Result<TelemetryData> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fetch_failures) {
            let retryable = self.fetch_failures_retryable.load(Ordering::SeqCst);
            return Err(ConnectionError::new(self.id, "telemetry_data", "sdk not ready", retryable).into());
        }
        Ok(self.snapshot())
    }

    async fn start_data_stream(&self, cancel: &CancellationToken, interval: Duration) -> Result<DataStream> {
        let (data_tx, data) = mpsc::channel(16);
        let (_errors_tx, errors) = mpsc::channel(16);
        let stream_cancel = cancel.child_token();
        *self.stream_cancel.lock().unwrap() = Some(stream_cancel.clone());

        let id = self.id;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stream_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let data = TelemetryData {
                            timestamp: Utc::now(),
                            simulator_type: id,
                            ..Default::default()
                        };
                        if data_tx.send(data).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(DataStream { data, errors })
    }

    async fn stop_data_stream(&self) {
        if let Some(cancel) = self.stream_cancel.lock().unwrap().take() {
            cancel.cancel();
        }
    }

    async fn health_check(&self, _cancel: &CancellationToken) -> Result<()> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.health_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TelemetryError::other("health check failed: shared memory not available"))
        }
    }
}
