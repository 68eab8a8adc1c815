//! Circuit breaker guarding calls into a single source
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: source assumed down, calls are rejected immediately
//! - HalfOpen: a bounded number of trial calls probe for recovery
//!
//! ```text
//! Closed   -> Open:     failure_count >= failure_threshold
//! Open     -> HalfOpen: recovery_timeout elapsed, on the next execute()
//! HalfOpen -> Closed:   success_count >= success_threshold
//! HalfOpen -> Open:     any failure, or a trial call dropped before it finished
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simlink_core::error::{Result, TelemetryError};
use simlink_core::units::duration_ms;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before opening
    pub failure_threshold: u32,

    /// Cooldown before an Open breaker admits a trial call
    #[serde(with = "duration_ms")]
    pub recovery_timeout: Duration,

    /// Trial calls admitted while HalfOpen
    pub half_open_max_calls: u32,

    /// Successes in HalfOpen needed to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            success_threshold: 2,
        }
    }
}

/// Read-only snapshot of breaker state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitBreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_calls: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitBreakerState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    last_failure: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn transition(&mut self, to: CircuitBreakerState) {
        if self.state == to {
            return;
        }
        match to {
            CircuitBreakerState::Open => warn!(from = ?self.state, "circuit breaker opened"),
            CircuitBreakerState::HalfOpen => info!("circuit breaker half-open, admitting trial calls"),
            CircuitBreakerState::Closed => info!("circuit breaker closed"),
        }
        self.state = to;
        self.failure_count = 0;
        self.success_count = 0;
        self.half_open_calls = 0;
    }

    fn stamp_failure(&mut self) {
        self.last_failure = Some(Instant::now());
        self.last_failure_time = Some(Utc::now());
    }
}

/// Failure-guard state machine; all transitions happen under one mutex
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_calls: 0,
                last_failure: None,
                last_failure_time: None,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call would be admitted right now
    ///
    /// An Open breaker past its cooldown reports `true` but stays Open;
    /// the next [`execute`](Self::execute) performs the HalfOpen transition.
    pub fn can_execute(&self) -> bool {
        let inner = self.lock();
        self.admits(&inner)
    }

    /// Run `op` if the breaker admits it and record the outcome
    ///
    /// When the breaker is open, `op` is never invoked and
    /// [`TelemetryError::CircuitOpen`] is returned.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let trial = {
            let mut inner = self.lock();
            if !self.admits(&inner) {
                debug!("circuit breaker rejecting call");
                return Err(TelemetryError::CircuitOpen);
            }
            if inner.state == CircuitBreakerState::Open {
                inner.transition(CircuitBreakerState::HalfOpen);
            }
            if inner.state == CircuitBreakerState::HalfOpen {
                inner.half_open_calls += 1;
            }
            inner.state == CircuitBreakerState::HalfOpen
        };

        let mut guard = TrialGuard { breaker: self, armed: trial };
        let result = op().await;
        guard.armed = false;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        result
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitBreakerState::Closed => inner.failure_count = 0,
            CircuitBreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.transition(CircuitBreakerState::Closed);
                }
            }
            CircuitBreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.stamp_failure();
        match inner.state {
            CircuitBreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.transition(CircuitBreakerState::Open);
                }
            }
            CircuitBreakerState::HalfOpen => inner.transition(CircuitBreakerState::Open),
            CircuitBreakerState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.lock().state
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            half_open_calls: inner.half_open_calls,
            last_failure_time: inner.last_failure_time,
        }
    }

    /// Force the breaker back to Closed with all counters cleared
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.transition(CircuitBreakerState::Closed);
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.last_failure_time = None;
    }

    fn admits(&self, inner: &BreakerState) -> bool {
        match inner.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => inner
                .last_failure
                .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout),
            CircuitBreakerState::HalfOpen => inner.half_open_calls < self.config.half_open_max_calls,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reopens a HalfOpen breaker whose trial call was dropped mid-flight,
/// so the slot it took is not leaked and the cooldown starts over
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.breaker.lock();
        if inner.state == CircuitBreakerState::HalfOpen {
            debug!("trial call abandoned before completion");
            inner.stamp_failure();
            inner.transition(CircuitBreakerState::Open);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
