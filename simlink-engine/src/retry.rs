//! Exponential-backoff retry wrapper

use rand::Rng;
use serde::{Deserialize, Serialize};
use simlink_core::error::{Result, TelemetryError};
use simlink_core::units::duration_ms;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fraction of the computed delay used as the jitter window (±5%)
const JITTER_FRACTION: f64 = 0.05;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; total calls are `max_retries + 1`
    pub max_retries: u32,

    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,

    #[serde(with = "duration_ms")]
    pub max_delay: Duration,

    pub backoff_factor: f64,

    pub jitter: bool,

    /// Message fragments treated as transient for errors that carry no
    /// structured kind
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
            retryable_errors: [
                "connection refused",
                "timeout",
                "temporary failure",
                "network unreachable",
                "shared memory not available",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Stateless retry policy; safe to share between concurrent callers
#[derive(Debug, Clone, Default)]
pub struct RetryHandler {
    config: RetryConfig,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` until it succeeds, fails permanently, exhausts the retry
    /// budget or `cancel` fires
    pub async fn retry<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(TelemetryError::Cancelled);
            }

            let err = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !self.is_retryable(&err) {
                debug!(error = %err, "non-retryable error");
                return Err(err);
            }

            if attempt >= self.config.max_retries {
                warn!(attempts = attempt + 1, error = %err, "retry budget exhausted");
                return Err(TelemetryError::RetryExhausted {
                    attempts: self.config.max_retries,
                    last: Box::new(err),
                });
            }

            let delay = self.calculate_delay(attempt);
            warn!(attempt = attempt + 1, ?delay, error = %err, "retryable failure, backing off");

            tokio::select! {
                _ = cancel.cancelled() => return Err(TelemetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Backoff before retry number `attempt + 1`:
    /// `min(initial_delay * backoff_factor^attempt, max_delay)`, then ±5% jitter
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let max_nanos = self.config.max_delay.as_nanos() as f64;
        let exp = self.config.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
        let mut nanos = (self.config.initial_delay.as_nanos() as f64 * exp).min(max_nanos);

        if self.config.jitter && nanos > 0.0 {
            let spread = nanos * JITTER_FRACTION;
            nanos += rand::thread_rng().gen_range(-spread..=spread);
        }

        if !nanos.is_finite() || nanos <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(nanos.round() as u64)
    }

    /// Structured kind first, message fragments as a fallback
    pub fn is_retryable(&self, err: &TelemetryError) -> bool {
        if err.kind().is_transient() {
            return true;
        }
        let message = err.to_string().to_lowercase();
        self.config
            .retryable_errors
            .iter()
            .any(|fragment| message.contains(&fragment.to_lowercase()))
    }
}
