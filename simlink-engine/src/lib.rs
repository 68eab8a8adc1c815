//! SimLink resilience and scheduling engine
//!
//! Sits between telemetry sources and real-time consumers:
//! - [`breaker::CircuitBreaker`] stops calling a failing source for a cooldown
//! - [`retry::RetryHandler`] retries transient failures with backoff
//! - [`health::ConnectionHealthMonitor`] combines both with validation per source
//! - [`polling::DataPollingSystem`] polls the active source at three cadences

pub mod breaker;
pub mod health;
pub mod periodic;
pub mod polling;
pub mod retry;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerState};
pub use health::{ConnectionHealthMonitor, ConnectionState, HealthMonitorConfig};
pub use polling::{DataChannels, DataPollingSystem, LatestData, PollingConfig, Priority};
pub use retry::{RetryConfig, RetryHandler};
