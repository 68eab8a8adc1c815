//! Error taxonomy shared by sources and the engine

use crate::model::SimulatorType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Structured classification carried on every error value
///
/// The retry layer reads this before falling back to message matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, IPC or shared-memory hiccup; worth retrying
    TransientNetwork,
    /// The source answered but the data was unusable; worth retrying
    TransientData,
    /// Retrying will not help
    Permanent,
}

impl ErrorKind {
    pub fn is_transient(&self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }
}

/// A source failed to perform an acquisition operation
#[derive(Debug, Error)]
#[error("{source_id} {operation} failed: {cause}")]
pub struct ConnectionError {
    pub source_id: SimulatorType,
    pub operation: String,
    pub cause: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
}

impl ConnectionError {
    pub fn new(
        source_id: SimulatorType,
        operation: impl Into<String>,
        cause: impl fmt::Display,
        retryable: bool,
    ) -> Self {
        let kind = if retryable {
            ErrorKind::TransientNetwork
        } else {
            ErrorKind::Permanent
        };
        Self::with_kind(source_id, operation, cause, kind)
    }

    pub fn with_kind(
        source_id: SimulatorType,
        operation: impl Into<String>,
        cause: impl fmt::Display,
        kind: ErrorKind,
    ) -> Self {
        Self {
            source_id,
            operation: operation.into(),
            cause: cause.to_string(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind.is_transient()
    }
}

/// A single field failed validation
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("validation error for field '{field}': value {value} is invalid: {message}")]
pub struct ValidationError {
    /// Dotted path, e.g. `Opponents[2].Tires.FrontLeft.Pressure`
    pub field: String,
    pub value: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, value: impl fmt::Display, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.to_string(),
            message: message.into(),
        }
    }
}

/// Main error type for sources and the engine
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("telemetry validation failed with {} error(s): {}", .0.len(), summarize(.0))]
    Validation(Vec<ValidationError>),

    #[error("circuit breaker is open, rejecting call")]
    CircuitOpen,

    #[error("max retries ({attempts}) exceeded: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<TelemetryError>,
    },

    #[error("connector for simulator {0} not registered")]
    NotRegistered(SimulatorType),

    #[error("operation cancelled")]
    Cancelled,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("simulator {0} is not connected")]
    NotConnected(SimulatorType),

    #[error("polling system is already running")]
    AlreadyRunning,

    #[error("no active simulator set")]
    NoActiveSource,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unstructured failure from a less structured source
    #[error("{0}")]
    Other(String),
}

impl TelemetryError {
    /// Structured classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TelemetryError::Connection(e) => e.kind,
            TelemetryError::Validation(_) => ErrorKind::TransientData,
            TelemetryError::Timeout(_) => ErrorKind::TransientNetwork,
            _ => ErrorKind::Permanent,
        }
    }

    pub fn other(msg: impl fmt::Display) -> Self {
        TelemetryError::Other(msg.to_string())
    }
}

fn summarize(errors: &[ValidationError]) -> String {
    match errors.first() {
        Some(first) if errors.len() > 1 => format!("{} (and {} more)", first, errors.len() - 1),
        Some(first) => first.to_string(),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
