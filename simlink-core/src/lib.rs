//! SimLink Core Library
//!
//! This crate provides the telemetry snapshot model, the source trait,
//! the shared error taxonomy and the data validator used by every
//! simulator backend and by the resilience engine.

pub mod derived;
pub mod error;
pub mod model;
pub mod source;
pub mod units;
pub mod validation;

pub use error::{ConnectionError, ErrorKind, TelemetryError, ValidationError};
pub use model::{SimulatorType, TelemetryData};
pub use source::{DataStream, TelemetrySource};
pub use validation::{DataValidator, ValidationConfig};
