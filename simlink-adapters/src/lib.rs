//! Telemetry sources for SimLink
//!
//! Vendor backends live outside this workspace; the demo source here lets
//! the engine run end to end without a simulator.

pub mod demo;

pub use demo::{DemoConfig, DemoSource};
