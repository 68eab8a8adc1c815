//! Type-safe wrappers for physical units
//!
//! Newtype wrappers around f32 keep unit confusion out of the snapshot
//! model. All unit types serialize with 4 decimal places to reduce JSON
//! payload size.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Round f32 to 4 decimal places for compact JSON serialization
fn round4<S: serde::Serializer>(val: &f32, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f32((*val * 10000.0).round() / 10000.0)
}

/// Seconds (lap times, remaining session time)
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Seconds(#[serde(serialize_with = "round4")] pub f32);

impl Seconds {
    pub fn from_duration(d: Duration) -> Self {
        Self(d.as_secs_f32())
    }

    /// Convert to a `Duration`; negative and non-finite values become zero
    pub fn as_duration(&self) -> Duration {
        if self.0.is_finite() && self.0 > 0.0 {
            Duration::from_secs_f32(self.0)
        } else {
            Duration::ZERO
        }
    }
}

/// Celsius
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Celsius(#[serde(serialize_with = "round4")] pub f32);

/// Liters (fuel)
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Liters(#[serde(serialize_with = "round4")] pub f32);

/// Revolutions per minute
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Rpm(#[serde(serialize_with = "round4")] pub f32);

/// Kilometers (track length)
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Kilometers(#[serde(serialize_with = "round4")] pub f32);

/// Kilometers per hour
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct KilometersPerHour(#[serde(serialize_with = "round4")] pub f32);

impl KilometersPerHour {
    pub fn from_meters_per_second(ms: f32) -> Self {
        Self(ms * 3.6)
    }
}

/// Pounds per square inch (tire pressure)
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Psi(#[serde(serialize_with = "round4")] pub f32);

impl Psi {
    pub fn from_kilopascals(kpa: f32) -> Self {
        Self(kpa * 0.145_038)
    }
}

/// Percentage on a 0-100 scale
///
/// Unlike a clamped ratio this keeps the raw value so that out-of-range
/// readings reach the validator intact.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Percent(#[serde(serialize_with = "round4")] pub f32);

impl Percent {
    /// Build from a 0.0-1.0 ratio
    pub fn from_ratio(ratio: f32) -> Self {
        Self(ratio * 100.0)
    }

    pub fn as_ratio(&self) -> f32 {
        self.0 / 100.0
    }
}

/// Serde helper for `Duration` fields expressed as integer milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
