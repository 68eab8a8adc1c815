//! Derived metrics computed by sources from already-validated inputs
//!
//! Pure functions; none of them touch the validator.

use crate::model::{FuelData, RaceFormat, TireData, TireTempLevel, TireWearLevel};
use crate::units::{Percent, Seconds};
use std::time::Duration;

/// Average wear (percent) below which tires count as fresh
pub const TIRE_WEAR_FRESH: f32 = 10.0;
pub const TIRE_WEAR_GOOD: f32 = 40.0;
pub const TIRE_WEAR_WORN: f32 = 70.0;

/// Average temperature (°C) below which tires are cold
pub const TIRE_TEMP_COLD: f32 = 70.0;
pub const TIRE_TEMP_OPTIMAL: f32 = 100.0;
pub const TIRE_TEMP_HOT: f32 = 115.0;

/// Race format from the session's scheduled duration and lap count
pub fn calculate_race_format(session_duration: Seconds, total_laps: i32) -> RaceFormat {
    let timed = session_duration.0.is_finite() && session_duration.0 > 0.0;
    let lapped = total_laps > 0;
    match (timed, lapped) {
        (true, true) => RaceFormat::Hybrid,
        (true, false) => RaceFormat::Timed,
        (false, true) => RaceFormat::Lapped,
        (false, false) => RaceFormat::Unknown,
    }
}

/// Classify tire wear from the four-wheel average
pub fn classify_tire_wear(tires: &TireData) -> TireWearLevel {
    let avg = average(tires.all_wheels().map(|(_, t)| t.wear_percent.0));
    match avg {
        x if x < TIRE_WEAR_FRESH => TireWearLevel::Fresh,
        x if x < TIRE_WEAR_GOOD => TireWearLevel::Good,
        x if x < TIRE_WEAR_WORN => TireWearLevel::Worn,
        _ => TireWearLevel::Critical,
    }
}

/// Classify tire temperature from the four-wheel average
pub fn classify_tire_temp(tires: &TireData) -> TireTempLevel {
    let avg = average(tires.all_wheels().map(|(_, t)| t.temperature.0));
    match avg {
        x if x < TIRE_TEMP_COLD => TireTempLevel::Cold,
        x if x <= TIRE_TEMP_OPTIMAL => TireTempLevel::Optimal,
        x if x <= TIRE_TEMP_HOT => TireTempLevel::Hot,
        _ => TireTempLevel::Overheating,
    }
}

/// Fill in percentage and range estimates from level, capacity and usage
///
/// Laps left is `level / usage_per_lap`; time left is laps left times the
/// average lap time. Without usage data both estimates are zero.
pub fn calculate_fuel_estimates(fuel: &FuelData, avg_lap_time: Duration) -> FuelData {
    let mut out = fuel.clone();

    out.percentage = if fuel.capacity.0 > 0.0 {
        Percent(fuel.level.0 / fuel.capacity.0 * 100.0)
    } else {
        Percent(0.0)
    };

    if fuel.usage_per_lap.0 > 0.0 {
        out.estimated_laps_left = fuel.level.0 / fuel.usage_per_lap.0;
        out.estimated_time_left = Seconds(out.estimated_laps_left * avg_lap_time.as_secs_f32());
    } else {
        out.estimated_laps_left = 0.0;
        out.estimated_time_left = Seconds(0.0);
    }

    out
}

fn average(values: [f32; 4]) -> f32 {
    values.iter().sum::<f32>() / values.len() as f32
}
