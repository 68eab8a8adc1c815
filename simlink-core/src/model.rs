//! Telemetry snapshot model
//!
//! Defines the `TelemetryData` structure every source converts its native
//! data into. The engine treats snapshots as opaque apart from the numeric
//! fields the validator inspects.

use crate::units::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies which simulator a source reads from
///
/// Registries key their entries by this value, so there is at most one
/// source per simulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatorType {
    #[serde(rename = "iracing")]
    IRacing,
    #[serde(rename = "acc")]
    AssettoCorsaCompetizione,
    #[serde(rename = "lmu")]
    LeMansUltimate,
    Demo,
    #[default]
    Unknown,
}

impl SimulatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulatorType::IRacing => "iracing",
            SimulatorType::AssettoCorsaCompetizione => "acc",
            SimulatorType::LeMansUltimate => "lmu",
            SimulatorType::Demo => "demo",
            SimulatorType::Unknown => "unknown",
        }
    }

    /// Parse the short name used in URLs and config files
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "iracing" => Some(SimulatorType::IRacing),
            "acc" | "assetto_corsa_competizione" => Some(SimulatorType::AssettoCorsaCompetizione),
            "lmu" | "le_mans_ultimate" => Some(SimulatorType::LeMansUltimate),
            "demo" => Some(SimulatorType::Demo),
            _ => None,
        }
    }
}

impl fmt::Display for SimulatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete telemetry snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryData {
    /// When this snapshot was captured
    pub timestamp: DateTime<Utc>,

    pub simulator_type: SimulatorType,

    /// Whether the source was connected when the snapshot was taken
    pub is_connected: bool,

    pub session: SessionInfo,

    pub player: PlayerData,

    pub opponents: Vec<OpponentData>,
}

impl Default for TelemetryData {
    fn default() -> Self {
        Self {
            timestamp: DateTime::<Utc>::default(),
            simulator_type: SimulatorType::Unknown,
            is_connected: false,
            session: SessionInfo::default(),
            player: PlayerData::default(),
            opponents: Vec::new(),
        }
    }
}

/// Session-level information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_type: SessionType,
    pub format: RaceFormat,
    pub flag: SessionFlag,

    /// Time left in the session; negative values are invalid
    pub time_remaining: Seconds,

    /// Laps left in the session; negative values are invalid
    pub laps_remaining: i32,

    pub is_timed: bool,
    pub is_lapped: bool,
    pub total_laps: i32,
    pub session_duration: Seconds,

    pub track_name: String,
    pub track_length: Kilometers,
    pub air_temperature: Celsius,
    pub track_temperature: Celsius,
}

/// Session type enumeration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    #[default]
    Practice,
    Qualifying,
    Race,
    Hotlap,
    TimeTrial,
    Other,
}

/// Race format derived from session duration and lap count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaceFormat {
    Timed,
    Lapped,
    Hybrid,
    #[default]
    Unknown,
}

/// Race flag status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionFlag {
    #[default]
    None,
    Green,
    Yellow,
    Blue,
    White,
    Checkered,
    Red,
    Black,
}

/// Telemetry for the player's car
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerData {
    /// Race position, 1-based
    pub position: i32,

    /// Current lap number, 0 before the first crossing
    pub current_lap: i32,

    pub lap_distance_percent: Percent,

    /// Lap times; zero means "no time set"
    pub current_lap_time: Seconds,
    pub last_lap_time: Seconds,
    pub best_lap_time: Seconds,

    pub fuel: FuelData,
    pub tires: TireData,
    pub pit: PitData,

    pub speed: KilometersPerHour,
    pub rpm: Rpm,

    /// Current gear (-1 = reverse, 0 = neutral, 1+ = forward gears)
    pub gear: i32,

    pub throttle: Percent,
    pub brake: Percent,
    pub clutch: Percent,

    /// Steering input (-1.0 = full left, 1.0 = full right)
    pub steering_angle: f32,
}

/// Fuel state and derived range estimates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FuelData {
    pub level: Liters,
    pub capacity: Liters,
    pub percentage: Percent,
    pub usage_per_lap: Liters,
    pub estimated_laps_left: f32,
    pub estimated_time_left: Seconds,
}

/// Per-wheel tire data plus derived classifications
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TireData {
    pub front_left: TireInfo,
    pub front_right: TireInfo,
    pub rear_left: TireInfo,
    pub rear_right: TireInfo,
    pub wear_level: TireWearLevel,
    pub temp_level: TireTempLevel,
}

impl TireData {
    /// Wheels paired with the name used in validation paths
    pub fn all_wheels(&self) -> [(&'static str, &TireInfo); 4] {
        [
            ("FrontLeft", &self.front_left),
            ("FrontRight", &self.front_right),
            ("RearLeft", &self.rear_left),
            ("RearRight", &self.rear_right),
        ]
    }

    pub fn all_wheels_mut(&mut self) -> [&mut TireInfo; 4] {
        [
            &mut self.front_left,
            &mut self.front_right,
            &mut self.rear_left,
            &mut self.rear_right,
        ]
    }
}

/// A single tire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TireInfo {
    pub temperature: Celsius,
    pub pressure: Psi,

    /// Wear, 0 = new, 100 = worn out
    pub wear_percent: Percent,

    pub dirt_level: Percent,
}

/// Tire wear classification from the four-wheel average
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TireWearLevel {
    #[default]
    Fresh,
    Good,
    Worn,
    Critical,
}

/// Tire temperature classification from the four-wheel average
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TireTempLevel {
    #[default]
    Cold,
    Optimal,
    Hot,
    Overheating,
}

/// Pit lane status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PitData {
    pub is_in_pit_lane: bool,
    pub is_in_pit_stall: bool,
    pub pit_stops: u32,
    pub pit_window_open: bool,
    pub last_pit_lap: i32,
}

/// Another car in the session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpponentData {
    pub driver_name: String,
    pub car_name: String,
    pub position: i32,
    pub current_lap: i32,
    pub lap_distance_percent: Percent,
    pub last_lap_time: Seconds,
    pub best_lap_time: Seconds,
    pub gap_to_leader: Seconds,
    pub speed: KilometersPerHour,
    pub is_in_pit: bool,
    pub tires: TireData,
}
