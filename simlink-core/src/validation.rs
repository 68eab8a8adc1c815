//! Range validation and sanitization for telemetry snapshots
//!
//! Validation walks every bounded numeric field and accumulates one
//! [`ValidationError`] per violation; it never stops at the first bad
//! field. Sanitization returns a corrected copy with every bounded field
//! clamped into range, so re-validating a sanitized snapshot yields no
//! errors for the fields it covers.
//!
//! Two fields are deliberately not fully covered by sanitization: an
//! `Unknown` simulator type cannot be repaired, and position/lap counters
//! are only floored at their minimum, never capped.

use crate::error::{Result, TelemetryError, ValidationError};
use crate::model::*;
use crate::units::*;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// How far in the future a timestamp may be before it is rejected
const MAX_FUTURE_SKEW_SECS: i64 = 60;

/// Inclusive bounds for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
}

impl<T> Bounds<T> {
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl<T: PartialOrd + Copy> Bounds<T> {
    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Per-metric bounds used by [`DataValidator`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// km/h
    pub speed: Bounds<f32>,
    pub rpm: Bounds<f32>,
    /// Liters
    pub fuel: Bounds<f32>,
    /// °C
    pub tire_temperature: Bounds<f32>,
    /// °C
    pub air_temperature: Bounds<f32>,
    /// °C
    pub track_temperature: Bounds<f32>,
    /// PSI
    pub tire_pressure: Bounds<f32>,
    /// Completed lap time, seconds
    pub lap_time: Bounds<f32>,
    pub position: Bounds<i32>,
    pub percentage: Bounds<f32>,
    /// Kilometers
    pub track_length: Bounds<f32>,
    pub gear: Bounds<i32>,
    pub steering: Bounds<f32>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            speed: Bounds::new(0.0, 500.0),
            rpm: Bounds::new(0.0, 15000.0),
            fuel: Bounds::new(0.0, 200.0),
            tire_temperature: Bounds::new(0.0, 150.0),
            air_temperature: Bounds::new(-20.0, 60.0),
            track_temperature: Bounds::new(-20.0, 80.0),
            tire_pressure: Bounds::new(10.0, 50.0),
            lap_time: Bounds::new(30.0, 900.0),
            position: Bounds::new(1, 100),
            percentage: Bounds::new(0.0, 100.0),
            track_length: Bounds::new(0.5, 25.0),
            gear: Bounds::new(-1, 10),
            steering: Bounds::new(-1.0, 1.0),
        }
    }
}

impl ValidationConfig {
    /// Reject bound pairs that are inverted or not finite
    pub fn check(&self) -> Result<()> {
        let floats = [
            ("speed", self.speed),
            ("rpm", self.rpm),
            ("fuel", self.fuel),
            ("tire_temperature", self.tire_temperature),
            ("air_temperature", self.air_temperature),
            ("track_temperature", self.track_temperature),
            ("tire_pressure", self.tire_pressure),
            ("lap_time", self.lap_time),
            ("percentage", self.percentage),
            ("track_length", self.track_length),
            ("steering", self.steering),
        ];
        for (name, b) in floats {
            if !b.min.is_finite() || !b.max.is_finite() || b.min > b.max {
                return Err(invalid_bounds(name, b));
            }
        }
        for (name, b) in [("position", self.position), ("gear", self.gear)] {
            if b.min > b.max {
                return Err(invalid_bounds(name, b));
            }
        }
        Ok(())
    }
}

fn invalid_bounds<T: Display>(name: &str, b: Bounds<T>) -> TelemetryError {
    TelemetryError::InvalidConfig(format!("validation bounds for {name} are invalid: [{}, {}]", b.min, b.max))
}

/// Stateless range checker and sanitizer for [`TelemetryData`]
#[derive(Debug, Clone, Default)]
pub struct DataValidator {
    config: ValidationConfig,
}

impl DataValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate every inspected field, returning all violations found
    pub fn validate_telemetry_data(&self, data: &TelemetryData) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        errors.extend(self.validate_timestamp(data.timestamp));
        if data.simulator_type == SimulatorType::Unknown {
            errors.push(ValidationError::new(
                "SimulatorType",
                data.simulator_type,
                "must identify a known simulator",
            ));
        }

        self.validate_session(&data.session, &mut errors);
        self.validate_player(&data.player, &mut errors);

        for (i, opponent) in data.opponents.iter().enumerate() {
            self.validate_opponent(&format!("Opponents[{i}]"), opponent, &mut errors);
        }

        errors
    }

    pub fn validate_timestamp(&self, timestamp: DateTime<Utc>) -> Option<ValidationError> {
        if timestamp == DateTime::<Utc>::default() {
            return Some(ValidationError::new("Timestamp", timestamp, "timestamp is not set"));
        }
        if timestamp > Utc::now() + ChronoDuration::seconds(MAX_FUTURE_SKEW_SECS) {
            return Some(ValidationError::new(
                "Timestamp",
                timestamp,
                format!("must not be more than {MAX_FUTURE_SKEW_SECS}s in the future"),
            ));
        }
        None
    }

    /// Check a float against inclusive bounds, rejecting NaN and infinities
    pub fn validate_range(&self, field: &str, value: f32, bounds: Bounds<f32>) -> Option<ValidationError> {
        if !value.is_finite() {
            return Some(ValidationError::new(field, value, "must be a finite number"));
        }
        if !bounds.contains(value) {
            return Some(out_of_range(field, value, bounds));
        }
        None
    }

    pub fn validate_speed(&self, field: &str, speed: KilometersPerHour) -> Option<ValidationError> {
        self.validate_range(field, speed.0, self.config.speed)
    }

    pub fn validate_rpm(&self, field: &str, rpm: Rpm) -> Option<ValidationError> {
        self.validate_range(field, rpm.0, self.config.rpm)
    }

    pub fn validate_percentage(&self, field: &str, value: Percent) -> Option<ValidationError> {
        self.validate_range(field, value.0, self.config.percentage)
    }

    pub fn validate_position(&self, field: &str, position: i32) -> Option<ValidationError> {
        if !self.config.position.contains(position) {
            return Some(out_of_range(field, position, self.config.position));
        }
        None
    }

    pub fn validate_gear(&self, field: &str, gear: i32) -> Option<ValidationError> {
        if !self.config.gear.contains(gear) {
            return Some(out_of_range(field, gear, self.config.gear));
        }
        None
    }

    /// Completed lap times; zero means no time has been set
    pub fn validate_lap_time(&self, field: &str, time: Seconds) -> Option<ValidationError> {
        if time.0 == 0.0 {
            return None;
        }
        self.validate_range(field, time.0, self.config.lap_time)
    }

    pub fn validate_session(&self, session: &SessionInfo, errors: &mut Vec<ValidationError>) {
        let c = &self.config;
        errors.extend(self.validate_range("Session.TrackLength", session.track_length.0, c.track_length));
        errors.extend(self.validate_range("Session.AirTemperature", session.air_temperature.0, c.air_temperature));
        errors.extend(self.validate_range(
            "Session.TrackTemperature",
            session.track_temperature.0,
            c.track_temperature,
        ));
        errors.extend(non_negative("Session.TimeRemaining", session.time_remaining.0));
        errors.extend(non_negative("Session.SessionDuration", session.session_duration.0));
        errors.extend(non_negative_count("Session.LapsRemaining", session.laps_remaining));
        errors.extend(non_negative_count("Session.TotalLaps", session.total_laps));
    }

    pub fn validate_player(&self, player: &PlayerData, errors: &mut Vec<ValidationError>) {
        let c = &self.config;
        errors.extend(self.validate_position("Player.Position", player.position));
        errors.extend(non_negative_count("Player.CurrentLap", player.current_lap));
        errors.extend(self.validate_percentage("Player.LapDistancePercent", player.lap_distance_percent));
        errors.extend(self.validate_range(
            "Player.CurrentLapTime",
            player.current_lap_time.0,
            Bounds::new(0.0, c.lap_time.max),
        ));
        errors.extend(self.validate_lap_time("Player.LastLapTime", player.last_lap_time));
        errors.extend(self.validate_lap_time("Player.BestLapTime", player.best_lap_time));
        errors.extend(self.validate_speed("Player.Speed", player.speed));
        errors.extend(self.validate_rpm("Player.Rpm", player.rpm));
        errors.extend(self.validate_gear("Player.Gear", player.gear));
        errors.extend(self.validate_percentage("Player.Throttle", player.throttle));
        errors.extend(self.validate_percentage("Player.Brake", player.brake));
        errors.extend(self.validate_percentage("Player.Clutch", player.clutch));
        errors.extend(self.validate_range("Player.SteeringAngle", player.steering_angle, c.steering));

        errors.extend(self.validate_fuel_data("Player.Fuel", &player.fuel));
        errors.extend(self.validate_tire_data("Player.Tires", &player.tires));
    }

    pub fn validate_fuel_data(&self, prefix: &str, fuel: &FuelData) -> Vec<ValidationError> {
        let c = &self.config;
        let mut errors = Vec::new();

        errors.extend(self.validate_range(&format!("{prefix}.Level"), fuel.level.0, c.fuel));
        errors.extend(self.validate_range(&format!("{prefix}.Capacity"), fuel.capacity.0, c.fuel));
        errors.extend(self.validate_percentage(&format!("{prefix}.Percentage"), fuel.percentage));

        if fuel.capacity.0 > 0.0 && fuel.level.0 > fuel.capacity.0 {
            errors.push(ValidationError::new(
                format!("{prefix}.Level"),
                fuel.level.0,
                format!("must not exceed capacity {}", fuel.capacity.0),
            ));
        }

        errors.extend(non_negative(&format!("{prefix}.UsagePerLap"), fuel.usage_per_lap.0));
        errors.extend(non_negative(&format!("{prefix}.EstimatedLapsLeft"), fuel.estimated_laps_left));
        errors.extend(non_negative(&format!("{prefix}.EstimatedTimeLeft"), fuel.estimated_time_left.0));
        errors
    }

    /// Validate all four wheels; wheels with no reported data are skipped
    pub fn validate_tire_data(&self, prefix: &str, tires: &TireData) -> Vec<ValidationError> {
        let c = &self.config;
        let mut errors = Vec::new();

        for (wheel, tire) in tires.all_wheels() {
            if !is_reported(tire) {
                continue;
            }
            let path = format!("{prefix}.{wheel}");
            errors.extend(self.validate_range(&format!("{path}.Temperature"), tire.temperature.0, c.tire_temperature));
            errors.extend(self.validate_range(&format!("{path}.Pressure"), tire.pressure.0, c.tire_pressure));
            errors.extend(self.validate_percentage(&format!("{path}.Wear"), tire.wear_percent));
            errors.extend(self.validate_percentage(&format!("{path}.DirtLevel"), tire.dirt_level));
        }
        errors
    }

    fn validate_opponent(&self, prefix: &str, opponent: &OpponentData, errors: &mut Vec<ValidationError>) {
        errors.extend(self.validate_position(&format!("{prefix}.Position"), opponent.position));
        errors.extend(non_negative_count(&format!("{prefix}.CurrentLap"), opponent.current_lap));
        errors.extend(self.validate_percentage(
            &format!("{prefix}.LapDistancePercent"),
            opponent.lap_distance_percent,
        ));
        errors.extend(self.validate_lap_time(&format!("{prefix}.LastLapTime"), opponent.last_lap_time));
        errors.extend(self.validate_lap_time(&format!("{prefix}.BestLapTime"), opponent.best_lap_time));
        errors.extend(non_negative(&format!("{prefix}.GapToLeader"), opponent.gap_to_leader.0));
        errors.extend(self.validate_speed(&format!("{prefix}.Speed"), opponent.speed));
        errors.extend(self.validate_tire_data(&format!("{prefix}.Tires"), &opponent.tires));
    }

    // =========================================================================
    // Sanitization
    // =========================================================================

    /// Return a copy with every bounded field forced into range
    pub fn sanitize_telemetry_data(&self, data: &TelemetryData) -> TelemetryData {
        let mut out = data.clone();

        if self.validate_timestamp(out.timestamp).is_some() {
            out.timestamp = Utc::now();
        }

        self.sanitize_session(&mut out.session);
        self.sanitize_player(&mut out.player);
        for opponent in &mut out.opponents {
            self.sanitize_opponent(opponent);
        }

        out
    }

    /// Clamp into bounds: NaN and -Inf become `min`, +Inf becomes `max`
    pub fn sanitize_value(&self, value: f32, bounds: Bounds<f32>) -> f32 {
        clamp_f32(value, bounds)
    }

    pub fn sanitize_speed(&self, speed: KilometersPerHour) -> KilometersPerHour {
        KilometersPerHour(clamp_f32(speed.0, self.config.speed))
    }

    pub fn sanitize_rpm(&self, rpm: Rpm) -> Rpm {
        Rpm(clamp_f32(rpm.0, self.config.rpm))
    }

    pub fn sanitize_percentage(&self, value: Percent) -> Percent {
        Percent(clamp_f32(value.0, self.config.percentage))
    }

    /// Floor at the minimum position; positions are never capped
    pub fn sanitize_position(&self, position: i32) -> i32 {
        position.max(self.config.position.min)
    }

    pub fn sanitize_lap_time(&self, time: Seconds) -> Seconds {
        if time.0 == 0.0 {
            return time;
        }
        Seconds(clamp_f32(time.0, self.config.lap_time))
    }

    pub fn sanitize_fuel_data(&self, fuel: &mut FuelData) {
        let c = &self.config;
        fuel.capacity = Liters(clamp_f32(fuel.capacity.0, c.fuel));
        fuel.level = Liters(clamp_f32(fuel.level.0, c.fuel));
        if fuel.capacity.0 > 0.0 && fuel.level.0 > fuel.capacity.0 {
            fuel.level = fuel.capacity;
        }
        fuel.percentage = self.sanitize_percentage(fuel.percentage);
        fuel.usage_per_lap = Liters(floor_f32(fuel.usage_per_lap.0, 0.0));
        fuel.estimated_laps_left = floor_f32(fuel.estimated_laps_left, 0.0);
        fuel.estimated_time_left = Seconds(floor_f32(fuel.estimated_time_left.0, 0.0));
    }

    pub fn sanitize_tire_data(&self, tires: &mut TireData) {
        let c = &self.config;
        for tire in tires.all_wheels_mut() {
            if !is_reported(tire) {
                continue;
            }
            tire.temperature = Celsius(clamp_f32(tire.temperature.0, c.tire_temperature));
            tire.pressure = Psi(clamp_f32(tire.pressure.0, c.tire_pressure));
            tire.wear_percent = Percent(clamp_f32(tire.wear_percent.0, c.percentage));
            tire.dirt_level = Percent(clamp_f32(tire.dirt_level.0, c.percentage));
        }
    }

    fn sanitize_session(&self, session: &mut SessionInfo) {
        let c = &self.config;
        session.track_length = Kilometers(clamp_f32(session.track_length.0, c.track_length));
        session.air_temperature = Celsius(clamp_f32(session.air_temperature.0, c.air_temperature));
        session.track_temperature = Celsius(clamp_f32(session.track_temperature.0, c.track_temperature));
        session.time_remaining = Seconds(floor_f32(session.time_remaining.0, 0.0));
        session.session_duration = Seconds(floor_f32(session.session_duration.0, 0.0));
        session.laps_remaining = session.laps_remaining.max(0);
        session.total_laps = session.total_laps.max(0);
    }

    fn sanitize_player(&self, player: &mut PlayerData) {
        let c = &self.config;
        player.position = self.sanitize_position(player.position);
        player.current_lap = player.current_lap.max(0);
        player.lap_distance_percent = self.sanitize_percentage(player.lap_distance_percent);
        player.current_lap_time = Seconds(clamp_f32(player.current_lap_time.0, Bounds::new(0.0, c.lap_time.max)));
        player.last_lap_time = self.sanitize_lap_time(player.last_lap_time);
        player.best_lap_time = self.sanitize_lap_time(player.best_lap_time);
        player.speed = self.sanitize_speed(player.speed);
        player.rpm = self.sanitize_rpm(player.rpm);
        player.gear = player.gear.max(c.gear.min).min(c.gear.max);
        player.throttle = self.sanitize_percentage(player.throttle);
        player.brake = self.sanitize_percentage(player.brake);
        player.clutch = self.sanitize_percentage(player.clutch);
        player.steering_angle = clamp_f32(player.steering_angle, c.steering);

        self.sanitize_fuel_data(&mut player.fuel);
        self.sanitize_tire_data(&mut player.tires);
    }

    fn sanitize_opponent(&self, opponent: &mut OpponentData) {
        opponent.position = self.sanitize_position(opponent.position);
        opponent.current_lap = opponent.current_lap.max(0);
        opponent.lap_distance_percent = self.sanitize_percentage(opponent.lap_distance_percent);
        opponent.last_lap_time = self.sanitize_lap_time(opponent.last_lap_time);
        opponent.best_lap_time = self.sanitize_lap_time(opponent.best_lap_time);
        opponent.gap_to_leader = Seconds(floor_f32(opponent.gap_to_leader.0, 0.0));
        opponent.speed = self.sanitize_speed(opponent.speed);
        self.sanitize_tire_data(&mut opponent.tires);
    }
}

/// A wheel with every field at zero carries no data (e.g. opponents in
/// simulators that do not broadcast tire state)
fn is_reported(tire: &TireInfo) -> bool {
    tire.temperature.0 != 0.0 || tire.pressure.0 != 0.0 || tire.wear_percent.0 != 0.0 || tire.dirt_level.0 != 0.0
}

fn out_of_range<T: Display>(field: &str, value: T, bounds: Bounds<T>) -> ValidationError {
    ValidationError::new(
        field,
        value,
        format!("must be between {} and {}", bounds.min, bounds.max),
    )
}

fn non_negative(field: &str, value: f32) -> Option<ValidationError> {
    if !value.is_finite() {
        return Some(ValidationError::new(field, value, "must be a finite number"));
    }
    if value < 0.0 {
        return Some(ValidationError::new(field, value, "must not be negative"));
    }
    None
}

fn non_negative_count(field: &str, value: i32) -> Option<ValidationError> {
    (value < 0).then(|| ValidationError::new(field, value, "must not be negative"))
}

fn clamp_f32(value: f32, bounds: Bounds<f32>) -> f32 {
    if value.is_nan() {
        return bounds.min;
    }
    // min/max rather than clamp: a misconfigured pair must not panic
    value.max(bounds.min).min(bounds.max)
}

/// Floor at `min`; any non-finite value collapses to `min`
fn floor_f32(value: f32, min: f32) -> f32 {
    if !value.is_finite() {
        return min;
    }
    value.max(min)
}
