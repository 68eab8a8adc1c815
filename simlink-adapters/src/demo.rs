//! Demo source that generates synthetic telemetry for testing
//!
//! Simulates laps around a circuit with straights, braking zones, corners,
//! and acceleration phases, plus two opponents. Optional fault injection
//! makes fetches fail or return corrupted snapshots so the resilience
//! engine has something to chew on without an actual simulator.
//!
//! Corrupted snapshots are repaired here rather than rejected: the source
//! validates what it produced, logs the problems and hands back the
//! sanitized copy.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use simlink_core::derived::{calculate_fuel_estimates, calculate_race_format, classify_tire_temp, classify_tire_wear};
use simlink_core::error::{Result, TelemetryError};
use simlink_core::model::*;
use simlink_core::units::*;
use simlink_core::validation::{DataValidator, ValidationConfig};
use simlink_core::{ConnectionError, DataStream, TelemetrySource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const TRACK_NAME: &str = "Demo Circuit";
const TRACK_LENGTH_KM: f32 = 4.5;
const SESSION_DURATION_SECS: f32 = 1800.0;
const SESSION_LAPS: i32 = 30;
const FUEL_CAPACITY: f32 = 60.0;
/// Fraction of the tank burned per second of running
const FUEL_BURN_RATE: f32 = 0.00015;
/// Steering lock in radians mapped to full input
const STEERING_LOCK: f32 = 0.5;
const STREAM_BUFFER: usize = 16;

// =============================================================================
// Track definition: a sequence of segments that form a lap
// =============================================================================

#[derive(Clone, Copy)]
enum SegmentKind {
    Straight,
    Braking,
    Corner,
    Accel,
}

#[derive(Clone, Copy)]
struct TrackSegment {
    kind: SegmentKind,
    duration: f32,     // seconds to traverse at representative pace
    target_speed: f32, // m/s at end of segment
    steering: f32,     // peak steering angle in radians (signed: + = right)
    lateral_g: f32,
}

fn segment(kind: SegmentKind, duration: f32, target_speed: f32, steering: f32, lateral_g: f32) -> TrackSegment {
    TrackSegment {
        kind,
        duration,
        target_speed,
        steering,
        lateral_g,
    }
}

/// A simple circuit: ~85s lap, mix of corners and straights
fn demo_track() -> Vec<TrackSegment> {
    use SegmentKind::*;
    vec![
        segment(Straight, 8.0, 75.0, 0.0, 0.0),
        // T1: heavy braking into slow right-hander
        segment(Braking, 3.0, 28.0, 0.02, 0.1),
        segment(Corner, 4.0, 25.0, 0.35, 1.8),
        segment(Accel, 3.5, 55.0, 0.1, 0.4),
        segment(Straight, 4.0, 62.0, 0.0, 0.0),
        // T2: fast left-hander
        segment(Braking, 2.0, 45.0, -0.02, -0.1),
        segment(Corner, 3.5, 42.0, -0.22, -1.5),
        segment(Accel, 3.0, 58.0, -0.05, -0.3),
        // Back straight
        segment(Straight, 10.0, 80.0, 0.0, 0.0),
        // T3: chicane
        segment(Braking, 2.5, 35.0, 0.05, 0.2),
        segment(Corner, 2.0, 32.0, 0.30, 1.6),
        segment(Corner, 2.0, 30.0, -0.32, -1.7),
        segment(Accel, 3.0, 50.0, -0.05, -0.2),
        segment(Straight, 6.0, 68.0, 0.0, 0.0),
        // T4: long sweeping right
        segment(Braking, 1.5, 52.0, 0.03, 0.1),
        segment(Corner, 5.0, 50.0, 0.18, 1.3),
        segment(Accel, 3.0, 60.0, 0.05, 0.3),
        // T5: hairpin left
        segment(Braking, 3.5, 22.0, -0.03, -0.1),
        segment(Corner, 4.5, 20.0, -0.42, -1.2),
        segment(Accel, 4.0, 55.0, -0.1, -0.3),
        segment(Straight, 6.0, 72.0, 0.0, 0.0),
    ]
}

// =============================================================================
// Interpolation state, derived from track position
// =============================================================================

struct LapState {
    speed: f32,
    throttle: f32,
    brake: f32,
    steering: f32,
    lateral_g: f32,
    gear: i32,
    rpm: f32,
}

fn compute_lap_state(track: &[TrackSegment], lap_time: f32) -> LapState {
    let lap_duration: f32 = track.iter().map(|s| s.duration).sum();
    let t = lap_time % lap_duration;

    let mut elapsed = 0.0_f32;
    let mut seg_idx = track.len() - 1;
    for (i, seg) in track.iter().enumerate() {
        if elapsed + seg.duration > t {
            seg_idx = i;
            break;
        }
        elapsed += seg.duration;
    }

    let seg = track[seg_idx];
    let seg_t = ((t - elapsed) / seg.duration).clamp(0.0, 1.0);
    let prev_target_speed = track[(seg_idx + track.len() - 1) % track.len()].target_speed;

    let smooth_t = smoothstep(seg_t);
    let speed = lerp(prev_target_speed, seg.target_speed, smooth_t);

    let (throttle, brake) = match seg.kind {
        SegmentKind::Straight => (0.95 + 0.05 * (1.0 - seg_t), 0.0),
        // Starts heavy, eases off
        SegmentKind::Braking => (0.0, (1.0 - smooth_t * 0.3).clamp(0.0, 1.0)),
        SegmentKind::Corner => (0.2 + 0.3 * seg_t, 0.0),
        SegmentKind::Accel => (0.5 + 0.5 * smooth_t, 0.0),
    };

    // Ramp in during the first half, out during the second
    let envelope = if seg_t < 0.5 {
        smoothstep(seg_t * 2.0)
    } else {
        smoothstep((1.0 - seg_t) * 2.0)
    };

    let gear = speed_to_gear(speed);
    LapState {
        speed,
        throttle,
        brake,
        steering: seg.steering * envelope,
        lateral_g: seg.lateral_g * envelope,
        gear,
        rpm: speed_to_rpm(speed, gear),
    }
}

fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn speed_to_gear(speed_ms: f32) -> i32 {
    match speed_ms * 3.6 {
        x if x < 40.0 => 1,
        x if x < 80.0 => 2,
        x if x < 120.0 => 3,
        x if x < 170.0 => 4,
        x if x < 230.0 => 5,
        _ => 6,
    }
}

fn speed_to_rpm(speed_ms: f32, gear: i32) -> f32 {
    let ratio = match gear {
        1 => 130.0,
        2 => 85.0,
        3 => 60.0,
        4 => 45.0,
        5 => 36.0,
        _ => 30.0,
    };
    (speed_ms * ratio + 1200.0).clamp(1200.0, 8000.0)
}

/// Simple deterministic noise from a seed
fn noise(seed: f32) -> f32 {
    let x = (seed * 12.9898 + 78.233).sin() * 43_758.547;
    x - x.floor()
}

/// Small jitter centered around 0
fn jitter(seed: f32, amplitude: f32) -> f32 {
    (noise(seed) - 0.5) * 2.0 * amplitude
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Probability that a fetch fails with a transient connection error
    pub failure_rate: f64,

    /// Probability that a fetch produces an out-of-range snapshot, which
    /// the source repairs before returning it
    pub corruption_rate: f64,

    pub validation: ValidationConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            corruption_rate: 0.0,
            validation: ValidationConfig::default(),
        }
    }
}

// =============================================================================
// DemoSource
// =============================================================================

struct Simulation {
    start_time: Instant,
    frame_count: u64,
    laps_completed: u32,
    best_lap: f32,
    last_lap: f32,
}

impl Simulation {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frame_count: 0,
            laps_completed: 0,
            best_lap: 0.0,
            last_lap: 0.0,
        }
    }
}

struct DemoInner {
    config: DemoConfig,
    track: Vec<TrackSegment>,
    lap_duration: f32,
    validator: DataValidator,
    connected: AtomicBool,
    sim: Mutex<Simulation>,
}

struct StreamHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Synthetic source that drives a car around [`TRACK_NAME`]
pub struct DemoSource {
    inner: Arc<DemoInner>,
    stream: Mutex<Option<StreamHandle>>,
}

impl DemoSource {
    pub fn new() -> Self {
        Self::with_config(DemoConfig::default())
    }

    pub fn with_config(config: DemoConfig) -> Self {
        let track = demo_track();
        let lap_duration = track.iter().map(|s| s.duration).sum();
        let validator = DataValidator::new(config.validation.clone());
        Self {
            inner: Arc::new(DemoInner {
                config,
                track,
                lap_duration,
                validator,
                connected: AtomicBool::new(false),
                sim: Mutex::new(Simulation::new()),
            }),
            stream: Mutex::new(None),
        }
    }

    /// Fail this fraction of fetches with a retryable connection error
    pub fn with_failure_rate(self, rate: f64) -> Self {
        let mut config = self.inner.config.clone();
        config.failure_rate = rate;
        Self::with_config(config)
    }

    /// Corrupt this fraction of snapshots before validation
    pub fn with_corruption_rate(self, rate: f64) -> Self {
        let mut config = self.inner.config.clone();
        config.corruption_rate = rate;
        Self::with_config(config)
    }

    pub fn config(&self) -> &DemoConfig {
        &self.inner.config
    }

    pub fn lap_duration(&self) -> Duration {
        Duration::from_secs_f32(self.inner.lap_duration)
    }

    fn lock_stream(&self) -> MutexGuard<'_, Option<StreamHandle>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DemoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoInner {
    fn ensure_connected(&self, operation: &str) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectionError::new(SimulatorType::Demo, operation, "demo source is not connected", false).into())
        }
    }

    /// One fetch: fault injection, generation, then validate-and-repair
    fn fetch(&self) -> Result<TelemetryData> {
        self.ensure_connected("telemetry_data")?;

        let (fail, corrupt) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_bool(probability(self.config.failure_rate)),
                rng.gen_bool(probability(self.config.corruption_rate)),
            )
        };
        if fail {
            return Err(ConnectionError::new(
                SimulatorType::Demo,
                "telemetry_data",
                "temporary failure: injected fault",
                true,
            )
            .into());
        }

        let mut data = self.generate();
        if corrupt {
            corrupt_snapshot(&mut data);
        }

        let errors = self.validator.validate_telemetry_data(&data);
        if errors.is_empty() {
            return Ok(data);
        }
        warn!(
            count = errors.len(),
            first = %errors[0],
            "demo snapshot failed validation, sanitizing"
        );
        Ok(self.validator.sanitize_telemetry_data(&data))
    }

    fn generate(&self) -> TelemetryData {
        let mut sim = self.sim.lock().unwrap_or_else(PoisonError::into_inner);

        let elapsed = sim.start_time.elapsed().as_secs_f32();
        sim.frame_count += 1;
        let n = sim.frame_count as f32; // noise seed

        let lap_time = elapsed % self.lap_duration;
        let current_lap = (elapsed / self.lap_duration) as u32 + 1;
        if current_lap > sim.laps_completed + 1 {
            sim.laps_completed = current_lap - 1;
            sim.last_lap = self.lap_duration + jitter(n, 1.5);
            if sim.best_lap == 0.0 || sim.last_lap < sim.best_lap {
                sim.best_lap = sim.last_lap;
            }
        }

        let state = compute_lap_state(&self.track, lap_time);
        let speed = (state.speed + jitter(n, 0.3)).max(0.0);
        let rpm = (state.rpm + jitter(n * 1.1, 30.0)).clamp(1200.0, 8000.0);
        let throttle = (state.throttle + jitter(n * 1.2, 0.02)).clamp(0.0, 1.0);
        let brake = (state.brake + jitter(n * 1.3, 0.02)).clamp(0.0, 1.0);
        let steering = ((state.steering + jitter(n * 1.4, 0.005)) / STEERING_LOCK).clamp(-1.0, 1.0);
        let lat_g = state.lateral_g + jitter(n * 1.5, 0.05);

        let wear = (2.0 + elapsed * 0.01).min(30.0);
        let make_tire = |is_front: bool, seed: f32| TireInfo {
            temperature: Celsius(
                if is_front { 85.0 } else { 78.0 } + speed * 0.15 + lat_g.abs() * 3.0 + jitter(n * seed, 0.5),
            ),
            pressure: Psi::from_kilopascals(178.0 + speed * 0.05 + jitter(n * seed, 0.5)),
            wear_percent: Percent(wear),
            dirt_level: Percent(0.0),
        };
        let mut tires = TireData {
            front_left: make_tire(true, 2.1),
            front_right: make_tire(true, 2.2),
            rear_left: make_tire(false, 2.3),
            rear_right: make_tire(false, 2.4),
            ..Default::default()
        };
        tires.wear_level = classify_tire_wear(&tires);
        tires.temp_level = classify_tire_temp(&tires);

        let fuel = FuelData {
            level: Liters((FUEL_CAPACITY * (1.0 - elapsed * FUEL_BURN_RATE)).max(0.0)),
            capacity: Liters(FUEL_CAPACITY),
            usage_per_lap: Liters(FUEL_CAPACITY * FUEL_BURN_RATE * self.lap_duration),
            ..Default::default()
        };
        let reference_lap = if sim.best_lap > 0.0 { sim.best_lap } else { self.lap_duration };
        let fuel = calculate_fuel_estimates(&fuel, Duration::from_secs_f32(reference_lap));

        let session_duration = Seconds(SESSION_DURATION_SECS);
        let format = calculate_race_format(session_duration, SESSION_LAPS);
        let session = SessionInfo {
            session_type: SessionType::Race,
            format,
            flag: SessionFlag::Green,
            time_remaining: Seconds((SESSION_DURATION_SECS - elapsed).max(0.0)),
            laps_remaining: (SESSION_LAPS - sim.laps_completed as i32).max(0),
            is_timed: matches!(format, RaceFormat::Timed | RaceFormat::Hybrid),
            is_lapped: matches!(format, RaceFormat::Lapped | RaceFormat::Hybrid),
            total_laps: SESSION_LAPS,
            session_duration,
            track_name: TRACK_NAME.to_string(),
            track_length: Kilometers(TRACK_LENGTH_KM),
            air_temperature: Celsius(22.0 + jitter(n * 7.0, 0.1)),
            track_temperature: Celsius(28.0 + jitter(n * 7.1, 0.2)),
        };

        let player = PlayerData {
            position: 3,
            current_lap: current_lap as i32,
            lap_distance_percent: Percent::from_ratio(lap_time / self.lap_duration),
            current_lap_time: Seconds(lap_time),
            last_lap_time: Seconds(sim.last_lap),
            best_lap_time: Seconds(sim.best_lap),
            fuel,
            tires: tires.clone(),
            pit: PitData {
                pit_window_open: sim.laps_completed >= 10,
                ..Default::default()
            },
            speed: KilometersPerHour::from_meters_per_second(speed),
            rpm: Rpm(rpm),
            gear: state.gear,
            throttle: Percent::from_ratio(throttle),
            brake: Percent::from_ratio(brake),
            clutch: Percent(0.0),
            steering_angle: steering,
        };

        // Two other cars circulating at slightly different pace
        let opponent = |name: &str, position: i32, pace_offset: f32, start_offset: f32, gap: f32| {
            let pace = self.lap_duration + pace_offset;
            let t = elapsed + start_offset;
            let lap_t = t % pace;
            let state = compute_lap_state(&self.track, lap_t / pace * self.lap_duration);
            OpponentData {
                driver_name: name.to_string(),
                car_name: "Formula Demo".to_string(),
                position,
                current_lap: (t / pace) as i32 + 1,
                lap_distance_percent: Percent::from_ratio(lap_t / pace),
                last_lap_time: Seconds(pace + jitter(n * position as f32, 0.4)),
                best_lap_time: Seconds(pace - 0.6),
                gap_to_leader: Seconds(gap),
                speed: KilometersPerHour::from_meters_per_second(state.speed),
                is_in_pit: false,
                tires: tires.clone(),
            }
        };
        let opponents = vec![
            opponent("Alex Rivera", 1, -1.5, 10.0, 0.0),
            opponent("Sam Chen", 2, 1.0, 25.0, 1.8 + jitter(n * 8.0, 0.2).abs()),
        ];

        trace!(frame = sim.frame_count, lap = current_lap, "generated demo snapshot");

        TelemetryData {
            timestamp: Utc::now(),
            simulator_type: SimulatorType::Demo,
            is_connected: true,
            session,
            player,
            opponents,
        }
    }
}

/// Config rates outside [0, 1] (or NaN) would make `gen_bool` panic
fn probability(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

/// Push a handful of fields out of range the way a glitching feed would
fn corrupt_snapshot(data: &mut TelemetryData) {
    data.player.speed = KilometersPerHour(f32::NAN);
    data.player.rpm = Rpm(-250.0);
    data.player.throttle = Percent(180.0);
    data.player.tires.front_left.temperature = Celsius(f32::INFINITY);
    data.session.track_temperature = Celsius(400.0);
}

#[async_trait]
impl TelemetrySource for DemoSource {
    fn identifier(&self) -> SimulatorType {
        SimulatorType::Demo
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(TelemetryError::Cancelled);
        }
        if self.inner.connected.swap(true, Ordering::SeqCst) {
            debug!("demo source already connected");
            return Ok(());
        }
        *self.inner.sim.lock().unwrap_or_else(PoisonError::into_inner) = Simulation::new();
        info!(track = TRACK_NAME, lap_seconds = self.inner.lap_duration, "demo source connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_data_stream().await;
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            info!("demo source disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn telemetry_data(&self, cancel: &CancellationToken) -> Result<TelemetryData> {
        if cancel.is_cancelled() {
            return Err(TelemetryError::Cancelled);
        }
        self.inner.fetch()
    }

    async fn start_data_stream(&self, cancel: &CancellationToken, interval: Duration) -> Result<DataStream> {
        self.inner.ensure_connected("start_data_stream")?;
        if interval.is_zero() {
            return Err(TelemetryError::other("stream interval must be greater than zero"));
        }

        // A second stream replaces the first
        self.stop_data_stream().await;

        let (data_tx, data) = mpsc::channel(STREAM_BUFFER);
        let (errors_tx, errors) = mpsc::channel(STREAM_BUFFER);
        let stream_cancel = cancel.child_token();
        let inner = self.inner.clone();
        let token = stream_cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let sent = match inner.fetch() {
                    Ok(snapshot) => match data_tx.try_send(snapshot) {
                        Err(TrySendError::Full(_)) => {
                            trace!("stream consumer behind, dropping snapshot");
                            true
                        }
                        Err(TrySendError::Closed(_)) => false,
                        Ok(()) => true,
                    },
                    Err(e) => !matches!(errors_tx.try_send(e), Err(TrySendError::Closed(_))),
                };
                if !sent {
                    debug!("stream receiver dropped, stopping");
                    break;
                }
            }
        });

        *self.lock_stream() = Some(StreamHandle {
            cancel: stream_cancel,
            task,
        });
        info!(?interval, "demo data stream started");
        Ok(DataStream { data, errors })
    }

    async fn stop_data_stream(&self) {
        let handle = self.lock_stream().take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                warn!(error = %e, "demo stream task ended abnormally");
            }
            info!("demo data stream stopped");
        }
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(TelemetryError::Cancelled);
        }
        self.inner.ensure_connected("health_check")
    }
}
