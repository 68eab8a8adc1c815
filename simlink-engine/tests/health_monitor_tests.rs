mod common;

use common::MockSource;
use simlink_core::{SimulatorType, TelemetryError};
use simlink_engine::{
    CircuitBreakerConfig, CircuitBreakerState, ConnectionHealthMonitor, ConnectionState, HealthMonitorConfig,
    RetryConfig,
};
use std::sync::Arc;
use std::time::Duration;

fn fast_config(max_retries: u32, failure_threshold: u32) -> HealthMonitorConfig {
    HealthMonitorConfig {
        check_interval: Duration::from_millis(20),
        check_timeout: Duration::from_millis(50),
        retry: RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
            ..Default::default()
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout: Duration::from_secs(60),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_unregistered_simulator_is_rejected() {
    let monitor = ConnectionHealthMonitor::new(Duration::from_secs(10));

    let err = monitor.get_telemetry_with_retry(SimulatorType::IRacing).await.unwrap_err();
    assert!(matches!(err, TelemetryError::NotRegistered(SimulatorType::IRacing)));
}

#[tokio::test]
async fn test_register_starts_healthy() {
    let monitor = ConnectionHealthMonitor::new(Duration::from_secs(10));
    monitor.register_connector(MockSource::connected(SimulatorType::Demo)).await;

    let status = monitor.health_status().await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[&SimulatorType::Demo], ConnectionState::Healthy);

    assert!(monitor.unregister_connector(SimulatorType::Demo).await);
    assert!(!monitor.unregister_connector(SimulatorType::Demo).await);
    assert!(monitor.health_status().await.is_empty());
}

#[tokio::test]
async fn test_successful_fetch() {
    let monitor = ConnectionHealthMonitor::with_config(fast_config(3, 5));
    let source = MockSource::connected(SimulatorType::Demo);
    monitor.register_connector(source.clone()).await;

    let data = monitor.get_telemetry_with_retry(SimulatorType::Demo).await.unwrap();
    assert_eq!(data.simulator_type, SimulatorType::Demo);
    assert_eq!(MockSource::calls(&source.fetch_calls), 1);
    assert_eq!(monitor.health_status().await[&SimulatorType::Demo], ConnectionState::Healthy);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let monitor = ConnectionHealthMonitor::with_config(fast_config(3, 5));
    let source = MockSource::connected(SimulatorType::Demo);
    source.fail_fetches(2, true);
    monitor.register_connector(source.clone()).await;

    let data = monitor.get_telemetry_with_retry(SimulatorType::Demo).await.unwrap();
    assert_eq!(data.player.current_lap, 0);
    assert_eq!(MockSource::calls(&source.fetch_calls), 3);

    // The whole retried call counts as a single breaker success
    let metrics = monitor.detailed_health_metrics().await;
    assert_eq!(metrics[&SimulatorType::Demo].circuit_breaker.failure_count, 0);
}

#[tokio::test]
async fn test_retry_exhaustion_marks_failed() {
    let monitor = ConnectionHealthMonitor::with_config(fast_config(2, 5));
    let source = MockSource::connected(SimulatorType::Demo);
    source.fail_fetches(10, true);
    monitor.register_connector(source.clone()).await;

    let err = monitor.get_telemetry_with_retry(SimulatorType::Demo).await.unwrap_err();
    assert!(matches!(err, TelemetryError::RetryExhausted { attempts: 2, .. }));
    assert_eq!(MockSource::calls(&source.fetch_calls), 3);
    assert_eq!(monitor.health_status().await[&SimulatorType::Demo], ConnectionState::Failed);

    let metrics = monitor.detailed_health_metrics().await;
    let breaker = &metrics[&SimulatorType::Demo].circuit_breaker;
    assert_eq!(breaker.failure_count, 1);
    assert!(breaker.last_failure_time.is_some());
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let monitor = ConnectionHealthMonitor::with_config(fast_config(3, 5));
    let source = MockSource::connected(SimulatorType::Demo);
    source.fail_fetches(1, false);
    monitor.register_connector(source.clone()).await;

    let err = monitor.get_telemetry_with_retry(SimulatorType::Demo).await.unwrap_err();
    assert!(matches!(err, TelemetryError::Connection(_)));
    assert_eq!(MockSource::calls(&source.fetch_calls), 1);
}

#[tokio::test]
async fn test_invalid_snapshots_are_never_returned() {
    let monitor = ConnectionHealthMonitor::with_config(fast_config(1, 5));
    let source = MockSource::connected(SimulatorType::Demo);
    source.set_invalid_data(true);
    monitor.register_connector(source.clone()).await;

    let err = monitor.get_telemetry_with_retry(SimulatorType::Demo).await.unwrap_err();
    match err {
        TelemetryError::RetryExhausted { last, .. } => match *last {
            TelemetryError::Validation(errors) => {
                assert!(errors.iter().any(|e| e.field == "Session.TrackLength"));
            }
            other => panic!("expected validation error, got {other}"),
        },
        other => panic!("expected exhausted retries, got {other}"),
    }
    assert_eq!(MockSource::calls(&source.fetch_calls), 2);

    source.set_invalid_data(false);
    assert!(monitor.get_telemetry_with_retry(SimulatorType::Demo).await.is_ok());
}

#[tokio::test]
async fn test_open_breaker_rejects_without_fetching() {
    let monitor = ConnectionHealthMonitor::with_config(fast_config(0, 2));
    let source = MockSource::connected(SimulatorType::Demo);
    source.fail_fetches(100, false);
    monitor.register_connector(source.clone()).await;

    for _ in 0..2 {
        assert!(monitor.get_telemetry_with_retry(SimulatorType::Demo).await.is_err());
    }
    let metrics = monitor.detailed_health_metrics().await;
    assert_eq!(metrics[&SimulatorType::Demo].circuit_breaker.state, CircuitBreakerState::Open);

    let err = monitor.get_telemetry_with_retry(SimulatorType::Demo).await.unwrap_err();
    assert!(matches!(err, TelemetryError::CircuitOpen));
    assert_eq!(MockSource::calls(&source.fetch_calls), 2);
    assert_eq!(monitor.health_status().await[&SimulatorType::Demo], ConnectionState::Failed);
}

#[tokio::test]
async fn test_half_open_successes_close_breaker() {
    let mut config = fast_config(0, 1);
    config.circuit_breaker.recovery_timeout = Duration::from_millis(20);
    config.circuit_breaker.success_threshold = 2;
    let monitor = ConnectionHealthMonitor::with_config(config);
    let source = MockSource::connected(SimulatorType::Demo);
    source.fail_fetches(1, false);
    monitor.register_connector(source.clone()).await;

    assert!(monitor.get_telemetry_with_retry(SimulatorType::Demo).await.is_err());
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert!(monitor.get_telemetry_with_retry(SimulatorType::Demo).await.is_ok());
    assert_eq!(monitor.health_status().await[&SimulatorType::Demo], ConnectionState::Healthy);
    let metrics = monitor.detailed_health_metrics().await;
    assert_eq!(metrics[&SimulatorType::Demo].circuit_breaker.state, CircuitBreakerState::HalfOpen);

    assert!(monitor.get_telemetry_with_retry(SimulatorType::Demo).await.is_ok());
    assert_eq!(monitor.health_status().await[&SimulatorType::Demo], ConnectionState::Healthy);
    let metrics = monitor.detailed_health_metrics().await;
    assert_eq!(metrics[&SimulatorType::Demo].circuit_breaker.state, CircuitBreakerState::Closed);
}

#[tokio::test]
async fn test_sources_are_isolated() {
    let monitor = ConnectionHealthMonitor::with_config(fast_config(0, 1));
    let failing = MockSource::connected(SimulatorType::IRacing);
    let working = MockSource::connected(SimulatorType::Demo);
    failing.fail_fetches(100, false);
    monitor.register_connector(failing.clone()).await;
    monitor.register_connector(working.clone()).await;

    assert!(monitor.get_telemetry_with_retry(SimulatorType::IRacing).await.is_err());
    assert!(matches!(
        monitor.get_telemetry_with_retry(SimulatorType::IRacing).await,
        Err(TelemetryError::CircuitOpen)
    ));

    assert!(monitor.get_telemetry_with_retry(SimulatorType::Demo).await.is_ok());
    let status = monitor.health_status().await;
    assert_eq!(status[&SimulatorType::IRacing], ConnectionState::Failed);
    assert_eq!(status[&SimulatorType::Demo], ConnectionState::Healthy);
}

#[tokio::test]
async fn test_health_pass_times_out_slow_probe() {
    let monitor = ConnectionHealthMonitor::with_config(fast_config(0, 5));
    let slow = MockSource::connected(SimulatorType::IRacing);
    let fast = MockSource::connected(SimulatorType::Demo);
    slow.set_health_delay(Duration::from_millis(500));
    monitor.register_connector(slow.clone()).await;
    monitor.register_connector(fast.clone()).await;

    let started = tokio::time::Instant::now();
    monitor.run_health_pass().await;
    assert!(started.elapsed() < Duration::from_millis(400));

    let status = monitor.health_status().await;
    assert_eq!(status[&SimulatorType::IRacing], ConnectionState::Unhealthy);
    assert_eq!(status[&SimulatorType::Demo], ConnectionState::Healthy);
}

#[tokio::test]
async fn test_health_probes_run_concurrently() {
    let mut config = fast_config(0, 5);
    config.check_timeout = Duration::from_secs(1);
    let monitor = ConnectionHealthMonitor::with_config(config);
    for id in [SimulatorType::IRacing, SimulatorType::AssettoCorsaCompetizione, SimulatorType::Demo] {
        let source = MockSource::connected(id);
        source.set_health_delay(Duration::from_millis(150));
        monitor.register_connector(source).await;
    }

    let started = tokio::time::Instant::now();
    monitor.run_health_pass().await;
    let elapsed = started.elapsed();

    // One probe's delay, not the 450ms sum of all three
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_millis(300), "health pass took {elapsed:?}");
    assert!(monitor.health_status().await.values().all(|s| *s == ConnectionState::Healthy));
}

#[tokio::test]
async fn test_zero_check_interval_is_rejected() {
    let mut config = fast_config(0, 5);
    config.check_interval = Duration::ZERO;
    let monitor = ConnectionHealthMonitor::with_config(config);

    assert!(matches!(monitor.start_health_checking(), Err(TelemetryError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_background_health_loop() {
    let monitor = ConnectionHealthMonitor::with_config(fast_config(0, 5));
    let source = MockSource::connected(SimulatorType::Demo);
    source.set_healthy(false);
    monitor.register_connector(source.clone()).await;

    monitor.start_health_checking().unwrap();
    monitor.start_health_checking().unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(monitor.health_status().await[&SimulatorType::Demo], ConnectionState::Unhealthy);

    source.set_healthy(true);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(monitor.health_status().await[&SimulatorType::Demo], ConnectionState::Healthy);

    monitor.stop().await;
    let calls = MockSource::calls(&source.health_calls);
    assert!(calls >= 2);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(MockSource::calls(&source.health_calls), calls);
}

#[tokio::test]
async fn test_stop_cancels_in_flight_retry() {
    let mut config = fast_config(5, 10);
    config.retry.initial_delay = Duration::from_secs(10);
    config.retry.max_delay = Duration::from_secs(10);
    let monitor = Arc::new(ConnectionHealthMonitor::with_config(config));
    let source = MockSource::connected(SimulatorType::Demo);
    source.fail_fetches(100, true);
    monitor.register_connector(source.clone()).await;

    let call = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.get_telemetry_with_retry(SimulatorType::Demo).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    monitor.stop().await;

    let result = tokio::time::timeout(Duration::from_secs(1), call).await.unwrap().unwrap();
    assert!(matches!(result, Err(TelemetryError::Cancelled)));
    assert_eq!(MockSource::calls(&source.fetch_calls), 1);
}

#[tokio::test]
async fn test_detailed_metrics_serialize() {
    let monitor = ConnectionHealthMonitor::with_config(fast_config(0, 5));
    let source = MockSource::new(SimulatorType::Demo);
    monitor.register_connector(source).await;

    let metrics = monitor.detailed_health_metrics().await;
    let demo = &metrics[&SimulatorType::Demo];
    assert!(!demo.connected);
    assert_eq!(demo.circuit_breaker.state, CircuitBreakerState::Closed);

    let json = serde_json::to_value(demo).unwrap();
    assert_eq!(json["simulator"], "demo");
    assert_eq!(json["state"], "healthy");
    assert_eq!(json["circuit_breaker"]["state"], "closed");
}
