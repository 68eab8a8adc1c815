//! Integration tests for the simlink-server HTTP API
//!
//! Uses tower::ServiceExt::oneshot to test routes directly without binding a port.

use axum::body::Body;
use http_body_util::BodyExt;
use hyper::Request;
use simlink_adapters::DemoSource;
use simlink_core::{SimulatorType, TelemetrySource};
use simlink_server::{api::create_router, config::ServerConfig, manager, state::AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Config with a short retry budget and a breaker that opens on the first failure
fn fast_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.health.retry.max_retries = 0;
    config.health.circuit_breaker.failure_threshold = 1;
    config.health.circuit_breaker.recovery_timeout = Duration::from_secs(60);
    config.polling.high_priority_interval = Duration::from_millis(5);
    config.polling.medium_priority_interval = Duration::from_millis(10);
    config.polling.low_priority_interval = Duration::from_millis(20);
    config
}

/// Helper: build a router with fresh AppState (no sources registered)
fn app() -> axum::Router {
    create_router(AppState::new(&fast_config()))
}

/// Helper: build a router with AppState returned for further manipulation
fn app_with_state() -> (axum::Router, AppState) {
    let state = AppState::new(&fast_config());
    let router = create_router(state.clone());
    (router, state)
}

/// Helper: register a demo source, connected or not
async fn register_demo(state: &AppState, source: DemoSource, connect: bool) {
    if connect {
        source.connect(&CancellationToken::new()).await.unwrap();
    }
    state.register_source(Arc::new(source)).await;
}

/// Helper: issue a GET and return status plus body
async fn get(app: axum::Router, uri: &str) -> (u16, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status().as_u16();
    let collected = response.into_body().collect().await.unwrap();
    (status, String::from_utf8(collected.to_bytes().to_vec()).unwrap())
}

async fn get_json(app: axum::Router, uri: &str) -> (u16, serde_json::Value) {
    let (status, body) = get(app, uri).await;
    let parsed = serde_json::from_str(&body).unwrap_or_else(|e| panic!("invalid JSON from {uri}: {e}: {body}"));
    (status, parsed)
}

// ==================== GET /api/sources ====================

#[tokio::test]
async fn test_get_sources_returns_200_with_empty_array() {
    let (status, parsed) = get_json(app(), "/api/sources").await;

    assert_eq!(status, 200);
    assert!(parsed.is_array(), "Response should be a JSON array");
    assert_eq!(parsed.as_array().unwrap().len(), 0, "Array should be empty");
}

#[tokio::test]
async fn test_get_sources_with_demo_registered() {
    let (app, state) = app_with_state();
    register_demo(&state, DemoSource::new(), true).await;
    state.polling.set_active_simulator(SimulatorType::Demo).await.unwrap();

    let (status, parsed) = get_json(app, "/api/sources").await;

    assert_eq!(status, 200);
    let sources = parsed.as_array().unwrap();
    assert_eq!(sources.len(), 1, "Should have one source");
    assert_eq!(sources[0]["simulator"], "demo");
    assert_eq!(sources[0]["active"], true);
    assert_eq!(sources[0]["health"], "healthy");
}

// ==================== GET /api/health ====================

#[tokio::test]
async fn test_get_health_when_idle() {
    let (app, state) = app_with_state();
    register_demo(&state, DemoSource::new(), false).await;

    let (status, parsed) = get_json(app, "/api/health").await;

    assert_eq!(status, 200);
    assert_eq!(parsed["polling"], false);
    assert!(parsed["active"].is_null());
    assert_eq!(parsed["sources"]["demo"], "healthy");
}

#[tokio::test]
async fn test_get_health_detailed() {
    let (app, state) = app_with_state();
    register_demo(&state, DemoSource::new(), true).await;

    let (status, parsed) = get_json(app, "/api/health/detailed").await;

    assert_eq!(status, 200);
    let demo = &parsed["demo"];
    assert_eq!(demo["state"], "healthy");
    assert_eq!(demo["connected"], true);
    assert_eq!(demo["circuit_breaker"]["state"], "closed");
    assert_eq!(demo["circuit_breaker"]["failure_count"], 0);
}

// ==================== GET /api/telemetry/:simulator ====================

#[tokio::test]
async fn test_fetch_telemetry_returns_snapshot() {
    let (app, state) = app_with_state();
    register_demo(&state, DemoSource::new(), true).await;

    let (status, parsed) = get_json(app, "/api/telemetry/demo").await;

    assert_eq!(status, 200);
    assert_eq!(parsed["simulator_type"], "demo");
    assert_eq!(parsed["session"]["track_name"], "Demo Circuit");
    assert_eq!(parsed["opponents"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_fetch_unregistered_simulator_returns_404() {
    let (app, state) = app_with_state();
    register_demo(&state, DemoSource::new(), true).await;

    let (status, body) = get(app, "/api/telemetry/iracing").await;

    assert_eq!(status, 404);
    assert!(body.contains("not registered"), "unexpected body: {body}");
}

#[tokio::test]
async fn test_fetch_unknown_name_returns_400() {
    let (status, body) = get(app(), "/api/telemetry/not-a-sim").await;

    assert_eq!(status, 400);
    assert!(body.contains("not-a-sim"));
}

#[tokio::test]
async fn test_fetch_failure_returns_502_then_503() {
    let (app, state) = app_with_state();
    register_demo(&state, DemoSource::new().with_failure_rate(1.0), true).await;

    let (status, body) = get(app.clone(), "/api/telemetry/demo").await;
    assert_eq!(status, 502, "first failure should surface as bad gateway: {body}");

    // The breaker opened on that failure and now rejects without fetching
    let (status, body) = get(app.clone(), "/api/telemetry/demo").await;
    assert_eq!(status, 503);
    assert!(body.contains("circuit breaker is open"));

    let (_, parsed) = get_json(app, "/api/health").await;
    assert_eq!(parsed["sources"]["demo"], "failed");
}

#[tokio::test]
async fn test_fetch_disconnected_source_returns_502() {
    let (app, state) = app_with_state();
    register_demo(&state, DemoSource::new(), false).await;

    let (status, body) = get(app, "/api/telemetry/demo").await;

    assert_eq!(status, 502);
    assert!(body.contains("not connected"), "unexpected body: {body}");
}

// ==================== GET /api/telemetry/latest ====================

#[tokio::test]
async fn test_latest_is_empty_before_polling() {
    let (status, parsed) = get_json(app(), "/api/telemetry/latest").await;

    assert_eq!(status, 200);
    assert!(parsed["high"].is_null());
    assert!(parsed["medium"].is_null());
    assert!(parsed["low"].is_null());
}

#[tokio::test]
async fn test_pipeline_populates_latest() {
    let (app, state) = app_with_state();
    register_demo(&state, DemoSource::new(), false).await;

    let cancel = CancellationToken::new();
    let consumer = manager::start(&state, SimulatorType::Demo, &cancel).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (status, parsed) = get_json(app.clone(), "/api/telemetry/latest").await;
    assert_eq!(status, 200);
    for tier in ["high", "medium", "low"] {
        assert_eq!(parsed[tier]["simulator_type"], "demo", "{tier} tier should have data");
    }

    let (_, health) = get_json(app, "/api/health").await;
    assert_eq!(health["polling"], true);
    assert_eq!(health["active"], "demo");

    manager::shutdown(&state).await;
    let stats = consumer.await.unwrap();
    assert!(stats.high > 0);
    assert_eq!(stats.errors, 0);
    assert!(!state.polling.is_running().await);
}

// ==================== Misc ====================

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (status, _) = get(app(), "/api/nope").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_cors_headers_present() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/sources")
                .header("origin", "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(
        response.headers().contains_key("access-control-allow-origin"),
        "CORS header should be present"
    );
}
