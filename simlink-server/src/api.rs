//! Read-only REST status API

use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use simlink_core::{SimulatorType, TelemetryData, TelemetryError};
use simlink_engine::health::ConnectorHealthMetrics;
use simlink_engine::{ConnectionState, LatestData};
use std::collections::BTreeMap;
use tower_http::cors::CorsLayer;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sources", get(list_sources))
        .route("/api/health", get(health))
        .route("/api/health/detailed", get(health_detailed))
        .route("/api/telemetry/latest", get(latest_telemetry))
        .route("/api/telemetry/:simulator", get(fetch_telemetry))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// === Source Endpoints ===

#[derive(Serialize)]
struct SourceInfo {
    simulator: SimulatorType,
    active: bool,
    health: Option<ConnectionState>,
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceInfo>> {
    let active = state.polling.active_simulator().await;
    let health = state.monitor.health_status().await;

    let info = state
        .polling
        .registered_simulators()
        .await
        .into_iter()
        .map(|simulator| SourceInfo {
            simulator,
            active: active == Some(simulator),
            health: health.get(&simulator).copied(),
        })
        .collect();

    Json(info)
}

// === Health Endpoints ===

#[derive(Serialize)]
struct HealthSummary {
    polling: bool,
    active: Option<SimulatorType>,
    sources: BTreeMap<SimulatorType, ConnectionState>,
}

async fn health(State(state): State<AppState>) -> Json<HealthSummary> {
    Json(HealthSummary {
        polling: state.polling.is_running().await,
        active: state.polling.active_simulator().await,
        sources: state.monitor.health_status().await.into_iter().collect(),
    })
}

async fn health_detailed(State(state): State<AppState>) -> Json<BTreeMap<SimulatorType, ConnectorHealthMetrics>> {
    Json(state.monitor.detailed_health_metrics().await.into_iter().collect())
}

// === Telemetry Endpoints ===

async fn latest_telemetry(State(state): State<AppState>) -> Json<LatestData> {
    Json(state.polling.latest_data().await)
}

/// Fetch one snapshot on demand through the health monitor
async fn fetch_telemetry(
    State(state): State<AppState>,
    Path(simulator): Path<String>,
) -> Result<Json<TelemetryData>, (StatusCode, String)> {
    let id = SimulatorType::parse(&simulator)
        .ok_or((StatusCode::BAD_REQUEST, format!("Unknown simulator: {}", simulator)))?;

    state
        .monitor
        .get_telemetry_with_retry(id)
        .await
        .map(Json)
        .map_err(|e| {
            let status = match e {
                TelemetryError::NotRegistered(_) => StatusCode::NOT_FOUND,
                TelemetryError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            };
            tracing::debug!(simulator = %id, error = %e, %status, "on-demand fetch failed");
            (status, e.to_string())
        })
}
