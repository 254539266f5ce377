//! Health Probes
//!
//! `/health/ping` and `/health/live` only prove the process answers.
//! `/health/ready` checks the grant store and reports whether the automation
//! engine is wired up. Probes are unauthenticated.

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// State of one dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ComponentHealth {
    fn up(latency_ms: Option<u64>) -> Self {
        Self { status: HealthStatus::Healthy, latency_ms, note: None }
    }

    fn with(status: HealthStatus, note: impl Into<String>) -> Self {
        Self { status, latency_ms: None, note: Some(note.into()) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReadinessReport {
    pub status: HealthStatus,
    pub store: ComponentHealth,
    /// Dispatches are still recorded when the engine is missing, so this
    /// never makes the service unready.
    pub engine: ComponentHealth,
    pub version: String,
    pub uptime_seconds: u64,
}

/// GET /health/ping
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/ping",
    tag = "Health",
    responses((status = 200, description = "pong", body = String)),
))]
pub async fn ping() -> impl IntoResponse {
    "pong"
}

/// GET /health/live
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses((status = 200, description = "Process is alive", body = ComponentHealth)),
))]
pub async fn liveness() -> impl IntoResponse {
    Json(ComponentHealth::up(None))
}

/// GET /health/ready
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Ready, possibly degraded", body = ReadinessReport),
        (status = 503, description = "Grant store unreachable", body = ReadinessReport),
    ),
))]
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let store = match state.store.health_check().await {
        Ok(true) => ComponentHealth::up(Some(started.elapsed().as_millis() as u64)),
        Ok(false) => ComponentHealth::with(HealthStatus::Unhealthy, "store reported unhealthy"),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness probe: store check failed");
            ComponentHealth::with(HealthStatus::Unhealthy, e.to_string())
        }
    };

    let engine = if state.dispatcher.is_engine_configured() {
        ComponentHealth::up(None)
    } else {
        ComponentHealth::with(HealthStatus::Degraded, "automation engine not configured")
    };

    let status = combine(store.status, engine.status);
    let report = ReadinessReport {
        status,
        store,
        engine,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    };

    let code = match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, Json(report))
}

fn combine(store: HealthStatus, engine: HealthStatus) -> HealthStatus {
    match (store, engine) {
        (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
        (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_failure_is_fatal_and_missing_engine_degrades() {
        use HealthStatus::*;
        assert_eq!(combine(Healthy, Healthy), Healthy);
        assert_eq!(combine(Healthy, Degraded), Degraded);
        assert_eq!(combine(Unhealthy, Healthy), Unhealthy);
        assert_eq!(combine(Unhealthy, Degraded), Unhealthy);
    }

    #[test]
    fn test_component_omits_empty_fields() -> Result<(), String> {
        let json = serde_json::to_value(ComponentHealth::up(None)).map_err(|e| e.to_string())?;
        assert_eq!(json, serde_json::json!({ "status": "healthy" }));

        let json = serde_json::to_value(ComponentHealth::with(HealthStatus::Degraded, "no engine"))
            .map_err(|e| e.to_string())?;
        assert_eq!(json["note"], "no engine");
        Ok(())
    }
}
