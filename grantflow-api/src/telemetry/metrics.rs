//! Prometheus Metrics Definitions
//!
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Registered once on first use.
pub static METRICS: Lazy<ApiResult<GrantflowMetrics>> = Lazy::new(GrantflowMetrics::new);

/// Outcome of a dispatch's outbound notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Notified,
    Skipped,
    Failed,
}

impl NotifyOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            NotifyOutcome::Notified => "notified",
            NotifyOutcome::Skipped => "skipped",
            NotifyOutcome::Failed => "failed",
        }
    }
}

#[derive(Clone)]
pub struct GrantflowMetrics {
    /// labels: method, path, status
    pub http_requests_total: CounterVec,

    /// labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// labels: workflow
    pub workflow_dispatches_total: CounterVec,

    /// labels: workflow, outcome (notified/skipped/failed)
    pub engine_notifications_total: CounterVec,

    /// labels: action, outcome (success/rejected/error)
    pub callbacks_total: CounterVec,

    pub websocket_connections: Gauge,
}

fn register_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl GrantflowMetrics {
    /// Create and register all metrics with the default Prometheus registry.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "grantflow_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| register_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "grantflow_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| register_error("http_request_duration_seconds", e))?,

            workflow_dispatches_total: register_counter_vec!(
                "grantflow_workflow_dispatches_total",
                "Workflow executions recorded in the ledger",
                &["workflow"]
            )
            .map_err(|e| register_error("workflow_dispatches_total", e))?,

            engine_notifications_total: register_counter_vec!(
                "grantflow_engine_notifications_total",
                "Outbound notifications to the automation engine",
                &["workflow", "outcome"]
            )
            .map_err(|e| register_error("engine_notifications_total", e))?,

            callbacks_total: register_counter_vec!(
                "grantflow_callbacks_total",
                "Callbacks received from the automation engine",
                &["action", "outcome"]
            )
            .map_err(|e| register_error("callbacks_total", e))?,

            websocket_connections: register_gauge!(
                "grantflow_websocket_connections",
                "Current number of active WebSocket connections"
            )
            .map_err(|e| register_error("websocket_connections", e))?,
        })
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_dispatch(&self, workflow: &str) {
        self.workflow_dispatches_total
            .with_label_values(&[workflow])
            .inc();
    }

    pub fn record_notification(&self, workflow: &str, outcome: NotifyOutcome) {
        self.engine_notifications_total
            .with_label_values(&[workflow, outcome.as_str()])
            .inc();
    }

    /// `action` is "unknown" for unrecognised actions to bound cardinality.
    pub fn record_callback(&self, action: &str, outcome: &str) {
        self.callbacks_total
            .with_label_values(&[action, outcome])
            .inc();
    }

    pub fn ws_connected(&self) {
        self.websocket_connections.inc();
    }

    pub fn ws_disconnected(&self) {
        self.websocket_connections.dec();
    }
}

/// Handler for GET /metrics.
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
))]
pub async fn metrics_handler() -> impl IntoResponse {
    // Make sure the Grantflow families exist even before the first request.
    let _ = METRICS.as_ref();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    fn metrics() -> Result<&'static GrantflowMetrics, String> {
        METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))
    }

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        assert!(!metrics()?.http_requests_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_record_dispatch_and_notification() -> Result<(), String> {
        let m = metrics()?;
        let before = m
            .engine_notifications_total
            .with_label_values(&["generate-budget", "skipped"])
            .get();
        m.record_dispatch("generate-budget");
        m.record_notification("generate-budget", NotifyOutcome::Skipped);
        let after = m
            .engine_notifications_total
            .with_label_values(&["generate-budget", "skipped"])
            .get();
        assert!(after >= before + 1.0);
        Ok(())
    }

    #[test]
    fn test_record_callback() -> Result<(), String> {
        let m = metrics()?;
        m.record_callback("insert_checklist", "success");
        m.record_callback("unknown", "rejected");
        Ok(())
    }

    #[test]
    fn test_websocket_gauge() -> Result<(), String> {
        let m = metrics()?;
        m.ws_connected();
        m.ws_disconnected();
        Ok(())
    }
}
