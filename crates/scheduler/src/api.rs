//! HTTP API for health checks, Prometheus metrics and scheduler counters

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use scheduler_lib::{ComponentStatus, HealthRegistry, SchedulerMetrics};
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: Arc<SchedulerMetrics>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: Arc<SchedulerMetrics>) -> Self {
        Self {
            health_registry,
            metrics,
        }
    }
}

/// 200 while operational, 503 once a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// 200 once the snapshot is built and workers run, 503 otherwise
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus text exposition of the scheduler registry
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Counters as JSON
async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.metrics.stats())
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/stats", get(stats))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use scheduler_lib::health::Component;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn setup() -> Arc<AppState> {
        let registry = HealthRegistry::new();
        registry.register_all().await;
        let metrics = Arc::new(SchedulerMetrics::new().unwrap());
        Arc::new(AppState::new(registry, metrics))
    }

    async fn get(state: Arc<AppState>, path: &str) -> (StatusCode, String) {
        let response = create_router(state)
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthz_tracks_component_status() {
        let state = setup().await;

        let (status, body) = get(state.clone(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");

        state
            .health_registry
            .set_degraded(Component::Monitor, "connection refused")
            .await;
        let (status, body) = get(state.clone(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("degraded"));

        state
            .health_registry
            .set_unhealthy(Component::Reconciler, "watch closed")
            .await;
        let (status, _) = get(state, "/healthz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_readyz_before_and_after_startup() {
        let state = setup().await;

        let (status, _) = get(state.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.health_registry.set_ready(true).await;
        let (status, body) = get(state, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["ready"], true);
    }

    #[tokio::test]
    async fn test_metrics_exposes_scheduler_counters() {
        let state = setup().await;
        state.metrics.record_scheduled(Duration::from_millis(12));
        state
            .metrics
            .record_failed("infeasible", Duration::from_millis(3));

        let (status, body) = get(state, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("scheduler_pods_scheduled_total 1"));
        assert!(body.contains("scheduler_pods_failed_total{reason=\"infeasible\"} 1"));
        assert!(body.contains("scheduler_decision_latency_seconds"));
    }

    #[tokio::test]
    async fn test_stats_returns_counters() {
        let state = setup().await;
        state.metrics.record_enqueued(1);
        state.metrics.record_dropped(1000);
        state.metrics.record_eviction(true);

        let (status, body) = get(state, "/stats").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["dropped"], 1);
        assert_eq!(json["evictions_succeeded"], 1);
        assert_eq!(json["scheduled"], 0);
    }
}
