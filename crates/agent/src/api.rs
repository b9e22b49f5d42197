//! HTTP API for health checks, Prometheus metrics and agent status

use agent_lib::{
    health::{components, lifecycle_health, store_health, ComponentStatus, HealthRegistry},
    lifecycle::{LifecycleStatus, StateMachine},
    observability::AgentMetrics,
    store::Store,
};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AgentMetrics,
    pub store: Arc<Store>,
    pub lifecycle: Arc<StateMachine>,
    pub staleness_threshold: Duration,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: AgentMetrics,
        store: Arc<Store>,
        lifecycle: Arc<StateMachine>,
        staleness_threshold: Duration,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            store,
            lifecycle,
            staleness_threshold,
        }
    }

    /// Re-derive store and backend health from live state
    async fn refresh(&self) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.health_registry
            .update(
                components::STORE,
                store_health(&self.store, self.staleness_threshold, now_ms),
            )
            .await;
        self.health_registry
            .update(
                components::BACKEND,
                lifecycle_health(&self.lifecycle.status()),
            )
            .await;
    }
}

/// Per-kind view of the store
#[derive(Debug, Serialize)]
struct KindStatus {
    items: usize,
    last_updated_ms: i64,
    age_secs: i64,
}

/// Response body for `/status`
#[derive(Debug, Serialize)]
struct StatusResponse {
    lifecycle: LifecycleStatus,
    total_items: usize,
    kinds: BTreeMap<&'static str, KindStatus>,
}

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.refresh().await;
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.refresh().await;
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    state.metrics.set_store_stats(&state.store);
    state.metrics.set_lifecycle(&state.lifecycle.status());

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Lifecycle state and per-kind store contents
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let counts = state.store.item_counts();
    let updated = state.store.last_updated_times();

    let kinds: BTreeMap<_, _> = updated
        .into_iter()
        .map(|(kind, last_updated_ms)| {
            let age_secs = if last_updated_ms > 0 {
                now_ms.saturating_sub(last_updated_ms) / 1000
            } else {
                0
            };
            (
                kind.as_str(),
                KindStatus {
                    items: counts.get(&kind).copied().unwrap_or(0),
                    last_updated_ms,
                    age_secs,
                },
            )
        })
        .collect();

    Json(StatusResponse {
        lifecycle: state.lifecycle.status(),
        total_items: counts.values().sum(),
        kinds,
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(state)
}

/// Start the API server
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_lib::lifecycle::AgentState;
    use agent_lib::models::NamespaceInfo;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            HealthRegistry::new(),
            AgentMetrics::new(),
            Arc::new(Store::new()),
            Arc::new(StateMachine::new()),
            Duration::from_secs(900),
        ))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_healthz_reports_components() {
        let state = test_state();
        state.health_registry.register(components::COLLECTORS).await;

        let (status, body) = get_json(create_router(state), "/healthz").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert!(body["components"]["store"].is_object());
        assert!(body["components"]["backend"].is_object());
    }

    #[tokio::test]
    async fn test_healthz_unhealthy_when_stopped() {
        let state = test_state();
        state.lifecycle.handle_http_status(401, 0);

        let (status, body) = get_json(create_router(state), "/healthz").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["components"]["backend"]["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_healthz_degraded_still_ok() {
        let state = test_state();
        state.lifecycle.handle_http_status(429, 10);

        let (status, body) = get_json(create_router(state), "/healthz").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_readyz_follows_sync() {
        let state = test_state();

        let (status, body) = get_json(create_router(state.clone()), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);

        state.health_registry.set_ready(true).await;
        let (status, body) = get_json(create_router(state), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
    }

    #[tokio::test]
    async fn test_status_lists_every_kind() {
        let state = test_state();
        state.store.namespaces.set(
            "default",
            NamespaceInfo {
                name: "default".to_string(),
                uid: "ns-uid".to_string(),
                phase: "Active".to_string(),
                labels: Default::default(),
            },
        );
        state.lifecycle.handle_http_status(200, 0);

        let (status, body) = get_json(create_router(state), "/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lifecycle"]["state"], AgentState::Running.as_str());
        assert_eq!(body["total_items"], 1);
        assert_eq!(body["kinds"]["namespaces"]["items"], 1);
        assert_eq!(
            body["kinds"].as_object().unwrap().len(),
            agent_lib::store::ResourceKind::ALL.len()
        );
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("cluster_agent_store_items"));
        assert!(text.contains("cluster_agent_state"));
    }
}
