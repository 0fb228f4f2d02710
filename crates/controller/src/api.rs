//! HTTP API for health checks, Prometheus metrics, and committed status

use appclass_lib::{
    health::{ComponentStatus, HealthRegistry},
    AppClassStatus, ControllerMetrics, InMemoryStatusStore, ResourceKey,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ControllerMetrics,
    pub statuses: Arc<InMemoryStatusStore>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: ControllerMetrics,
        statuses: Arc<InMemoryStatusStore>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            statuses,
        }
    }
}

/// A resource's committed status as listed by `/status`
#[derive(Debug, Serialize)]
pub struct StatusEntry {
    pub namespace: String,
    pub name: String,
    pub status: AppClassStatus,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Every committed status, ordered by namespace and name
async fn list_status(State(state): State<Arc<AppState>>) -> Json<Vec<StatusEntry>> {
    let entries = state
        .statuses
        .list()
        .into_iter()
        .map(|(key, status)| StatusEntry {
            namespace: key.namespace,
            name: key.name,
            status,
        })
        .collect();

    Json(entries)
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<AppClassStatus>, StatusCode> {
    state
        .statuses
        .get(&ResourceKey::new(namespace, name))
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(list_status))
        .route("/status/:namespace/:name", get(get_status))
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
