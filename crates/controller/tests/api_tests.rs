//! Integration tests for the controller API endpoints

use appclass_controller::api::{create_router, AppState};
use appclass_lib::{
    health::{components, HealthRegistry},
    AppClass, AppGroupKey, ControllerMetrics, InMemoryStatusStore, ReconcileDriver,
    DriverConfig, StaticAttributeProvider,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::DRIVER).await;
    health_registry.register(components::PROVIDER).await;
    health_registry.register(components::STORE).await;

    let metrics = ControllerMetrics::new();
    let statuses = Arc::new(InMemoryStatusStore::new());
    let state = Arc::new(AppState::new(health_registry, metrics, statuses));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn tiers() -> AppClass {
    serde_json::from_value(json!({
        "metadata": {"name": "tiers", "namespace": "ns", "generation": 1},
        "spec": {
            "predicates": [
                {"name": "gold", "expression": "tier == \"gold\""},
                {"name": "P1", "expression": "region == \"us-east\""},
                {"name": "P2", "expression": "region == \"us-east\""}
            ],
            "applicationClasses": [
                {"name": "gold", "appGroupWorkloads": [{"namespace": "ns", "appGroup": "g1"}]},
                {"name": "east-a", "predicates": ["P1"],
                 "appGroupWorkloads": [{"namespace": "ns", "appGroup": "g2"}]},
                {"name": "east-b", "predicates": ["P2"],
                 "appGroupWorkloads": [{"namespace": "ns", "appGroup": "g2"}]}
            ]
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["driver"].is_object());
    assert!(health["components"]["provider"].is_object());
    assert!(health["components"]["store"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::PROVIDER, "snapshot request refused")
        .await;

    let (status, body) = get(app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["provider"]["message"],
        "snapshot request refused"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::STORE, "status write failed")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_ready_flag() {
    let (app, state) = setup_test_app().await;

    // Not ready until initialization completes
    let (status, body) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;
    let (status, _) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    state
        .health_registry
        .set_unhealthy(components::DRIVER, "stopped")
        .await;
    let (status, _) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.observe_pass_latency(0.001);
    state.metrics.observe_pass_latency(0.02);
    state.metrics.inc_pass("ready");
    state.metrics.add_conflicts(1);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("appclass_pass_latency_seconds_bucket"));
    assert!(metrics_text.contains("appclass_pass_latency_seconds_count"));
    assert!(metrics_text.contains("appclass_passes_total"));
    assert!(metrics_text.contains("appclass_classification_conflicts_total"));
}

#[tokio::test]
async fn test_status_unknown_resource_is_404() {
    let (app, _state) = setup_test_app().await;

    let (status, _) = get(app.clone(), "/status/ns/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get(app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap(), json!([]));
}

#[tokio::test]
async fn test_status_serves_committed_classification() {
    let (app, state) = setup_test_app().await;

    let provider = Arc::new(StaticAttributeProvider::new());
    provider.set_group(
        AppGroupKey::new("ns", "g1"),
        serde_json::from_value(json!({"w1": {"tier": "gold"}, "w2": {"tier": "tin"}})).unwrap(),
    );
    provider.set_group(
        AppGroupKey::new("ns", "g2"),
        serde_json::from_value(json!({"w1": {"region": "us-east"}})).unwrap(),
    );
    let driver = ReconcileDriver::new(provider, state.statuses.clone(), DriverConfig::default());
    driver.apply(tiers());

    for _ in 0..200 {
        if !state.statuses.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (status, body) = get(app.clone(), "/status/ns/tiers").await;
    assert_eq!(status, StatusCode::OK);

    let status_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status_json["phase"], "Degraded");
    assert_eq!(status_json["observedGeneration"], 1);
    assert_eq!(status_json["applicationClasses"][0]["name"], "gold");
    assert_eq!(
        status_json["applicationClasses"][0]["appInfos"][0],
        json!({
            "name": "ns/g1",
            "namespace": "ns",
            "appGroup": "g1",
            "appGroupWorkloads": ["w1"]
        })
    );
    assert_eq!(status_json["problems"][0]["kind"], "classificationConflict");
    assert_eq!(status_json["problems"][0]["workload"], "w1");
    assert_eq!(
        status_json["problems"][0]["classes"],
        json!(["east-a", "east-b"])
    );

    let (_, body) = get(app, "/status").await;
    let listed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(listed[0]["namespace"], "ns");
    assert_eq!(listed[0]["name"], "tiers");
}
