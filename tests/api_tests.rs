mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use container_vm_manager::backend::Operation;
use container_vm_manager::core::vm::PowerState;
use container_vm_manager::{create_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{harness, Harness};

fn app(h: &Harness, timeout: Duration) -> Router {
    let state = Arc::new(AppState {
        orchestrator: h.orchestrator.clone(),
        request_timeout: timeout,
    });
    create_router(state, "/api/v1")
}

fn post(uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(Method::POST).uri(uri);
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_body(network: Value) -> Value {
    json!({
        "name": null,
        "create_config": {
            "path": "/bin/sh",
            "args": ["-c", "sleep 1"],
            "image": "img1",
            "network_settings": network
        }
    })
}

#[tokio::test]
async fn test_create_then_start() {
    let h = harness().await;
    let app = app(&h, Duration::from_secs(5));

    let response = app
        .clone()
        .oneshot(post("/api/v1/containers", Some(create_body(json!({"network_name": "default"})))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let id = body["container_id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 64);

    let response = app
        .oneshot(post(&format!("/api/v1/containers/{}/start", id), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.sim.vm(&id).await.unwrap().power, PowerState::PoweredOn);
}

#[tokio::test]
async fn test_start_unknown_container_is_not_found() {
    let h = harness().await;

    let response = app(&h, Duration::from_secs(5))
        .oneshot(post("/api/v1/containers/deadbeef/start", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json_body(response).await;
    assert_eq!(body["kind"], "resolution");
    assert_eq!(body["phase"], "lookup");
    assert_eq!(body["state"], "created");
}

#[tokio::test]
async fn test_malformed_address_is_bad_request() {
    let h = harness().await;

    let response = app(&h, Duration::from_secs(5))
        .oneshot(post(
            "/api/v1/containers",
            Some(create_body(json!({"network_name": "default", "address": "not-an-ip"}))),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["kind"], "validation");
    assert_eq!(body["phase"], "network_attach");
    assert_eq!(body["state"], "rolled_back");
    assert_eq!(h.bridge.adds(), 0);
}

#[tokio::test]
async fn test_unparseable_body_is_validation_error() {
    let h = harness().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/containers")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"create_config\": {\"image\": "))
        .unwrap();
    let response = app(&h, Duration::from_secs(5)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["kind"], "validation");
    assert!(body.get("phase").is_none());
    assert_eq!(h.sim.calls(Operation::CreateVm).await, 0);
}

#[tokio::test]
async fn test_wrongly_typed_body_is_validation_error() {
    let h = harness().await;

    let response = app(&h, Duration::from_secs(5))
        .oneshot(post("/api/v1/containers", Some(json!({"create_config": {"args": "not a list"}}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["kind"], "validation");
}

#[tokio::test]
async fn test_missing_hosts_is_service_unavailable() {
    let h = harness().await;
    h.sim.set_hosts(Vec::new()).await;

    let response = app(&h, Duration::from_secs(5))
        .oneshot(post("/api/v1/containers", Some(create_body(Value::Null))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["kind"], "placement");
}

#[tokio::test(start_paused = true)]
async fn test_stalled_create_times_out() {
    let h = harness().await;
    h.sim.stall(Operation::CreateVm).await;

    let response = app(&h, Duration::from_secs(2))
        .oneshot(post("/api/v1/containers", Some(create_body(json!({"network_name": "default"})))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json_body(response).await["kind"], "deadline_exceeded");
    assert_eq!(h.bridge.allocated(), 0);
}

#[tokio::test]
async fn test_unknown_route() {
    let h = harness().await;

    let response = app(&h, Duration::from_secs(5))
        .oneshot(Request::builder().uri("/api/v2/containers").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
