//! Reverse proxy behavior against a live local upstream.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::routing::any;
use axum::{Json, Router};
use chrono::Utc;
use gateway_core::observability::{TraceLevel, TraceSink};
use gateway_core::resilience::{CircuitState, HealthRegistry};
use gateway_service::models::Service;
use gateway_service::proxy::proxy_rest;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

fn service_row(base_url: &str) -> Service {
    Service {
        id: 1,
        name: "auth-service".to_string(),
        protocol: "rest".to_string(),
        base_url: base_url.to_string(),
        grpc_addr: String::new(),
        status: "unknown".to_string(),
        last_check: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

type CapturedHeaders = Arc<Mutex<Option<HeaderMap>>>;

async fn capture_headers(
    State(captured): State<CapturedHeaders>,
    request: Request,
) -> Json<serde_json::Value> {
    *captured.lock().unwrap() = Some(request.headers().clone());
    Json(json!({ "success": true, "code": "SUCCESS" }))
}

async fn always_500() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn spawn_upstream(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_header_rewrite_and_passthrough() {
    let captured: CapturedHeaders = Arc::new(Mutex::new(None));
    let app = Router::new()
        .route("/echo", any(capture_headers))
        .with_state(captured.clone());
    let addr = spawn_upstream(app).await;

    let client = reqwest::Client::new();
    let (traces, _trace_rx) = TraceSink::new();
    let registry = HealthRegistry::new();
    let health = registry.stats(1);
    let service = service_row(&format!("http://{addr}"));

    let request = Request::builder()
        .method("POST")
        .uri("/echo")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"ping":true}"#))
        .unwrap();

    let response = proxy_rest(
        &client,
        &traces,
        &health,
        &service,
        "req-1",
        Some("10.0.0.5".parse().unwrap()),
        request,
    )
    .await;

    assert_eq!(response.status(), 200);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], true);

    let headers = captured.lock().unwrap().clone().unwrap();
    assert_eq!(headers["x-forwarded-for"], "10.0.0.5");
    assert_eq!(headers["host"], addr.to_string());

    let snapshot = health.snapshot();
    assert_eq!(snapshot.total_requests, 1);
    assert_eq!(snapshot.failed_requests, 0);
}

#[tokio::test]
async fn test_upstream_5xx_records_failure_and_passes_through() {
    let app = Router::new().route("/echo", any(always_500));
    let addr = spawn_upstream(app).await;

    let client = reqwest::Client::new();
    let (traces, mut trace_rx) = TraceSink::new();
    let registry = HealthRegistry::new();
    let health = registry.stats(1);
    let service = service_row(&format!("http://{addr}"));

    let request = Request::builder()
        .method("GET")
        .uri("/echo")
        .body(Body::empty())
        .unwrap();

    let response = proxy_rest(&client, &traces, &health, &service, "req-2", None, request).await;

    assert_eq!(response.status(), 500);
    assert_eq!(health.snapshot().failed_requests, 1);

    // First the proxying INFO, then the failure ERROR.
    let first = trace_rx.recv().await.unwrap();
    assert_eq!(first.level, TraceLevel::Info);
    let second = trace_rx.recv().await.unwrap();
    assert_eq!(second.level, TraceLevel::Error);
}

#[tokio::test]
async fn test_unreachable_upstream_yields_502() {
    // Bind and drop a listener so the port is closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = reqwest::Client::new();
    let (traces, mut trace_rx) = TraceSink::new();
    let registry = HealthRegistry::new();
    let health = registry.stats(1);
    let service = service_row(&format!("http://{addr}"));

    let request = Request::builder()
        .method("GET")
        .uri("/echo")
        .body(Body::empty())
        .unwrap();

    let response = proxy_rest(&client, &traces, &health, &service, "req-3", None, request).await;

    assert_eq!(response.status(), 502);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], false);
    assert_eq!(json["code"], "999");

    let snapshot = health.snapshot();
    assert_eq!(snapshot.failed_requests, 1);
    assert_eq!(snapshot.circuit_state, CircuitState::Closed);

    let first = trace_rx.recv().await.unwrap();
    assert_eq!(first.level, TraceLevel::Info);
    let second = trace_rx.recv().await.unwrap();
    assert_eq!(second.level, TraceLevel::Error);
    assert!(second.message.contains("transport error"));
}

#[tokio::test]
async fn test_invalid_upstream_url_yields_500() {
    let client = reqwest::Client::new();
    let (traces, mut trace_rx) = TraceSink::new();
    let registry = HealthRegistry::new();
    let health = registry.stats(1);
    let service = service_row("not a url");

    let request = Request::builder()
        .method("GET")
        .uri("/echo")
        .body(Body::empty())
        .unwrap();

    let response = proxy_rest(&client, &traces, &health, &service, "req-4", None, request).await;
    assert_eq!(response.status(), 500);

    let event = trace_rx.recv().await.unwrap();
    assert_eq!(event.level, TraceLevel::Error);
    assert!(event.message.contains("Invalid upstream URL"));
}
