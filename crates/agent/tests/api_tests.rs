//! Integration tests for the agent API endpoints

use agent_lib::{
    health::{components, ComponentStatus, HealthRegistry},
    observability::MonitorMetrics,
    stream::{ApiToken, MetricsSource, RawSeries, SourceError, StaticTokens},
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use podwatch_agent::api::{create_router, AppState, StreamSettings};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct EmptySource;

#[async_trait]
impl MetricsSource for EmptySource {
    async fn query(&self, _query: &str) -> Result<Vec<RawSeries>, SourceError> {
        Ok(Vec::new())
    }
}

async fn setup_test_app() -> (Router, HealthRegistry) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::DOCKER_SYNC).await;
    health_registry.register(components::STORE).await;

    let tokens = StaticTokens::new(vec![ApiToken {
        token: "secret".to_string(),
        username: "alice".to_string(),
        enabled: true,
    }]);
    let state = Arc::new(AppState::new(
        health_registry.clone(),
        Arc::new(EmptySource),
        Arc::new(tokens),
        StreamSettings {
            default_period_secs: 5,
            query_timeout: Duration::from_secs(10),
        },
    ));

    (create_router(state), health_registry)
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

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert!(json["components"][components::DOCKER_SYNC].is_object());
}

#[tokio::test]
async fn test_healthz_degraded_scope_still_ok() {
    let (app, health) = setup_test_app().await;
    health
        .set_degraded(components::DOCKER_SYNC, "sync failed for edge-1")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, health) = setup_test_app().await;
    health
        .set_unhealthy(components::STORE, "snapshot directory not writable")
        .await;

    let (status, _) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_waits_for_first_cycle() {
    let (app, health) = setup_test_app().await;

    let (status, body) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["ready"], false);
    assert!(json["reason"].is_string());

    health.set_ready(true).await;
    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_monitor_metrics() {
    let (app, _) = setup_test_app().await;
    let metrics = MonitorMetrics::new();
    metrics.observe_reconcile("docker", 0.25, 2, 1, 0);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("podwatch_reconcile_latency_seconds"));
    assert!(text.contains("podwatch_units_created_total"));
}

#[tokio::test]
async fn test_stream_route_requires_websocket_upgrade() {
    let (app, _) = setup_test_app().await;

    let (status, _) = get(app, "/ws/docker/metrics?token=secret&period=2").await;
    assert!(status.is_client_error());
    assert_ne!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (app, _) = setup_test_app().await;

    let (status, _) = get(app, "/api/v1/containers").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

async fn spawn_server(app: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_stream_rejects_bad_token_with_close_code() {
    use futures::StreamExt;
    use tokio_tungstenite::tungstenite::Message;

    let (app, _) = setup_test_app().await;
    let addr = spawn_server(app).await;

    let url = format!("ws://{}/ws/docker/metrics?token=wrong&period=1", addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("server did not answer")
        .expect("socket ended without a close frame")
        .unwrap();
    match first {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 4401);
            assert_eq!(frame.reason, "invalid token");
        }
        other => panic!("expected close frame, got {other:?}"),
    }

    while let Ok(Some(Ok(message))) =
        tokio::time::timeout(Duration::from_millis(200), ws.next()).await
    {
        assert!(!message.is_text(), "rejected client received data");
    }
}

#[tokio::test]
async fn test_stream_sends_metrics_frames_to_authenticated_client() {
    use futures::StreamExt;

    let (app, _) = setup_test_app().await;
    let addr = spawn_server(app).await;

    let url = format!("ws://{}/ws/docker/metrics?token=secret&period=1", addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
    assert!(json["ts"].is_i64());
    for key in ["cpu", "memory", "netrx", "nettx"] {
        assert!(json[key]["data"].as_array().unwrap().is_empty());
    }
}
