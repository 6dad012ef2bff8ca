//! HTTP API: health checks, Prometheus metrics and the live metric stream

use agent_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::{MonitorMetrics, StructuredLogger},
    stream::{IdentityResolver, MetricsSource, StreamFrame, StreamParams, StreamSession},
};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const FRAME_BUFFER: usize = 16;

/// Stream defaults applied to every session
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub default_period_secs: u64,
    pub query_timeout: Duration,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: MonitorMetrics,
    pub logger: StructuredLogger,
    pub source: Arc<dyn MetricsSource>,
    pub resolver: Arc<dyn IdentityResolver>,
    pub stream: StreamSettings,
    /// Parent of every session's cancellation token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        source: Arc<dyn MetricsSource>,
        resolver: Arc<dyn IdentityResolver>,
        stream: StreamSettings,
    ) -> Self {
        Self {
            health_registry,
            metrics: MonitorMetrics::new(),
            logger: StructuredLogger::new("podwatch"),
            source,
            resolver,
            stream,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once the first sync cycle ran
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
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    token: Option<String>,
    container: Option<String>,
    period: Option<String>,
}

/// `GET /ws/docker/metrics?token=..&container=..&period=..`
async fn docker_metrics_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<StreamQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let params = StreamParams::new(
        query.token,
        query.container,
        query.period.as_deref(),
        state.stream.default_period_secs,
    );
    ws.on_upgrade(move |socket| handle_stream(socket, params, state))
}

async fn handle_stream(mut socket: WebSocket, params: StreamParams, state: Arc<AppState>) {
    let mut session = StreamSession::new(params, state.source.clone())
        .with_query_timeout(state.stream.query_timeout);

    let identity = match session.authenticate(state.resolver.as_ref()).await {
        Ok(identity) => identity,
        Err(rejected) => {
            info!(reason = %rejected.reason, "Rejected stream connection");
            let close = Message::Close(Some(CloseFrame {
                code: rejected.code,
                reason: rejected.reason.into(),
            }));
            if let Err(e) = socket.send(close).await {
                debug!(error = %e, "Failed to send close frame");
            }
            return;
        }
    };

    state.logger.log_stream_opened(
        &identity.username,
        session.params().container.as_deref(),
        session.params().period.as_secs(),
    );

    let cancel = state.shutdown.child_token();
    let (frames_tx, mut frames_rx) = mpsc::channel::<StreamFrame>(FRAME_BUFFER);
    let session_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { session.run(frames_tx, cancel).await }
    });

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            frame = frames_rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sender.send(Message::Text(frame.to_json())).await {
                        debug!(error = %e, "Stream client write failed");
                        break;
                    }
                }
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    cancel.cancel();
    drop(frames_rx);
    match session_task.await {
        Ok(summary) => state.logger.log_stream_closed(
            &identity.username,
            summary.reason.as_str(),
            summary.ticks,
        ),
        Err(e) => warn!(error = %e, "Stream session task failed"),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/ws/docker/metrics", get(docker_metrics_ws))
        .with_state(state)
}

/// Start the API server; returns once `shutdown` is cancelled
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
