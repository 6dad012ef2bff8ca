//! Per-connection streaming session

use super::auth::{Identity, IdentityResolver, SessionRejected};
use super::labels::{build_query, to_points};
use super::{Dimension, MetricsPayload, MetricsSource, RawSeries, SeriesData, StreamFrame};
use crate::observability::MonitorMetrics;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_PERIOD_SECS: u64 = 5;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection parameters as supplied by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub token: Option<String>,
    /// Substring filter on container names
    pub container: Option<String>,
    pub period: Duration,
}

impl StreamParams {
    /// A missing, unparsable or zero `period` falls back to `default_period_secs`
    pub fn new(
        token: Option<String>,
        container: Option<String>,
        period: Option<&str>,
        default_period_secs: u64,
    ) -> Self {
        let secs = period
            .and_then(|p| p.trim().parse::<u64>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or_else(|| default_period_secs.max(1));
        Self {
            token: token.filter(|t| !t.is_empty()),
            container: container
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            period: Duration::from_secs(secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Streaming,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Never authenticated
    Rejected,
    Cancelled,
    /// The frame sink was dropped
    ClientGone,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Rejected => "rejected",
            CloseReason::Cancelled => "cancelled",
            CloseReason::ClientGone => "client_gone",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub ticks: u64,
    pub reason: CloseReason,
}

/// One client's stream
///
/// `Connecting -> Authenticating -> Streaming -> Closed`, or straight to
/// `Closed` when the credential is rejected. Every tick runs the four
/// dimension queries concurrently, each bounded by the query timeout.
pub struct StreamSession {
    params: StreamParams,
    source: Arc<dyn MetricsSource>,
    query_timeout: Duration,
    state: SessionState,
    identity: Option<Identity>,
    metrics: MonitorMetrics,
}

impl StreamSession {
    pub fn new(params: StreamParams, source: Arc<dyn MetricsSource>) -> Self {
        Self {
            params,
            source,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            state: SessionState::Connecting,
            identity: None,
            metrics: MonitorMetrics::new(),
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    /// Resolve the connection token; no data flows until this succeeds
    pub async fn authenticate(
        &mut self,
        resolver: &dyn IdentityResolver,
    ) -> Result<Identity, SessionRejected> {
        self.state = SessionState::Authenticating;

        let Some(token) = self.params.token.clone() else {
            self.state = SessionState::Closed;
            return Err(SessionRejected::unauthenticated("missing token"));
        };

        match resolver.resolve(&token).await {
            Some(identity) => {
                self.identity = Some(identity.clone());
                self.state = SessionState::Streaming;
                Ok(identity)
            }
            None => {
                self.state = SessionState::Closed;
                Err(SessionRejected::unauthenticated("invalid token"))
            }
        }
    }

    /// Emit one frame per period until cancelled or the sink goes away
    ///
    /// Cancellation is observed while a tick is in flight, while sending and
    /// while sleeping. An in-flight tick is dropped without emitting.
    pub async fn run(
        &mut self,
        sink: mpsc::Sender<StreamFrame>,
        cancel: CancellationToken,
    ) -> SessionSummary {
        if self.state != SessionState::Streaming {
            self.state = SessionState::Closed;
            return SessionSummary {
                ticks: 0,
                reason: CloseReason::Rejected,
            };
        }

        self.metrics.stream_opened();
        let mut ticks = 0u64;

        let reason = loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break CloseReason::Cancelled,
                frame = self.tick() => frame,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break CloseReason::Cancelled,
                sent = sink.send(frame) => {
                    if sent.is_err() {
                        break CloseReason::ClientGone;
                    }
                }
            }
            ticks += 1;
            self.metrics.inc_stream_ticks();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break CloseReason::Cancelled,
                _ = sink.closed() => break CloseReason::ClientGone,
                _ = tokio::time::sleep(self.params.period) => {}
            }
        };

        self.state = SessionState::Closed;
        self.metrics.stream_closed();
        debug!(ticks = ticks, reason = reason.as_str(), "Stream session ended");

        SessionSummary { ticks, reason }
    }

    async fn tick(&self) -> StreamFrame {
        let ts = Utc::now().timestamp_millis();
        let queries = Dimension::ALL.map(|d| self.query_dimension(d));
        let results = futures::future::join_all(queries).await;

        let compose = || {
            let mut results = results.into_iter().map(to_points);
            let mut next = || SeriesData {
                data: results.next().unwrap_or_default(),
            };
            MetricsPayload {
                ts,
                cpu: next(),
                memory: next(),
                netrx: next(),
                nettx: next(),
            }
        };
        match std::panic::catch_unwind(AssertUnwindSafe(compose)) {
            Ok(payload) => StreamFrame::Metrics(payload),
            Err(panic) => {
                let error = panic_message(panic.as_ref());
                warn!(error = %error, "Stream tick failed");
                StreamFrame::Error { error }
            }
        }
    }

    /// One dimension's series; any failure yields an empty list
    async fn query_dimension(&self, dimension: Dimension) -> Vec<RawSeries> {
        let query = build_query(dimension, self.params.container.as_deref());
        let guarded = AssertUnwindSafe(self.source.query(&query)).catch_unwind();
        let failure = match tokio::time::timeout(self.query_timeout, guarded).await {
            Ok(Ok(Ok(series))) => return series,
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(panic)) => format!("query panicked: {}", panic_message(panic.as_ref())),
            Err(_) => format!("timed out after {}s", self.query_timeout.as_secs()),
        };
        warn!(dimension = %dimension, error = %failure, "Metrics query failed");
        self.metrics.inc_stream_query_failures(dimension.key());
        Vec::new()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "tick panicked".to_string()
    }
}
