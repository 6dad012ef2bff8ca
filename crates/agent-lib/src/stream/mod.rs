//! Live metric streaming
//!
//! One [`StreamSession`] per connected client. Every tick it queries an
//! external metrics source for four dimensions in parallel, normalizes the
//! series names and emits one merged [`MetricsPayload`]. A failed dimension
//! yields an empty list; it never aborts the tick.

mod auth;
mod labels;
mod prometheus;
mod session;


pub use auth::{ApiToken, Identity, IdentityResolver, SessionRejected, StaticTokens, REJECT_CODE};
pub use labels::{build_query, display_name, to_points};
pub use prometheus::PrometheusSource;
pub use session::{
    CloseReason, SessionState, SessionSummary, StreamParams, StreamSession, DEFAULT_PERIOD_SECS,
    DEFAULT_QUERY_TIMEOUT,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four streamed metric dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Cpu,
    Memory,
    NetRx,
    NetTx,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Cpu,
        Dimension::Memory,
        Dimension::NetRx,
        Dimension::NetTx,
    ];

    /// Payload key
    pub fn key(&self) -> &'static str {
        match self {
            Dimension::Cpu => "cpu",
            Dimension::Memory => "memory",
            Dimension::NetRx => "netrx",
            Dimension::NetTx => "nettx",
        }
    }

    /// Unfiltered PromQL for this dimension
    pub fn base_query(&self) -> &'static str {
        match self {
            Dimension::Cpu => r#"rate(container_cpu_usage_seconds_total{image!="",name!=""}[1m])"#,
            Dimension::Memory => r#"container_memory_working_set_bytes{image!="",name!=""}"#,
            Dimension::NetRx => {
                r#"rate(container_network_receive_bytes_total{image!="",name!=""}[1m])"#
            }
            Dimension::NetTx => {
                r#"rate(container_network_transmit_bytes_total{image!="",name!=""}[1m])"#
            }
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One series as returned by the source, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawSeries {
    /// Raw container label (`unknown` when the series has none)
    pub label: String,
    pub value: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("metrics source request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metrics source rejected the query: {0}")]
    Query(String),
    #[error("malformed metrics source response: {0}")]
    Malformed(String),
}

/// Read-only instant-query interface to an external metrics source
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn query(&self, query: &str) -> Result<Vec<RawSeries>, SourceError>;
}

/// A normalized `{name, value}` point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesData {
    pub data: Vec<SeriesPoint>,
}

/// One tick's merged payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsPayload {
    /// Epoch milliseconds
    pub ts: i64,
    pub cpu: SeriesData,
    pub memory: SeriesData,
    pub netrx: SeriesData,
    pub nettx: SeriesData,
}

/// A message sent to a streaming client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamFrame {
    Metrics(MetricsPayload),
    Error { error: String },
}

impl StreamFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"cannot encode frame: {}"}}"#, e))
    }
}
