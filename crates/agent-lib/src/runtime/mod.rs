//! Container runtime adapters
//!
//! One adapter per runtime (Docker, Kubernetes) normalizes enumeration,
//! stats, logs and lifecycle actions into the shapes in [`crate::models`].
//! Adapters tolerate partial data: missing optional attributes default to
//! zero or empty instead of failing the call.

mod connect;
pub mod docker;
pub mod kubernetes;
pub mod quantity;

pub use connect::{connect_first, AttemptFailure, ConnectError, ConnectionStrategy, KubeStrategy};
pub use docker::{DockerAdapter, HostInfo};
pub use kubernetes::KubernetesAdapter;

use crate::models::{
    EventType, RawStatsSnapshot, RawUnitDescriptor, RuntimeKind, UnitAction,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Errors returned by runtime adapters
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The runtime could not be reached at all
    #[error("runtime unreachable: {0}")]
    Connectivity(String),
    #[error("unit `{0}` not found")]
    NotFound(String),
    #[error("action `{action}` is not supported by the {runtime} runtime")]
    UnsupportedAction {
        action: UnitAction,
        runtime: RuntimeKind,
    },
    #[error("malformed runtime data: {0}")]
    Malformed(String),
    #[error("runtime API error: {0}")]
    Api(String),
}

impl AdapterError {
    /// Connectivity failures abort a whole reconciliation pass
    pub fn is_connectivity(&self) -> bool {
        matches!(self, AdapterError::Connectivity(_))
    }
}

/// Capability interface shared by every runtime
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    fn kind(&self) -> RuntimeKind;

    /// Enumerate every unit in the scope, including stopped ones
    async fn list_units(&self) -> Result<Vec<RawUnitDescriptor>, AdapterError>;

    /// Fetch stats for one unit. `Ok(None)` means the runtime has none.
    async fn get_stats(&self, unit_id: &str) -> Result<Option<RawStatsSnapshot>, AdapterError>;

    /// Fetch the last `tail` log lines of a unit (or of one of its containers)
    async fn fetch_logs(
        &self,
        unit_id: &str,
        container: Option<&str>,
        tail: usize,
    ) -> Result<String, AdapterError>;

    async fn perform_action(&self, unit_id: &str, action: UnitAction) -> Result<(), AdapterError>;
}

/// Namespace as enumerated from a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDescriptor {
    pub name: String,
    pub status: String,
}

/// Cluster event as enumerated from a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub namespace: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub involved_object_kind: String,
    pub involved_object_name: String,
    pub count: u32,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Cluster-level resources beyond workload units
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceDescriptor>, AdapterError>;

    async fn list_events(&self, limit: u32) -> Result<Vec<EventDescriptor>, AdapterError>;
}

/// Split a pod unit id (`namespace/name`)
pub fn split_pod_id(unit_id: &str) -> Result<(&str, &str), AdapterError> {
    match unit_id.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok((ns, name)),
        _ => Err(AdapterError::Malformed(format!(
            "pod id `{}` is not of the form namespace/name",
            unit_id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pod_id() {
        assert_eq!(split_pod_id("default/web-1").unwrap(), ("default", "web-1"));
        assert!(split_pod_id("web-1").is_err());
        assert!(split_pod_id("/web-1").is_err());
        assert!(split_pod_id("default/").is_err());
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(AdapterError::Connectivity("refused".into()).is_connectivity());
        assert!(!AdapterError::NotFound("abc".into()).is_connectivity());
    }
}
