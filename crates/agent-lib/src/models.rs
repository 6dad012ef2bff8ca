//! Core data models for the container state monitor
//!
//! Runtime-agnostic shapes shared by the adapters, the reconciliation
//! engine and the state store. Adapters produce `RawUnitDescriptor`s and
//! `RawStatsSnapshot`s; the engine turns them into persisted records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Container runtime that owns a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Docker,
    Kubernetes,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::Docker => f.write_str("docker"),
            RuntimeKind::Kubernetes => f.write_str("kubernetes"),
        }
    }
}

/// Identifier of a Docker host or Kubernetes cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId {
    pub kind: RuntimeKind,
    pub name: String,
}

impl ScopeId {
    pub fn docker(name: impl Into<String>) -> Self {
        Self {
            kind: RuntimeKind::Docker,
            name: name.into(),
        }
    }

    pub fn kubernetes(name: impl Into<String>) -> Self {
        Self {
            kind: RuntimeKind::Kubernetes,
            name: name.into(),
        }
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Lifecycle status of a workload unit
///
/// The first five variants are Kubernetes pod phases, the rest are
/// Docker container states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
    Created,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl UnitStatus {
    /// Map a Kubernetes pod phase. Unrecognized phases map to `Unknown`.
    pub fn from_pod_phase(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => UnitStatus::Pending,
            Some("Running") => UnitStatus::Running,
            Some("Succeeded") => UnitStatus::Succeeded,
            Some("Failed") => UnitStatus::Failed,
            _ => UnitStatus::Unknown,
        }
    }

    /// Map a Docker container state string (`running`, `exited`, ...).
    pub fn from_docker_state(state: Option<&str>) -> Self {
        match state.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("created") => UnitStatus::Created,
            Some("running") => UnitStatus::Running,
            Some("paused") => UnitStatus::Paused,
            Some("restarting") => UnitStatus::Restarting,
            Some("removing") => UnitStatus::Removing,
            Some("exited") => UnitStatus::Exited,
            Some("dead") => UnitStatus::Dead,
            _ => UnitStatus::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, UnitStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Running => "running",
            UnitStatus::Succeeded => "succeeded",
            UnitStatus::Failed => "failed",
            UnitStatus::Unknown => "unknown",
            UnitStatus::Created => "created",
            UnitStatus::Paused => "paused",
            UnitStatus::Restarting => "restarting",
            UnitStatus::Removing => "removing",
            UnitStatus::Exited => "exited",
            UnitStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a container nested inside a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Waiting,
    Terminated,
    Unknown,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Running => "running",
            ContainerState::Waiting => "waiting",
            ContainerState::Terminated => "terminated",
            ContainerState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network attributes of a unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub ip_address: Option<String>,
    pub host_ip: Option<String>,
    pub node_name: Option<String>,
    #[serde(default)]
    pub networks: Vec<String>,
    /// container port -> list of `host_ip:host_port` bindings
    #[serde(default)]
    pub ports: BTreeMap<String, Vec<String>>,
}

/// A container inside a pod, as enumerated by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubUnitDescriptor {
    pub name: String,
    pub image: String,
    pub image_id: Option<String>,
    pub ready: bool,
    pub restart_count: u32,
    pub state: ContainerState,
}

/// One unit (pod or Docker container) as enumerated by a runtime adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUnitDescriptor {
    /// Key within the scope: the Docker container id, or `namespace/name`
    /// for pods.
    pub external_id: String,
    pub name: String,
    pub namespace: Option<String>,
    pub image: Option<String>,
    pub image_id: Option<String>,
    pub status: UnitStatus,
    pub restart_count: u32,
    pub network: NetworkInfo,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
    pub command: Option<String>,
    pub sub_units: Vec<SubUnitDescriptor>,
}

impl RawUnitDescriptor {
    /// Minimal descriptor with every optional attribute defaulted
    pub fn new(external_id: impl Into<String>, name: impl Into<String>, status: UnitStatus) -> Self {
        Self {
            external_id: external_id.into(),
            name: name.into(),
            namespace: None,
            image: None,
            image_id: None,
            status,
            restart_count: 0,
            network: NetworkInfo::default(),
            created_at: None,
            started_at: None,
            finished_at: None,
            labels: BTreeMap::new(),
            command: None,
            sub_units: Vec::new(),
        }
    }

    /// Check the descriptor can be persisted
    pub fn validate(&self) -> Result<(), String> {
        if self.external_id.trim().is_empty() {
            return Err("missing external identifier".to_string());
        }
        if self.name.trim().is_empty() {
            return Err(format!("unit `{}` has an empty name", self.external_id));
        }
        let mut seen = std::collections::HashSet::new();
        for sub in &self.sub_units {
            if sub.name.trim().is_empty() {
                return Err(format!(
                    "unit `{}` has a container with an empty name",
                    self.external_id
                ));
            }
            if !seen.insert(sub.name.as_str()) {
                return Err(format!(
                    "unit `{}` lists container `{}` twice",
                    self.external_id, sub.name
                ));
            }
        }
        Ok(())
    }
}

/// Cumulative CPU counters at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuCounters {
    /// Total CPU time consumed by the container (ns)
    pub container_cpu_time: u64,
    /// Total CPU time of the host (ns)
    pub system_cpu_time: u64,
    pub online_cpus: u32,
}

/// Per-interface network counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
}

/// Block I/O operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockOp {
    Read,
    Write,
    Other,
}

impl BlockOp {
    pub fn parse(op: &str) -> Self {
        match op.to_ascii_lowercase().as_str() {
            "read" => BlockOp::Read,
            "write" => BlockOp::Write,
            _ => BlockOp::Other,
        }
    }
}

/// One block I/O entry as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIoEntry {
    pub op: BlockOp,
    pub value: u64,
}

/// Raw counter snapshot for a Docker container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub cpu: CpuCounters,
    /// CPU counters from the previous read, when the runtime provides them
    pub previous_cpu: Option<CpuCounters>,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub networks: BTreeMap<String, InterfaceCounters>,
    pub block_io: Vec<BlockIoEntry>,
}

/// Usage already rated by the runtime (Kubernetes metrics API)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub container: String,
    pub cpu_millicores: f64,
    pub memory_bytes: u64,
}

/// Stats for one unit as returned by an adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawStatsSnapshot {
    Counters(CounterSnapshot),
    Usage(Vec<ContainerUsage>),
}

/// Actions that can be performed on a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitAction {
    Start,
    Stop,
    Restart,
    Pause,
    Unpause,
    Kill,
    Remove,
}

impl std::str::FromStr for UnitAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(UnitAction::Start),
            "stop" => Ok(UnitAction::Stop),
            "restart" => Ok(UnitAction::Restart),
            "pause" => Ok(UnitAction::Pause),
            "unpause" => Ok(UnitAction::Unpause),
            "kill" => Ok(UnitAction::Kill),
            "remove" => Ok(UnitAction::Remove),
            other => Err(format!("Unknown action: {}", other)),
        }
    }
}

impl fmt::Display for UnitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitAction::Start => "start",
            UnitAction::Stop => "stop",
            UnitAction::Restart => "restart",
            UnitAction::Pause => "pause",
            UnitAction::Unpause => "unpause",
            UnitAction::Kill => "kill",
            UnitAction::Remove => "remove",
        };
        f.write_str(s)
    }
}

/// Persisted sub-unit (container within a pod)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubUnitRecord {
    pub name: String,
    pub image: String,
    pub image_id: Option<String>,
    pub ready: bool,
    pub restart_count: u32,
    pub state: ContainerState,
}

impl From<&SubUnitDescriptor> for SubUnitRecord {
    fn from(d: &SubUnitDescriptor) -> Self {
        Self {
            name: d.name.clone(),
            image: d.image.clone(),
            image_id: d.image_id.clone(),
            ready: d.ready,
            restart_count: d.restart_count,
            state: d.state,
        }
    }
}

/// Persisted workload unit (pod or Docker container)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub scope: ScopeId,
    pub external_id: String,
    pub name: String,
    pub namespace: Option<String>,
    pub image: Option<String>,
    pub image_id: Option<String>,
    pub status: UnitStatus,
    pub restart_count: u32,
    pub network: NetworkInfo,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
    pub command: Option<String>,
    pub sub_units: Vec<SubUnitRecord>,
}

impl UnitRecord {
    pub fn from_descriptor(scope: &ScopeId, d: &RawUnitDescriptor) -> Self {
        Self {
            scope: scope.clone(),
            external_id: d.external_id.clone(),
            name: d.name.clone(),
            namespace: d.namespace.clone(),
            image: d.image.clone(),
            image_id: d.image_id.clone(),
            status: d.status,
            restart_count: d.restart_count,
            network: d.network.clone(),
            created_at: d.created_at,
            started_at: d.started_at,
            finished_at: d.finished_at,
            labels: d.labels.clone(),
            command: d.command.clone(),
            sub_units: d.sub_units.iter().map(SubUnitRecord::from).collect(),
        }
    }
}

/// Persisted Kubernetes namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRecord {
    pub cluster: String,
    pub name: String,
    pub status: String,
}

/// Key of a persisted metric sample's owner
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleOwner {
    pub scope: ScopeId,
    pub unit_id: String,
    /// Set when the sample belongs to a container inside a pod
    pub sub_unit: Option<String>,
}

/// CPU usage in the unit the source reports it in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "lowercase")]
pub enum CpuUsage {
    Percent(f64),
    Millicores(f64),
}

/// Immutable point-in-time metric sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub owner: SampleOwner,
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuUsage,
    pub cpu_total_usage: u64,
    pub cpu_system_usage: u64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub memory_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub network_rx_packets: u64,
    pub network_tx_packets: u64,
    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
}

/// Severity of an extracted incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentLevel {
    Error,
    Warning,
    Critical,
}

impl Default for IncidentLevel {
    fn default() -> Self {
        IncidentLevel::Error
    }
}

impl fmt::Display for IncidentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentLevel::Error => f.write_str("Error"),
            IncidentLevel::Warning => f.write_str("Warning"),
            IncidentLevel::Critical => f.write_str("Critical"),
        }
    }
}

/// Error block extracted from container logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub source_type: RuntimeKind,
    pub container_id: String,
    pub container_name: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// First line of `message`, at most 1024 characters
    pub summary: String,
    pub level: IncidentLevel,
    pub service_name: Option<String>,
}

/// Kubernetes event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
    Error,
}

impl EventType {
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("Warning") => EventType::Warning,
            Some("Error") => EventType::Error,
            _ => EventType::Normal,
        }
    }
}

/// Upsert key of a Kubernetes event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub cluster: String,
    pub namespace: String,
    pub reason: String,
    pub involved_object_name: String,
    pub first_timestamp: Option<DateTime<Utc>>,
}

/// Persisted Kubernetes event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub key: EventKey,
    pub event_type: EventType,
    pub message: String,
    pub involved_object_kind: String,
    pub count: u32,
    pub last_timestamp: Option<DateTime<Utc>>,
}
