//! Docker runtime adapter backed by bollard

use super::{connect_first, AdapterError, ConnectError, ConnectionStrategy, RuntimeAdapter};
use crate::models::{
    BlockIoEntry, BlockOp, CounterSnapshot, CpuCounters, InterfaceCounters, NetworkInfo,
    RawStatsSnapshot, RawUnitDescriptor, RuntimeKind, UnitAction, UnitStatus,
};
use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, KillContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, Stats, StatsOptions, StopContainerOptions,
    RestartContainerOptions,
};
use bollard::models::{ContainerInspectResponse, ContainerSummary};
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::{DateTime, TimeZone, Utc};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Summary of a Docker engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub name: Option<String>,
    pub server_version: Option<String>,
    pub api_version: Option<String>,
    pub operating_system: Option<String>,
    pub architecture: Option<String>,
    pub cpus: i64,
    pub memory_total: i64,
    pub containers: i64,
    pub containers_running: i64,
    pub containers_paused: i64,
    pub containers_stopped: i64,
    pub images: i64,
}

/// Adapter for one Docker engine
#[derive(Clone)]
pub struct DockerAdapter {
    docker: Docker,
    strategy: ConnectionStrategy,
}

impl DockerAdapter {
    /// Connect using the first strategy that answers a ping
    pub async fn connect(
        strategies: &[ConnectionStrategy],
        timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let (docker, strategy) = connect_first(strategies, timeout, |strategy| async move {
            let docker = open(&strategy, timeout)?;
            docker.ping().await.map_err(|e| e.to_string())?;
            Ok(docker)
        })
        .await?;

        Ok(Self { docker, strategy })
    }

    /// Connect to a host described by URL, or auto-detect when empty
    pub async fn connect_descriptor(descriptor: &str, timeout: Duration) -> Result<Self, ConnectError> {
        Self::connect(&ConnectionStrategy::from_descriptor(descriptor), timeout).await
    }

    /// Strategy the connection was established with
    pub fn strategy(&self) -> &ConnectionStrategy {
        &self.strategy
    }

    pub async fn host_info(&self) -> Result<HostInfo, AdapterError> {
        let info = self.docker.info().await.map_err(classify)?;
        let version = self.docker.version().await.map_err(classify)?;

        Ok(HostInfo {
            name: info.name,
            server_version: info.server_version.or(version.version),
            api_version: version.api_version,
            operating_system: info.operating_system,
            architecture: info.architecture,
            cpus: info.ncpu.unwrap_or(0),
            memory_total: info.mem_total.unwrap_or(0),
            containers: info.containers.unwrap_or(0),
            containers_running: info.containers_running.unwrap_or(0),
            containers_paused: info.containers_paused.unwrap_or(0),
            containers_stopped: info.containers_stopped.unwrap_or(0),
            images: info.images.unwrap_or(0),
        })
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspectResponse, AdapterError> {
        self.docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(classify)
    }
}

fn open(strategy: &ConnectionStrategy, timeout: Duration) -> Result<Docker, String> {
    let secs = timeout.as_secs().max(1);
    let result = match strategy {
        ConnectionStrategy::PlatformDefault => Docker::connect_with_local_defaults(),
        #[cfg(unix)]
        ConnectionStrategy::LocalSocket(path) => {
            Docker::connect_with_unix(&path.to_string_lossy(), secs, API_DEFAULT_VERSION)
        }
        #[cfg(windows)]
        ConnectionStrategy::LocalSocket(path) => {
            Docker::connect_with_named_pipe(&path.to_string_lossy(), secs, API_DEFAULT_VERSION)
        }
        ConnectionStrategy::Http(url) => Docker::connect_with_http(url, secs, API_DEFAULT_VERSION),
    };
    result.map_err(|e| e.to_string())
}

fn classify(err: bollard::errors::Error) -> AdapterError {
    use bollard::errors::Error;
    match err {
        Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => AdapterError::NotFound(message),
        Error::DockerResponseServerError {
            status_code,
            message,
        } => AdapterError::Api(format!("{} ({})", message, status_code)),
        Error::JsonDataError { message, .. } => AdapterError::Malformed(message),
        Error::JsonSerdeError { err } => AdapterError::Malformed(err.to_string()),
        other => AdapterError::Connectivity(other.to_string()),
    }
}

/// Parse a Docker timestamp; the zero time means "never"
fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if value.is_empty() || value.starts_with("0001-01-01") {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Build a descriptor from a list entry
fn descriptor_from_summary(summary: &ContainerSummary) -> Option<RawUnitDescriptor> {
    let id = summary.id.as_deref().filter(|id| !id.is_empty())?;
    let name = summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| short_id(id).to_string());

    let mut desc = RawUnitDescriptor::new(
        id,
        name,
        UnitStatus::from_docker_state(summary.state.as_deref()),
    );
    desc.image = summary.image.clone();
    desc.image_id = summary.image_id.clone();
    desc.command = summary.command.clone();
    desc.created_at = summary
        .created
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    desc.labels = summary
        .labels
        .as_ref()
        .map(|l| l.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    if let Some(networks) = summary
        .network_settings
        .as_ref()
        .and_then(|ns| ns.networks.as_ref())
    {
        let mut names: Vec<String> = networks.keys().cloned().collect();
        names.sort();
        desc.network.ip_address = names
            .first()
            .and_then(|n| networks.get(n))
            .and_then(|ep| ep.ip_address.clone())
            .filter(|ip| !ip.is_empty());
        desc.network.networks = names;
    }

    if let Some(ports) = &summary.ports {
        for port in ports {
            let key = match &port.typ {
                Some(typ) => format!("{}/{}", port.private_port, typ),
                None => port.private_port.to_string(),
            };
            let bindings = desc.network.ports.entry(key).or_default();
            if let Some(public) = port.public_port {
                let ip = port.ip.as_deref().unwrap_or("0.0.0.0");
                bindings.push(format!("{}:{}", ip, public));
            }
        }
    }

    Some(desc)
}

/// Fill in the details only `inspect` returns
fn apply_inspect(desc: &mut RawUnitDescriptor, inspect: &ContainerInspectResponse) {
    if let Some(state) = &inspect.state {
        if let Some(status) = &state.status {
            desc.status = UnitStatus::from_docker_state(Some(&status.to_string()));
        }
        desc.started_at = parse_timestamp(state.started_at.as_deref());
        desc.finished_at = parse_timestamp(state.finished_at.as_deref());
    }
    if let Some(count) = inspect.restart_count {
        desc.restart_count = count.max(0) as u32;
    }
    if let Some(created) = parse_timestamp(inspect.created.as_deref()) {
        desc.created_at = Some(created);
    }
    if let Some(cmd) = inspect.config.as_ref().and_then(|c| c.cmd.as_ref()) {
        if !cmd.is_empty() {
            desc.command = Some(cmd.join(" "));
        }
    }

    let Some(settings) = &inspect.network_settings else {
        return;
    };
    if let Some(networks) = &settings.networks {
        let mut names: Vec<String> = networks.keys().cloned().collect();
        names.sort();
        if let Some(ip) = names
            .first()
            .and_then(|n| networks.get(n))
            .and_then(|ep| ep.ip_address.clone())
            .filter(|ip| !ip.is_empty())
        {
            desc.network.ip_address = Some(ip);
        }
        desc.network.networks = names;
    }
    if let Some(ports) = &settings.ports {
        let mut mapped = BTreeMap::new();
        for (port, bindings) in ports {
            let hosts = bindings
                .as_ref()
                .map(|bs| {
                    bs.iter()
                        .map(|b| {
                            format!(
                                "{}:{}",
                                b.host_ip.as_deref().unwrap_or("0.0.0.0"),
                                b.host_port.as_deref().unwrap_or("")
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();
            mapped.insert(port.clone(), hosts);
        }
        desc.network.ports = mapped;
    }
}

fn cpu_counters(stats: &bollard::container::CPUStats) -> Option<CpuCounters> {
    let system = stats.system_cpu_usage?;
    let online = stats
        .online_cpus
        .filter(|n| *n > 0)
        .or_else(|| {
            stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|per| per.len() as u64)
        })
        .unwrap_or(1);
    Some(CpuCounters {
        container_cpu_time: stats.cpu_usage.total_usage,
        system_cpu_time: system,
        online_cpus: online.min(u32::MAX as u64) as u32,
    })
}

/// Convert a one-shot stats response into raw counters
fn counters_from_stats(stats: &Stats) -> CounterSnapshot {
    let mut networks = BTreeMap::new();
    if let Some(ifaces) = &stats.networks {
        for (name, net) in ifaces {
            networks.insert(
                name.clone(),
                InterfaceCounters {
                    rx_bytes: net.rx_bytes,
                    tx_bytes: net.tx_bytes,
                    rx_packets: net.rx_packets,
                    tx_packets: net.tx_packets,
                },
            );
        }
    }

    let block_io = stats
        .blkio_stats
        .io_service_bytes_recursive
        .as_ref()
        .map(|entries| {
            entries
                .iter()
                .map(|e| BlockIoEntry {
                    op: BlockOp::parse(&e.op),
                    value: e.value,
                })
                .collect()
        })
        .unwrap_or_default();

    CounterSnapshot {
        cpu: cpu_counters(&stats.cpu_stats).unwrap_or_default(),
        previous_cpu: cpu_counters(&stats.precpu_stats),
        memory_usage: stats.memory_stats.usage.unwrap_or(0),
        memory_limit: stats.memory_stats.limit.unwrap_or(0),
        networks,
        block_io,
    }
}

#[async_trait]
impl RuntimeAdapter for DockerAdapter {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Docker
    }

    async fn list_units(&self) -> Result<Vec<RawUnitDescriptor>, AdapterError> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await
            .map_err(classify)?;

        let mut units = Vec::with_capacity(summaries.len());
        for summary in &summaries {
            let Some(mut desc) = descriptor_from_summary(summary) else {
                warn!("Skipping container without an id");
                continue;
            };
            match self.inspect(&desc.external_id).await {
                Ok(inspect) => apply_inspect(&mut desc, &inspect),
                Err(e) => warn!(
                    container = %desc.external_id,
                    error = %e,
                    "Inspect failed, keeping list data only"
                ),
            }
            units.push(desc);
        }

        debug!(count = units.len(), "Listed Docker containers");
        Ok(units)
    }

    async fn get_stats(&self, unit_id: &str) -> Result<Option<RawStatsSnapshot>, AdapterError> {
        let stats: Vec<Stats> = self
            .docker
            .stats(
                unit_id,
                Some(StatsOptions {
                    stream: false,
                    one_shot: false,
                }),
            )
            .take(1)
            .try_collect()
            .await
            .map_err(classify)?;

        Ok(stats
            .first()
            .map(|s| RawStatsSnapshot::Counters(counters_from_stats(s))))
    }

    async fn fetch_logs(
        &self,
        unit_id: &str,
        _container: Option<&str>,
        tail: usize,
    ) -> Result<String, AdapterError> {
        let chunks: Vec<_> = self
            .docker
            .logs(
                unit_id,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    timestamps: true,
                    tail: tail.to_string(),
                    ..Default::default()
                }),
            )
            .try_collect()
            .await
            .map_err(classify)?;

        Ok(chunks.iter().map(|c| c.to_string()).collect())
    }

    async fn perform_action(&self, unit_id: &str, action: UnitAction) -> Result<(), AdapterError> {
        let result = match action {
            UnitAction::Start => {
                self.docker
                    .start_container(unit_id, None::<StartContainerOptions<String>>)
                    .await
            }
            UnitAction::Stop => {
                self.docker
                    .stop_container(unit_id, None::<StopContainerOptions>)
                    .await
            }
            UnitAction::Restart => {
                self.docker
                    .restart_container(unit_id, None::<RestartContainerOptions>)
                    .await
            }
            UnitAction::Pause => self.docker.pause_container(unit_id).await,
            UnitAction::Unpause => self.docker.unpause_container(unit_id).await,
            UnitAction::Kill => {
                self.docker
                    .kill_container(unit_id, None::<KillContainerOptions<String>>)
                    .await
            }
            UnitAction::Remove => {
                self.docker
                    .remove_container(
                        unit_id,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await
            }
        };
        result.map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{
        ContainerConfig, ContainerState as DockerState, ContainerStateStatusEnum,
        ContainerSummaryNetworkSettings, EndpointSettings, NetworkSettings, Port, PortBinding,
    };
    use std::collections::HashMap;

    fn summary() -> ContainerSummary {
        let mut networks = HashMap::new();
        networks.insert(
            "bridge".to_string(),
            EndpointSettings {
                ip_address: Some("172.17.0.2".to_string()),
                ..Default::default()
            },
        );
        ContainerSummary {
            id: Some("4f1c2a9be7d3aa01".to_string()),
            names: Some(vec!["/web".to_string()]),
            image: Some("nginx:1.25".to_string()),
            state: Some("running".to_string()),
            created: Some(1_700_000_000),
            network_settings: Some(ContainerSummaryNetworkSettings {
                networks: Some(networks),
            }),
            ports: Some(vec![Port {
                ip: Some("0.0.0.0".to_string()),
                private_port: 80,
                public_port: Some(8080),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    #[test]
    fn test_descriptor_from_summary() {
        let desc = descriptor_from_summary(&summary()).unwrap();
        assert_eq!(desc.external_id, "4f1c2a9be7d3aa01");
        assert_eq!(desc.name, "web");
        assert_eq!(desc.status, UnitStatus::Running);
        assert_eq!(desc.network.ip_address.as_deref(), Some("172.17.0.2"));
        assert_eq!(desc.network.networks, vec!["bridge".to_string()]);
        assert_eq!(desc.network.ports["80"], vec!["0.0.0.0:8080".to_string()]);
        assert!(desc.created_at.is_some());
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_summary_without_names_falls_back_to_short_id() {
        let mut s = summary();
        s.names = None;
        let desc = descriptor_from_summary(&s).unwrap();
        assert_eq!(desc.name, "4f1c2a9be7d3");

        s.id = None;
        assert!(descriptor_from_summary(&s).is_none());
    }

    #[test]
    fn test_short_id_respects_char_boundaries() {
        assert_eq!(short_id("4f1c2a9be7d3e5f60718"), "4f1c2a9be7d3");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("ééééééééééééé"), "éééééééééééé");
        assert_eq!(short_id("abcdefghijké0"), "abcdefghijké");
    }

    #[test]
    fn test_apply_inspect_details() {
        let mut desc = descriptor_from_summary(&summary()).unwrap();

        let mut ports = HashMap::new();
        ports.insert(
            "80/tcp".to_string(),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some("8080".to_string()),
            }]),
        );
        ports.insert("443/tcp".to_string(), None);

        let inspect = ContainerInspectResponse {
            state: Some(DockerState {
                status: Some(ContainerStateStatusEnum::EXITED),
                started_at: Some("2024-03-01T10:00:00.123456789Z".to_string()),
                finished_at: Some("0001-01-01T00:00:00Z".to_string()),
                ..Default::default()
            }),
            restart_count: Some(3),
            config: Some(ContainerConfig {
                cmd: Some(vec!["nginx".to_string(), "-g".to_string(), "daemon off;".to_string()]),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        };

        apply_inspect(&mut desc, &inspect);
        assert_eq!(desc.status, UnitStatus::Exited);
        assert_eq!(desc.restart_count, 3);
        assert!(desc.started_at.is_some());
        assert!(desc.finished_at.is_none());
        assert_eq!(desc.command.as_deref(), Some("nginx -g daemon off;"));
        assert_eq!(desc.network.ports["80/tcp"], vec!["127.0.0.1:8080".to_string()]);
        assert!(desc.network.ports["443/tcp"].is_empty());
    }

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp(Some("2024-03-01T10:00:00Z")).is_some());
        assert!(parse_timestamp(Some("0001-01-01T00:00:00Z")).is_none());
        assert!(parse_timestamp(Some("")).is_none());
        assert!(parse_timestamp(Some("yesterday")).is_none());
        assert!(parse_timestamp(None).is_none());
    }

    #[test]
    fn test_classify_errors() {
        let not_found = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container: x".to_string(),
        };
        assert!(matches!(classify(not_found), AdapterError::NotFound(_)));

        let conflict = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "is not running".to_string(),
        };
        assert!(matches!(classify(conflict), AdapterError::Api(_)));

        let timeout = bollard::errors::Error::RequestTimeoutError;
        assert!(classify(timeout).is_connectivity());
    }
}
