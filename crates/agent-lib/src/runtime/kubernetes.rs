//! Kubernetes runtime adapter backed by kube-rs
//!
//! Pods are the units and their containers the sub-units. Unit ids are
//! `namespace/name`. Usage comes from the `metrics.k8s.io` API; a cluster
//! without metrics-server simply reports no stats.

use super::quantity::{parse_cpu_millicores, parse_memory_bytes};
use super::{
    connect_first, split_pod_id, AdapterError, ClusterInventory, ConnectError, EventDescriptor,
    KubeStrategy, NamespaceDescriptor, RuntimeAdapter,
};
use crate::models::{
    ContainerState, ContainerUsage, EventType, NetworkInfo, RawStatsSnapshot, RawUnitDescriptor,
    RuntimeKind, SubUnitDescriptor, UnitAction, UnitStatus,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ContainerStatus, Event, Namespace, Pod};
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, LogParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const METRICS_GROUP: &str = "metrics.k8s.io";
const METRICS_VERSION: &str = "v1beta1";

/// Adapter for one Kubernetes cluster
#[derive(Clone)]
pub struct KubernetesAdapter {
    client: Client,
    cluster: String,
    strategy: KubeStrategy,
}

impl KubernetesAdapter {
    /// Connect using the first strategy whose API server answers
    pub async fn connect(
        cluster: impl Into<String>,
        strategies: &[KubeStrategy],
        timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let (client, strategy) = connect_first(strategies, timeout, |strategy| async move {
            let config = build_config(&strategy).await?;
            let client = Client::try_from(config).map_err(|e| e.to_string())?;
            client.apiserver_version().await.map_err(|e| e.to_string())?;
            Ok(client)
        })
        .await?;

        Ok(Self {
            client,
            cluster: cluster.into(),
            strategy,
        })
    }

    /// Wrap an already configured client
    pub fn from_client(cluster: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            cluster: cluster.into(),
            strategy: KubeStrategy::Inferred,
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn strategy(&self) -> &KubeStrategy {
        &self.strategy
    }

    fn pod_api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn metrics_api(&self, namespace: &str) -> Api<DynamicObject> {
        let resource = ApiResource {
            group: METRICS_GROUP.to_string(),
            version: METRICS_VERSION.to_string(),
            api_version: format!("{}/{}", METRICS_GROUP, METRICS_VERSION),
            kind: "PodMetrics".to_string(),
            plural: "pods".to_string(),
        };
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

async fn build_config(strategy: &KubeStrategy) -> Result<Config, String> {
    match strategy {
        KubeStrategy::Kubeconfig { path, context } => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| e.to_string())?;
            let options = KubeConfigOptions {
                context: context.clone(),
                ..Default::default()
            };
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| e.to_string())
        }
        KubeStrategy::InCluster => Config::incluster().map_err(|e| e.to_string()),
        KubeStrategy::Inferred => Config::infer().await.map_err(|e| e.to_string()),
    }
}

fn classify(err: kube::Error) -> AdapterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => AdapterError::NotFound(resp.message),
        kube::Error::Api(resp) => {
            AdapterError::Api(format!("{} ({} {})", resp.message, resp.code, resp.reason))
        }
        kube::Error::SerdeError(e) => AdapterError::Malformed(e.to_string()),
        other => AdapterError::Connectivity(other.to_string()),
    }
}

fn container_state(status: &ContainerStatus) -> ContainerState {
    match &status.state {
        Some(s) if s.running.is_some() => ContainerState::Running,
        Some(s) if s.waiting.is_some() => ContainerState::Waiting,
        Some(s) if s.terminated.is_some() => ContainerState::Terminated,
        _ => ContainerState::Unknown,
    }
}

/// Convert a pod into a unit descriptor
fn pod_descriptor(pod: &Pod) -> Option<RawUnitDescriptor> {
    let name = pod.metadata.name.clone()?;
    let namespace = pod
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let status = pod.status.as_ref();

    let mut desc = RawUnitDescriptor::new(
        format!("{}/{}", namespace, name),
        name,
        UnitStatus::from_pod_phase(status.and_then(|s| s.phase.as_deref())),
    );
    desc.namespace = Some(namespace);
    desc.created_at = pod.metadata.creation_timestamp.as_ref().map(|t| t.0);
    desc.started_at = status.and_then(|s| s.start_time.as_ref()).map(|t| t.0);
    desc.labels = pod.metadata.labels.clone().unwrap_or_default();
    desc.network = NetworkInfo {
        ip_address: status.and_then(|s| s.pod_ip.clone()),
        host_ip: status.and_then(|s| s.host_ip.clone()),
        node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        ..Default::default()
    };

    let statuses = status
        .and_then(|s| s.container_statuses.as_ref())
        .filter(|cs| !cs.is_empty());
    desc.sub_units = match statuses {
        Some(statuses) => statuses
            .iter()
            .map(|cs| SubUnitDescriptor {
                name: cs.name.clone(),
                image: cs.image.clone(),
                image_id: Some(cs.image_id.clone()).filter(|id| !id.is_empty()),
                ready: cs.ready,
                restart_count: cs.restart_count.max(0) as u32,
                state: container_state(cs),
            })
            .collect(),
        // Not scheduled yet: fall back to the declared containers
        None => pod
            .spec
            .as_ref()
            .map(|spec| {
                spec.containers
                    .iter()
                    .map(|c| SubUnitDescriptor {
                        name: c.name.clone(),
                        image: c.image.clone().unwrap_or_default(),
                        image_id: None,
                        ready: false,
                        restart_count: 0,
                        state: ContainerState::Unknown,
                    })
                    .collect()
            })
            .unwrap_or_default(),
    };

    desc.restart_count = desc.sub_units.iter().map(|s| s.restart_count).sum();
    desc.image = desc
        .sub_units
        .first()
        .map(|s| s.image.clone())
        .filter(|i| !i.is_empty());
    desc.image_id = desc.sub_units.first().and_then(|s| s.image_id.clone());

    Some(desc)
}

fn event_descriptor(event: &Event) -> EventDescriptor {
    let namespace = event
        .metadata
        .namespace
        .clone()
        .or_else(|| event.involved_object.namespace.clone())
        .unwrap_or_else(|| "default".to_string());

    EventDescriptor {
        namespace,
        event_type: EventType::parse(event.type_.as_deref()),
        reason: event.reason.clone().unwrap_or_default(),
        message: event.message.clone().unwrap_or_default(),
        involved_object_kind: event.involved_object.kind.clone().unwrap_or_default(),
        involved_object_name: event.involved_object.name.clone().unwrap_or_default(),
        count: event
            .count
            .filter(|c| *c > 0)
            .map(|c| c as u32)
            .unwrap_or(1),
        first_timestamp: event
            .first_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.event_time.as_ref().map(|t| t.0)),
        last_timestamp: event.last_timestamp.as_ref().map(|t| t.0),
    }
}

#[derive(Debug, Deserialize)]
struct ContainerMetrics {
    name: String,
    #[serde(default)]
    usage: std::collections::BTreeMap<String, String>,
}

/// Parse the `containers` array of a PodMetrics object
fn usage_from_metrics(data: &serde_json::Value) -> Result<Vec<ContainerUsage>, AdapterError> {
    let Some(containers) = data.get("containers") else {
        return Ok(Vec::new());
    };
    let containers: Vec<ContainerMetrics> = serde_json::from_value(containers.clone())
        .map_err(|e| AdapterError::Malformed(format!("pod metrics: {}", e)))?;

    Ok(containers
        .into_iter()
        .map(|c| ContainerUsage {
            cpu_millicores: c
                .usage
                .get("cpu")
                .and_then(|q| parse_cpu_millicores(q))
                .unwrap_or(0.0),
            memory_bytes: c
                .usage
                .get("memory")
                .and_then(|q| parse_memory_bytes(q))
                .unwrap_or(0),
            container: c.name,
        })
        .collect())
}

#[async_trait]
impl RuntimeAdapter for KubernetesAdapter {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Kubernetes
    }

    async fn list_units(&self) -> Result<Vec<RawUnitDescriptor>, AdapterError> {
        let pods = Api::<Pod>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(classify)?;

        let mut units = Vec::with_capacity(pods.items.len());
        for pod in &pods.items {
            match pod_descriptor(pod) {
                Some(desc) => units.push(desc),
                None => warn!(cluster = %self.cluster, "Skipping pod without a name"),
            }
        }

        debug!(cluster = %self.cluster, count = units.len(), "Listed pods");
        Ok(units)
    }

    async fn get_stats(&self, unit_id: &str) -> Result<Option<RawStatsSnapshot>, AdapterError> {
        let (namespace, name) = split_pod_id(unit_id)?;

        match self.metrics_api(namespace).get(name).await {
            Ok(obj) => Ok(Some(RawStatsSnapshot::Usage(usage_from_metrics(&obj.data)?))),
            // No metrics-server, or the pod has not been scraped yet
            Err(kube::Error::Api(resp)) if resp.code == 404 || resp.code == 503 => {
                debug!(pod = %unit_id, code = resp.code, "Pod metrics unavailable");
                Ok(None)
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn fetch_logs(
        &self,
        unit_id: &str,
        container: Option<&str>,
        tail: usize,
    ) -> Result<String, AdapterError> {
        let (namespace, name) = split_pod_id(unit_id)?;
        let params = LogParams {
            container: container.map(str::to_string),
            tail_lines: Some(tail as i64),
            timestamps: true,
            ..Default::default()
        };
        self.pod_api(namespace)
            .logs(name, &params)
            .await
            .map_err(classify)
    }

    async fn perform_action(&self, unit_id: &str, action: UnitAction) -> Result<(), AdapterError> {
        let (namespace, name) = split_pod_id(unit_id)?;
        match action {
            // Deleting a managed pod makes its controller recreate it
            UnitAction::Restart | UnitAction::Remove => {
                self.pod_api(namespace)
                    .delete(name, &DeleteParams::default())
                    .await
                    .map_err(classify)?;
                Ok(())
            }
            other => Err(AdapterError::UnsupportedAction {
                action: other,
                runtime: RuntimeKind::Kubernetes,
            }),
        }
    }
}

#[async_trait]
impl ClusterInventory for KubernetesAdapter {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceDescriptor>, AdapterError> {
        let namespaces = Api::<Namespace>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(classify)?;

        Ok(namespaces
            .items
            .iter()
            .filter_map(|ns| {
                Some(NamespaceDescriptor {
                    name: ns.metadata.name.clone()?,
                    status: ns
                        .status
                        .as_ref()
                        .and_then(|s| s.phase.clone())
                        .unwrap_or_else(|| "Unknown".to_string()),
                })
            })
            .collect())
    }

    async fn list_events(&self, limit: u32) -> Result<Vec<EventDescriptor>, AdapterError> {
        let events = Api::<Event>::all(self.client.clone())
            .list(&ListParams::default().limit(limit))
            .await
            .map_err(classify)?;

        Ok(events.items.iter().map(event_descriptor).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, ContainerStateRunning, ContainerStateWaiting, ObjectReference, PodSpec,
        PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use k8s_openapi::api::core::v1::ContainerState as K8sContainerState;

    fn status(name: &str, restarts: i32, running: bool) -> ContainerStatus {
        let state = if running {
            K8sContainerState {
                running: Some(ContainerStateRunning::default()),
                ..Default::default()
            }
        } else {
            K8sContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some("CrashLoopBackOff".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }
        };
        ContainerStatus {
            name: name.to_string(),
            image: format!("registry/{}:1", name),
            image_id: String::new(),
            ready: running,
            restart_count: restarts,
            state: Some(state),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_descriptor_sums_restarts() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("api-7d9f".to_string()),
                namespace: Some("shop".to_string()),
                creation_timestamp: Some(Time(chrono::Utc::now())),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node-a".to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                pod_ip: Some("10.1.2.3".to_string()),
                container_statuses: Some(vec![status("app", 2, true), status("sidecar", 3, false)]),
                ..Default::default()
            }),
        };

        let desc = pod_descriptor(&pod).unwrap();
        assert_eq!(desc.external_id, "shop/api-7d9f");
        assert_eq!(desc.namespace.as_deref(), Some("shop"));
        assert_eq!(desc.status, UnitStatus::Running);
        assert_eq!(desc.restart_count, 5);
        assert_eq!(desc.sub_units.len(), 2);
        assert_eq!(desc.sub_units[0].state, ContainerState::Running);
        assert_eq!(desc.sub_units[1].state, ContainerState::Waiting);
        assert_eq!(desc.sub_units[0].image_id, None);
        assert_eq!(desc.network.ip_address.as_deref(), Some("10.1.2.3"));
        assert_eq!(desc.network.node_name.as_deref(), Some("node-a"));
        assert_eq!(desc.image.as_deref(), Some("registry/app:1"));
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_pending_pod_uses_declared_containers() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("job-1".to_string()),
                namespace: Some("batch".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "worker".to_string(),
                    image: Some("busybox".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Pending".to_string()),
                ..Default::default()
            }),
        };

        let desc = pod_descriptor(&pod).unwrap();
        assert_eq!(desc.status, UnitStatus::Pending);
        assert_eq!(desc.sub_units.len(), 1);
        assert_eq!(desc.sub_units[0].state, ContainerState::Unknown);
        assert!(!desc.sub_units[0].ready);
    }

    #[test]
    fn test_pod_without_name_is_skipped() {
        assert!(pod_descriptor(&Pod::default()).is_none());
    }

    #[test]
    fn test_event_descriptor_defaults_count() {
        let event = Event {
            metadata: ObjectMeta {
                namespace: Some("shop".to_string()),
                ..Default::default()
            },
            type_: Some("Warning".to_string()),
            reason: Some("BackOff".to_string()),
            message: Some("Back-off restarting failed container".to_string()),
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                name: Some("api-7d9f".to_string()),
                ..Default::default()
            },
            count: None,
            ..Default::default()
        };

        let desc = event_descriptor(&event);
        assert_eq!(desc.event_type, EventType::Warning);
        assert_eq!(desc.count, 1);
        assert_eq!(desc.reason, "BackOff");
        assert_eq!(desc.involved_object_name, "api-7d9f");
        assert_eq!(desc.namespace, "shop");
    }

    #[test]
    fn test_usage_from_metrics() {
        let data = serde_json::json!({
            "timestamp": "2024-03-01T10:00:00Z",
            "window": "30s",
            "containers": [
                {"name": "app", "usage": {"cpu": "250m", "memory": "64Mi"}},
                {"name": "sidecar", "usage": {"cpu": "1500000n", "memory": "1024Ki"}}
            ]
        });

        let usage = usage_from_metrics(&data).unwrap();
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].container, "app");
        assert_eq!(usage[0].cpu_millicores, 250.0);
        assert_eq!(usage[0].memory_bytes, 64 * 1024 * 1024);
        assert!((usage[1].cpu_millicores - 1.5).abs() < 1e-9);
        assert_eq!(usage[1].memory_bytes, 1024 * 1024);
    }

    #[test]
    fn test_usage_from_metrics_without_containers() {
        let usage = usage_from_metrics(&serde_json::json!({})).unwrap();
        assert!(usage.is_empty());

        let bad = serde_json::json!({"containers": "nope"});
        assert!(usage_from_metrics(&bad).is_err());
    }
}
