//! Sync loop scenarios against mock runtimes

use super::*;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{RawStatsSnapshot, RawUnitDescriptor, RuntimeKind, ScopeId, UnitAction, UnitStatus};
use crate::reconcile::SyncOptions;
use crate::runtime::{AdapterError, RuntimeAdapter};
use crate::store::{MemoryStore, StateStore};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct MockHost {
    units: Vec<RawUnitDescriptor>,
    logs: &'static str,
    unreachable: bool,
}

impl MockHost {
    fn running(ids: &[&str]) -> Self {
        Self {
            units: ids
                .iter()
                .map(|id| RawUnitDescriptor::new(*id, format!("name-{id}"), UnitStatus::Running))
                .collect(),
            logs: "",
            unreachable: false,
        }
    }

    fn unreachable() -> Self {
        Self {
            units: Vec::new(),
            logs: "",
            unreachable: true,
        }
    }
}

#[async_trait]
impl RuntimeAdapter for MockHost {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Docker
    }

    async fn list_units(&self) -> Result<Vec<RawUnitDescriptor>, AdapterError> {
        if self.unreachable {
            return Err(AdapterError::Connectivity("connection refused".to_string()));
        }
        Ok(self.units.clone())
    }

    async fn get_stats(&self, _unit_id: &str) -> Result<Option<RawStatsSnapshot>, AdapterError> {
        Ok(None)
    }

    async fn fetch_logs(
        &self,
        _unit_id: &str,
        _container: Option<&str>,
        _tail: usize,
    ) -> Result<String, AdapterError> {
        Ok(self.logs.to_string())
    }

    async fn perform_action(&self, _unit_id: &str, _action: UnitAction) -> Result<(), AdapterError> {
        Ok(())
    }
}

fn host(name: &str, adapter: MockHost) -> Arc<dyn SyncTarget> {
    Arc::new(HostTarget::new(name, Arc::new(adapter)))
}

#[tokio::test]
async fn test_failing_scope_does_not_block_others() {
    let store = Arc::new(MemoryStore::new());
    let health = Arc::new(HealthRegistry::new());
    let sync = SyncLoopBuilder::new()
        .target(host("alpha", MockHost::running(&["a1", "a2"])))
        .target(host("beta", MockHost::unreachable()))
        .store(store.clone())
        .health(health.clone())
        .build()
        .unwrap();

    let report = sync.run_once().await;
    assert_eq!(report.succeeded(), 1);
    let failed: Vec<_> = report.failed().map(|s| s.scope.clone()).collect();
    assert_eq!(failed, vec![ScopeId::docker("beta")]);

    assert_eq!(store.unit_ids(&ScopeId::docker("alpha")).await.unwrap().len(), 2);
    assert!(store.unit_ids(&ScopeId::docker("beta")).await.unwrap().is_empty());

    let status = health.health().await;
    let docker = &status.components[components::DOCKER_SYNC];
    assert_eq!(docker.status, ComponentStatus::Degraded);
    assert!(docker.message.as_deref().unwrap_or_default().contains("beta"));
    assert!(health.readiness().await.ready);
}

#[tokio::test]
async fn test_unreachable_scope_keeps_existing_units() {
    let store = Arc::new(MemoryStore::new());
    SyncLoopBuilder::new()
        .target(host("alpha", MockHost::running(&["a1"])))
        .store(store.clone())
        .build()
        .unwrap()
        .run_once()
        .await;

    SyncLoopBuilder::new()
        .target(host("alpha", MockHost::unreachable()))
        .store(store.clone())
        .build()
        .unwrap()
        .run_once()
        .await;

    assert_eq!(store.unit_ids(&ScopeId::docker("alpha")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_scan_logs_records_incidents() {
    let store = Arc::new(MemoryStore::new());
    let adapter = MockHost {
        logs: "INFO ok\nERROR boom\n  at main\n\nINFO fine",
        ..MockHost::running(&["a1"])
    };
    let report = SyncLoopBuilder::new()
        .target(host("alpha", adapter))
        .store(store.clone())
        .options(SyncOptions {
            skip_metrics: true,
            ..Default::default()
        })
        .scan_logs(true, 50)
        .build()
        .unwrap()
        .run_once()
        .await;

    assert_eq!(report.scopes[0].incidents, 1);
    let incidents = store.incidents(Some("a1")).await.unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].container_name, "name-a1");
    assert_eq!(incidents[0].summary, "ERROR boom");
}

#[tokio::test]
async fn test_snapshot_written_after_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("snapshot.json");
    let store = Arc::new(MemoryStore::new());

    SyncLoopBuilder::new()
        .target(host("alpha", MockHost::running(&["a1", "a2"])))
        .store(store)
        .snapshot_path(Some(path.clone()))
        .build()
        .unwrap()
        .run_once()
        .await;

    let restored = MemoryStore::load_snapshot(&path).unwrap();
    assert_eq!(restored.units(None).await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_loop_stops_on_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let sync = SyncLoopBuilder::new()
        .target(host("alpha", MockHost::running(&["a1"])))
        .store(store.clone())
        .interval(Duration::from_secs(30))
        .build()
        .unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(sync.run(shutdown_rx));

    tokio::time::sleep(Duration::from_secs(65)).await;
    assert_eq!(store.units(None).await.unwrap().len(), 1);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[test]
fn test_builder_requires_store() {
    assert!(SyncLoopBuilder::new().build().is_err());
    assert!(SyncLoopBuilder::new()
        .store(Arc::new(MemoryStore::new()))
        .interval(Duration::ZERO)
        .build()
        .is_err());
}

#[tokio::test]
async fn test_lazy_target_reports_connect_failure() {
    let target = DockerHostTarget::new("nowhere", "tcp://127.0.0.1:1", Duration::from_millis(200));
    let store = MemoryStore::new();
    let err = match target.sync(&store, &SyncOptions::default()).await {
        Err(e) => e,
        Ok(_) => panic!("connected to a closed port"),
    };
    assert!(err.to_string().contains("docker/nowhere"));
}
