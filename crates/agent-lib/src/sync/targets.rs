//! Sync targets: one per configured Docker host or Kubernetes cluster

use crate::models::ScopeId;
use crate::reconcile::{sync_cluster, sync_host, ReconcileError, ReconcileReport, SyncOptions};
use crate::runtime::{
    AdapterError, ClusterInventory, ConnectError, ConnectionStrategy, DockerAdapter, KubeStrategy,
    KubernetesAdapter, RuntimeAdapter,
};
use crate::store::StateStore;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Result of syncing one target
pub struct TargetSync {
    /// Unit-level counts (pods for clusters, containers for hosts)
    pub report: ReconcileReport,
    /// The adapter the pass ran against
    pub adapter: Arc<dyn RuntimeAdapter>,
}

/// Something the sync loop can reconcile each cycle
#[async_trait]
pub trait SyncTarget: Send + Sync {
    fn scope(&self) -> &ScopeId;

    async fn sync(
        &self,
        store: &dyn StateStore,
        options: &SyncOptions,
    ) -> Result<TargetSync, ReconcileError>;
}

/// A Docker host with an already connected adapter
pub struct HostTarget {
    scope: ScopeId,
    adapter: Arc<dyn RuntimeAdapter>,
}

impl HostTarget {
    pub fn new(name: impl Into<String>, adapter: Arc<dyn RuntimeAdapter>) -> Self {
        Self {
            scope: ScopeId::docker(name),
            adapter,
        }
    }
}

#[async_trait]
impl SyncTarget for HostTarget {
    fn scope(&self) -> &ScopeId {
        &self.scope
    }

    async fn sync(
        &self,
        store: &dyn StateStore,
        options: &SyncOptions,
    ) -> Result<TargetSync, ReconcileError> {
        let report = sync_host(&self.scope.name, self.adapter.as_ref(), store, options).await?;
        Ok(TargetSync {
            report,
            adapter: self.adapter.clone(),
        })
    }
}

/// A Kubernetes cluster with an already connected adapter
pub struct ClusterTarget<A> {
    scope: ScopeId,
    adapter: Arc<A>,
}

impl<A> ClusterTarget<A>
where
    A: RuntimeAdapter + ClusterInventory + 'static,
{
    pub fn new(name: impl Into<String>, adapter: Arc<A>) -> Self {
        Self {
            scope: ScopeId::kubernetes(name),
            adapter,
        }
    }
}

#[async_trait]
impl<A> SyncTarget for ClusterTarget<A>
where
    A: RuntimeAdapter + ClusterInventory + 'static,
{
    fn scope(&self) -> &ScopeId {
        &self.scope
    }

    async fn sync(
        &self,
        store: &dyn StateStore,
        options: &SyncOptions,
    ) -> Result<TargetSync, ReconcileError> {
        let report = sync_cluster(&self.scope.name, self.adapter.as_ref(), store, options).await?;
        Ok(TargetSync {
            report: report.pods,
            adapter: self.adapter.clone(),
        })
    }
}

/// Cached connection, re-established after connectivity failures
struct LazyConnection<A> {
    cached: Mutex<Option<Arc<A>>>,
}

impl<A> LazyConnection<A> {
    fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    async fn get<F, Fut>(&self, connect: F) -> Result<Arc<A>, ConnectError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<A, ConnectError>>,
    {
        let mut cached = self.cached.lock().await;
        if let Some(adapter) = cached.as_ref() {
            return Ok(adapter.clone());
        }
        let adapter = Arc::new(connect().await?);
        *cached = Some(adapter.clone());
        Ok(adapter)
    }

    async fn reset(&self) {
        self.cached.lock().await.take();
    }
}

fn connect_failure(scope: &ScopeId, e: ConnectError) -> ReconcileError {
    ReconcileError::Enumeration {
        scope: scope.clone(),
        source: AdapterError::Connectivity(e.to_string()),
    }
}

fn is_connectivity(e: &ReconcileError) -> bool {
    matches!(e, ReconcileError::Enumeration { source, .. } if source.is_connectivity())
}

/// A Docker host connected on first use
pub struct DockerHostTarget {
    scope: ScopeId,
    strategies: Vec<ConnectionStrategy>,
    timeout: Duration,
    connection: LazyConnection<DockerAdapter>,
}

impl DockerHostTarget {
    /// `host_url` empty means the platform default socket chain
    pub fn new(name: impl Into<String>, host_url: &str, timeout: Duration) -> Self {
        Self {
            scope: ScopeId::docker(name),
            strategies: ConnectionStrategy::from_descriptor(host_url),
            timeout,
            connection: LazyConnection::new(),
        }
    }
}

#[async_trait]
impl SyncTarget for DockerHostTarget {
    fn scope(&self) -> &ScopeId {
        &self.scope
    }

    async fn sync(
        &self,
        store: &dyn StateStore,
        options: &SyncOptions,
    ) -> Result<TargetSync, ReconcileError> {
        let adapter = self
            .connection
            .get(|| async {
                let adapter = DockerAdapter::connect(&self.strategies, self.timeout).await?;
                info!(scope = %self.scope, strategy = %adapter.strategy(), "Connected to Docker");
                Ok(adapter)
            })
            .await
            .map_err(|e| connect_failure(&self.scope, e))?;

        match sync_host(&self.scope.name, adapter.as_ref(), store, options).await {
            Ok(report) => Ok(TargetSync { report, adapter }),
            Err(e) => {
                if is_connectivity(&e) {
                    debug!(scope = %self.scope, "Dropping Docker connection");
                    self.connection.reset().await;
                }
                Err(e)
            }
        }
    }
}

/// A Kubernetes cluster connected on first use
pub struct KubeClusterTarget {
    scope: ScopeId,
    strategies: Vec<KubeStrategy>,
    timeout: Duration,
    connection: LazyConnection<KubernetesAdapter>,
}

impl KubeClusterTarget {
    pub fn new(name: impl Into<String>, strategies: Vec<KubeStrategy>, timeout: Duration) -> Self {
        Self {
            scope: ScopeId::kubernetes(name),
            strategies,
            timeout,
            connection: LazyConnection::new(),
        }
    }
}

#[async_trait]
impl SyncTarget for KubeClusterTarget {
    fn scope(&self) -> &ScopeId {
        &self.scope
    }

    async fn sync(
        &self,
        store: &dyn StateStore,
        options: &SyncOptions,
    ) -> Result<TargetSync, ReconcileError> {
        let adapter = self
            .connection
            .get(|| async {
                let adapter =
                    KubernetesAdapter::connect(self.scope.name.clone(), &self.strategies, self.timeout)
                        .await?;
                info!(scope = %self.scope, strategy = %adapter.strategy(), "Connected to cluster");
                Ok(adapter)
            })
            .await
            .map_err(|e| connect_failure(&self.scope, e))?;

        match sync_cluster(&self.scope.name, adapter.as_ref(), store, options).await {
            Ok(report) => Ok(TargetSync {
                report: report.pods,
                adapter,
            }),
            Err(e) => {
                if is_connectivity(&e) {
                    debug!(scope = %self.scope, "Dropping cluster connection");
                    self.connection.reset().await;
                }
                Err(e)
            }
        }
    }
}
