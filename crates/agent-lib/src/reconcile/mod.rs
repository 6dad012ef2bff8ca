//! Reconciliation engine
//!
//! Makes the persisted state of one scope match a single snapshot of live
//! enumeration: upsert every live unit, prune every persisted unit that is
//! not live, then optionally sample the running ones. The prune set is
//! computed from the same snapshot used for the upserts.


use crate::models::{
    EventKey, EventRecord, NamespaceRecord, RawStatsSnapshot, RawUnitDescriptor, SampleOwner,
    ScopeId, UnitRecord,
};
use crate::runtime::{
    AdapterError, ClusterInventory, EventDescriptor, NamespaceDescriptor, RuntimeAdapter,
};
use crate::stats::{normalize, usage_sample};
use crate::store::{StateStore, StoreError, UpsertOutcome};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

const DEFAULT_STATS_CONCURRENCY: usize = 8;
const DEFAULT_EVENT_LIMIT: u32 = 500;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The runtime could not enumerate the scope; nothing was changed
    #[error("cannot enumerate {scope}: {source}")]
    Enumeration {
        scope: ScopeId,
        #[source]
        source: AdapterError,
    },
    #[error("state store failure: {0}")]
    Store(#[from] StoreError),
}

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub created: usize,
    /// Existing records overwritten with live values
    pub updated: usize,
    pub removed: usize,
    /// Updated records whose stored value actually differed
    pub changed: usize,
    /// Malformed or duplicate descriptors left untouched
    pub skipped: usize,
    pub samples: usize,
    pub stats_failures: usize,
}

impl ReconcileReport {
    /// `(created, updated, removed)`
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.created, self.updated, self.removed)
    }

    /// True when the pass left persisted state as it was
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.changed == 0 && self.removed == 0
    }

    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated { changed } => {
                self.updated += 1;
                if changed {
                    self.changed += 1;
                }
            }
        }
    }
}

/// Counts from a Kubernetes cluster sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSyncReport {
    pub namespaces: ReconcileReport,
    pub pods: ReconcileReport,
    /// Events are upserted only, never pruned
    pub events: ReconcileReport,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Skip stats collection for running units
    pub skip_metrics: bool,
    /// Maximum stats requests in flight per pass
    pub stats_concurrency: usize,
    /// Maximum events fetched per cluster sync
    pub event_limit: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            skip_metrics: false,
            stats_concurrency: DEFAULT_STATS_CONCURRENCY,
            event_limit: DEFAULT_EVENT_LIMIT,
        }
    }
}

/// Reconcile persisted units of `scope` against `live`
pub async fn reconcile(
    scope: &ScopeId,
    live: &[RawUnitDescriptor],
    store: &dyn StateStore,
) -> Result<ReconcileReport, ReconcileError> {
    let mut report = ReconcileReport::default();

    // A unit that is listed is never pruned, even when its descriptor is
    // malformed and gets skipped below.
    let present: HashSet<&str> = live
        .iter()
        .map(|d| d.external_id.as_str())
        .filter(|id| !id.trim().is_empty())
        .collect();

    let mut seen = HashSet::with_capacity(live.len());
    for desc in live {
        if let Err(cause) = desc.validate() {
            warn!(scope = %scope, cause = %cause, "Skipping malformed unit descriptor");
            report.skipped += 1;
            continue;
        }
        if !seen.insert(desc.external_id.as_str()) {
            warn!(scope = %scope, unit = %desc.external_id, "Skipping duplicate unit descriptor");
            report.skipped += 1;
            continue;
        }

        let outcome = store
            .upsert_unit(UnitRecord::from_descriptor(scope, desc))
            .await?;
        report.record(outcome);
    }

    for id in store.unit_ids(scope).await? {
        if !present.contains(id.as_str()) && store.delete_unit(scope, &id).await? {
            debug!(scope = %scope, unit = %id, "Pruned unit");
            report.removed += 1;
        }
    }

    Ok(report)
}

/// Sample every running unit, isolating per-unit failures
///
/// Returns `(samples stored, failures)`.
pub async fn collect_samples(
    scope: &ScopeId,
    units: &[RawUnitDescriptor],
    adapter: &dyn RuntimeAdapter,
    store: &dyn StateStore,
    concurrency: usize,
) -> (usize, usize) {
    let timestamp = Utc::now();
    let running: Vec<&RawUnitDescriptor> = units
        .iter()
        .filter(|d| d.status.is_running() && d.validate().is_ok())
        .collect();

    let pending: Vec<_> = running
        .into_iter()
        .map(|desc| sample_unit(scope, desc, adapter, store, timestamp))
        .collect();
    let results: Vec<Result<usize, String>> = stream::iter(pending)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut samples = 0;
    let mut failures = 0;
    for result in results {
        match result {
            Ok(n) => samples += n,
            Err(cause) => {
                warn!(scope = %scope, cause = %cause, "Stats collection failed for unit");
                failures += 1;
            }
        }
    }
    (samples, failures)
}

async fn sample_unit(
    scope: &ScopeId,
    desc: &RawUnitDescriptor,
    adapter: &dyn RuntimeAdapter,
    store: &dyn StateStore,
    timestamp: DateTime<Utc>,
) -> Result<usize, String> {
    let stats = adapter
        .get_stats(&desc.external_id)
        .await
        .map_err(|e| format!("{}: {}", desc.external_id, e))?;
    let Some(stats) = stats else {
        return Ok(0);
    };

    let owner = |sub_unit: Option<String>| SampleOwner {
        scope: scope.clone(),
        unit_id: desc.external_id.clone(),
        sub_unit,
    };

    let mut stored = 0;
    match stats {
        RawStatsSnapshot::Counters(counters) => {
            let sample = normalize(&counters).into_sample(owner(None), timestamp);
            store.append_sample(sample).await.map_err(|e| e.to_string())?;
            stored += 1;
        }
        RawStatsSnapshot::Usage(usages) => {
            let known: HashSet<&str> = desc.sub_units.iter().map(|s| s.name.as_str()).collect();
            for usage in usages
                .iter()
                .filter(|u| known.is_empty() || known.contains(u.container.as_str()))
            {
                let sample = usage_sample(owner(Some(usage.container.clone())), usage, timestamp);
                store.append_sample(sample).await.map_err(|e| e.to_string())?;
                stored += 1;
            }
        }
    }
    Ok(stored)
}

/// Enumerate, reconcile and sample one scope
pub async fn sync_scope(
    scope: &ScopeId,
    adapter: &dyn RuntimeAdapter,
    store: &dyn StateStore,
    options: &SyncOptions,
) -> Result<ReconcileReport, ReconcileError> {
    let live = adapter
        .list_units()
        .await
        .map_err(|source| ReconcileError::Enumeration {
            scope: scope.clone(),
            source,
        })?;

    let mut report = reconcile(scope, &live, store).await?;

    if !options.skip_metrics {
        let (samples, failures) =
            collect_samples(scope, &live, adapter, store, options.stats_concurrency).await;
        report.samples = samples;
        report.stats_failures = failures;
    }

    Ok(report)
}

/// Sync one Docker host
pub async fn sync_host(
    host: &str,
    adapter: &dyn RuntimeAdapter,
    store: &dyn StateStore,
    options: &SyncOptions,
) -> Result<ReconcileReport, ReconcileError> {
    let scope = ScopeId::docker(host);
    let report = sync_scope(&scope, adapter, store, options).await?;
    info!(
        host = %host,
        created = report.created,
        updated = report.updated,
        removed = report.removed,
        samples = report.samples,
        "Docker host synced"
    );
    Ok(report)
}

/// Reconcile the namespaces of a cluster (upsert and prune)
pub async fn reconcile_namespaces(
    cluster: &str,
    live: &[NamespaceDescriptor],
    store: &dyn StateStore,
) -> Result<ReconcileReport, ReconcileError> {
    let mut report = ReconcileReport::default();
    let present: HashSet<&str> = live.iter().map(|n| n.name.as_str()).collect();

    for ns in live {
        if ns.name.trim().is_empty() {
            report.skipped += 1;
            continue;
        }
        let outcome = store
            .upsert_namespace(NamespaceRecord {
                cluster: cluster.to_string(),
                name: ns.name.clone(),
                status: ns.status.clone(),
            })
            .await?;
        report.record(outcome);
    }

    for name in store.namespace_names(cluster).await? {
        if !present.contains(name.as_str()) && store.delete_namespace(cluster, &name).await? {
            report.removed += 1;
        }
    }

    Ok(report)
}

/// Upsert cluster events by (cluster, namespace, reason, object, first timestamp)
pub async fn upsert_events(
    cluster: &str,
    live: &[EventDescriptor],
    store: &dyn StateStore,
) -> Result<ReconcileReport, ReconcileError> {
    let mut report = ReconcileReport::default();

    for event in live {
        if event.reason.is_empty() && event.involved_object_name.is_empty() {
            report.skipped += 1;
            continue;
        }
        let record = EventRecord {
            key: EventKey {
                cluster: cluster.to_string(),
                namespace: event.namespace.clone(),
                reason: event.reason.clone(),
                involved_object_name: event.involved_object_name.clone(),
                first_timestamp: event.first_timestamp,
            },
            event_type: event.event_type,
            message: event.message.clone(),
            involved_object_kind: event.involved_object_kind.clone(),
            count: event.count,
            last_timestamp: event.last_timestamp,
        };
        report.record(store.upsert_event(record).await?);
    }

    Ok(report)
}

/// Sync namespaces, pods (with per-container samples) and events of a cluster
pub async fn sync_cluster<A>(
    cluster: &str,
    adapter: &A,
    store: &dyn StateStore,
    options: &SyncOptions,
) -> Result<ClusterSyncReport, ReconcileError>
where
    A: RuntimeAdapter + ClusterInventory,
{
    let scope = ScopeId::kubernetes(cluster);
    let enumeration = |source| ReconcileError::Enumeration {
        scope: scope.clone(),
        source,
    };

    let namespaces = adapter.list_namespaces().await.map_err(enumeration)?;
    let namespaces = reconcile_namespaces(cluster, &namespaces, store).await?;

    let pods = sync_scope(&scope, adapter, store, options).await?;

    let events = adapter
        .list_events(options.event_limit)
        .await
        .map_err(enumeration)?;
    let events = upsert_events(cluster, &events, store).await?;

    info!(
        cluster = %cluster,
        namespaces = namespaces.created + namespaces.updated,
        pods_created = pods.created,
        pods_updated = pods.updated,
        pods_removed = pods.removed,
        events = events.created + events.updated,
        "Cluster synced"
    );

    Ok(ClusterSyncReport {
        namespaces,
        pods,
        events,
    })
}
