//! Persisted state boundary
//!
//! [`StateStore`] is what reconciliation writes and the CLI reads.
//! [`MemoryStore`] keeps everything in `DashMap`s keyed per record, so
//! concurrent writes to the same (scope, external id) are serialized by the
//! shard lock while different keys proceed in parallel. A store can be
//! saved to and loaded from a JSON snapshot file.

use crate::models::{
    EventKey, EventRecord, IncidentRecord, MetricSample, NamespaceRecord, ScopeId, UnitRecord,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unit `{unit_id}` does not exist in scope {scope}")]
    UnknownUnit { scope: ScopeId, unit_id: String },
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// The record existed and was overwritten. `changed` is false when the
    /// new value equals the stored one.
    Updated { changed: bool },
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// External ids of every unit persisted under `scope`
    async fn unit_ids(&self, scope: &ScopeId) -> Result<HashSet<String>, StoreError>;

    async fn get_unit(
        &self,
        scope: &ScopeId,
        external_id: &str,
    ) -> Result<Option<UnitRecord>, StoreError>;

    /// Create or fully replace a unit. Samples of sub-units that are no
    /// longer listed are deleted.
    async fn upsert_unit(&self, record: UnitRecord) -> Result<UpsertOutcome, StoreError>;

    /// Delete a unit and all of its samples
    async fn delete_unit(&self, scope: &ScopeId, external_id: &str) -> Result<bool, StoreError>;

    /// Units of one scope, or of every scope
    async fn units(&self, scope: Option<&ScopeId>) -> Result<Vec<UnitRecord>, StoreError>;

    /// Append a sample. The owning unit must exist.
    async fn append_sample(&self, sample: MetricSample) -> Result<(), StoreError>;

    async fn samples(&self, scope: &ScopeId, unit_id: &str) -> Result<Vec<MetricSample>, StoreError>;

    async fn namespace_names(&self, cluster: &str) -> Result<HashSet<String>, StoreError>;

    async fn upsert_namespace(&self, record: NamespaceRecord) -> Result<UpsertOutcome, StoreError>;

    async fn delete_namespace(&self, cluster: &str, name: &str) -> Result<bool, StoreError>;

    async fn namespaces(&self, cluster: Option<&str>) -> Result<Vec<NamespaceRecord>, StoreError>;

    /// Create or overwrite an event by its key
    async fn upsert_event(&self, record: EventRecord) -> Result<UpsertOutcome, StoreError>;

    async fn events(&self, cluster: Option<&str>) -> Result<Vec<EventRecord>, StoreError>;

    /// Append incidents, returning how many were stored
    async fn append_incidents(&self, incidents: Vec<IncidentRecord>) -> Result<usize, StoreError>;

    async fn incidents(&self, container_id: Option<&str>) -> Result<Vec<IncidentRecord>, StoreError>;
}

type UnitKey = (ScopeId, String);

/// In-memory [`StateStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    units: DashMap<UnitKey, UnitRecord>,
    samples: DashMap<UnitKey, Vec<MetricSample>>,
    namespaces: DashMap<(String, String), NamespaceRecord>,
    events: DashMap<EventKey, EventRecord>,
    incidents: RwLock<Vec<IncidentRecord>>,
}

/// On-disk form of a [`MemoryStore`]
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    units: Vec<UnitRecord>,
    #[serde(default)]
    samples: Vec<MetricSample>,
    #[serde(default)]
    namespaces: Vec<NamespaceRecord>,
    #[serde(default)]
    events: Vec<EventRecord>,
    #[serde(default)]
    incidents: Vec<IncidentRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a snapshot file
    pub fn load_snapshot(path: &Path) -> Result<Self, StoreError> {
        let data = std::fs::read(path)?;
        let snapshot: Snapshot = serde_json::from_slice(&data)?;

        let mut store = Self::new();
        for unit in snapshot.units {
            store
                .units
                .insert((unit.scope.clone(), unit.external_id.clone()), unit);
        }
        for sample in snapshot.samples {
            let key = (sample.owner.scope.clone(), sample.owner.unit_id.clone());
            store.samples.entry(key).or_default().push(sample);
        }
        for ns in snapshot.namespaces {
            store
                .namespaces
                .insert((ns.cluster.clone(), ns.name.clone()), ns);
        }
        for event in snapshot.events {
            store.events.insert(event.key.clone(), event);
        }
        *store.incidents.get_mut() = snapshot.incidents;

        debug!(path = %path.display(), units = store.units.len(), "Loaded snapshot");
        Ok(store)
    }

    /// Load a snapshot, or start empty if the file does not exist yet
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            Self::load_snapshot(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Write the whole store to `path` atomically (temp file + rename)
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let mut units: Vec<UnitRecord> = self.units.iter().map(|e| e.value().clone()).collect();
        units.sort_by(|a, b| (&a.scope, &a.external_id).cmp(&(&b.scope, &b.external_id)));

        let mut samples: Vec<MetricSample> = self
            .samples
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        samples.sort_by_key(|s| s.timestamp);

        let snapshot = Snapshot {
            units,
            samples,
            namespaces: self.sorted_namespaces(None),
            events: self.sorted_events(None),
            incidents: self.incidents.read().await.clone(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        std::fs::rename(&tmp, path)?;

        debug!(path = %path.display(), "Saved snapshot");
        Ok(())
    }

    fn sorted_namespaces(&self, cluster: Option<&str>) -> Vec<NamespaceRecord> {
        let mut out: Vec<NamespaceRecord> = self
            .namespaces
            .iter()
            .filter(|e| cluster.map_or(true, |c| e.key().0 == c))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| (&a.cluster, &a.name).cmp(&(&b.cluster, &b.name)));
        out
    }

    fn sorted_events(&self, cluster: Option<&str>) -> Vec<EventRecord> {
        let mut out: Vec<EventRecord> = self
            .events
            .iter()
            .filter(|e| cluster.map_or(true, |c| e.key().cluster == c))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| {
            (&a.key.cluster, &a.key.namespace, a.last_timestamp)
                .cmp(&(&b.key.cluster, &b.key.namespace, b.last_timestamp))
        });
        out
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn unit_ids(&self, scope: &ScopeId) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .units
            .iter()
            .filter(|e| &e.key().0 == scope)
            .map(|e| e.key().1.clone())
            .collect())
    }

    async fn get_unit(
        &self,
        scope: &ScopeId,
        external_id: &str,
    ) -> Result<Option<UnitRecord>, StoreError> {
        Ok(self
            .units
            .get(&(scope.clone(), external_id.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn upsert_unit(&self, record: UnitRecord) -> Result<UpsertOutcome, StoreError> {
        use dashmap::mapref::entry::Entry;

        let key = (record.scope.clone(), record.external_id.clone());
        match self.units.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(UpsertOutcome::Created)
            }
            Entry::Occupied(mut slot) => {
                let changed = slot.get() != &record;
                let live: HashSet<&str> = record.sub_units.iter().map(|s| s.name.as_str()).collect();
                let gone: Vec<String> = slot
                    .get()
                    .sub_units
                    .iter()
                    .filter(|s| !live.contains(s.name.as_str()))
                    .map(|s| s.name.clone())
                    .collect();

                if !gone.is_empty() {
                    if let Some(mut samples) = self.samples.get_mut(&key) {
                        samples.retain(|s| {
                            s.owner
                                .sub_unit
                                .as_ref()
                                .map_or(true, |name| !gone.contains(name))
                        });
                    }
                }

                slot.insert(record);
                Ok(UpsertOutcome::Updated { changed })
            }
        }
    }

    async fn delete_unit(&self, scope: &ScopeId, external_id: &str) -> Result<bool, StoreError> {
        let key = (scope.clone(), external_id.to_string());
        let removed = self.units.remove(&key).is_some();
        self.samples.remove(&key);
        Ok(removed)
    }

    async fn units(&self, scope: Option<&ScopeId>) -> Result<Vec<UnitRecord>, StoreError> {
        let mut out: Vec<UnitRecord> = self
            .units
            .iter()
            .filter(|e| scope.map_or(true, |s| &e.key().0 == s))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| (&a.scope, &a.external_id).cmp(&(&b.scope, &b.external_id)));
        Ok(out)
    }

    async fn append_sample(&self, sample: MetricSample) -> Result<(), StoreError> {
        let key = (sample.owner.scope.clone(), sample.owner.unit_id.clone());
        // Hold the unit's read guard so it cannot be deleted mid-append
        let _unit = self.units.get(&key).ok_or_else(|| StoreError::UnknownUnit {
            scope: key.0.clone(),
            unit_id: key.1.clone(),
        })?;
        self.samples.entry(key).or_default().push(sample);
        Ok(())
    }

    async fn samples(&self, scope: &ScopeId, unit_id: &str) -> Result<Vec<MetricSample>, StoreError> {
        Ok(self
            .samples
            .get(&(scope.clone(), unit_id.to_string()))
            .map(|s| s.value().clone())
            .unwrap_or_default())
    }

    async fn namespace_names(&self, cluster: &str) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .namespaces
            .iter()
            .filter(|e| e.key().0 == cluster)
            .map(|e| e.key().1.clone())
            .collect())
    }

    async fn upsert_namespace(&self, record: NamespaceRecord) -> Result<UpsertOutcome, StoreError> {
        let key = (record.cluster.clone(), record.name.clone());
        Ok(match self.namespaces.insert(key, record.clone()) {
            None => UpsertOutcome::Created,
            Some(previous) => UpsertOutcome::Updated {
                changed: previous != record,
            },
        })
    }

    async fn delete_namespace(&self, cluster: &str, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .namespaces
            .remove(&(cluster.to_string(), name.to_string()))
            .is_some())
    }

    async fn namespaces(&self, cluster: Option<&str>) -> Result<Vec<NamespaceRecord>, StoreError> {
        Ok(self.sorted_namespaces(cluster))
    }

    async fn upsert_event(&self, record: EventRecord) -> Result<UpsertOutcome, StoreError> {
        Ok(match self.events.insert(record.key.clone(), record.clone()) {
            None => UpsertOutcome::Created,
            Some(previous) => UpsertOutcome::Updated {
                changed: previous != record,
            },
        })
    }

    async fn events(&self, cluster: Option<&str>) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self.sorted_events(cluster))
    }

    async fn append_incidents(&self, incidents: Vec<IncidentRecord>) -> Result<usize, StoreError> {
        let count = incidents.len();
        self.incidents.write().await.extend(incidents);
        Ok(count)
    }

    async fn incidents(&self, container_id: Option<&str>) -> Result<Vec<IncidentRecord>, StoreError> {
        Ok(self
            .incidents
            .read()
            .await
            .iter()
            .filter(|i| container_id.map_or(true, |c| i.container_id == c))
            .cloned()
            .collect())
    }
}
