//! Periodic sync loop
//!
//! Every cycle syncs all targets concurrently. Scopes are independent: a
//! failing host or cluster is logged and retried on the next cycle while
//! the others proceed.

use super::targets::SyncTarget;
use crate::health::{components, HealthRegistry};
use crate::incidents::{scan_unit_logs, IncidentContext};
use crate::models::{RuntimeKind, ScopeId, UnitRecord};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::reconcile::{ReconcileError, ReconcileReport, SyncOptions};
use crate::runtime::RuntimeAdapter;
use crate::store::{MemoryStore, StateStore};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval: Duration,
    pub options: SyncOptions,
    /// Extract incidents from running units' logs after each pass
    pub scan_logs: bool,
    pub log_tail_lines: usize,
    /// Persist the store here after every cycle
    pub snapshot_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            options: SyncOptions::default(),
            scan_logs: false,
            log_tail_lines: 100,
            snapshot_path: None,
        }
    }
}

/// Outcome of one target within a cycle
#[derive(Debug)]
pub struct ScopeOutcome {
    pub scope: ScopeId,
    pub result: Result<ReconcileReport, ReconcileError>,
    pub incidents: usize,
}

/// Outcome of one full cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    pub scopes: Vec<ScopeOutcome>,
}

impl CycleReport {
    pub fn failed(&self) -> impl Iterator<Item = &ScopeOutcome> {
        self.scopes.iter().filter(|s| s.result.is_err())
    }

    pub fn succeeded(&self) -> usize {
        self.scopes.iter().filter(|s| s.result.is_ok()).count()
    }
}

pub struct SyncLoop {
    targets: Vec<Arc<dyn SyncTarget>>,
    store: Arc<MemoryStore>,
    health: Arc<HealthRegistry>,
    config: SyncConfig,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl SyncLoop {
    pub fn new(
        targets: Vec<Arc<dyn SyncTarget>>,
        store: Arc<MemoryStore>,
        health: Arc<HealthRegistry>,
        config: SyncConfig,
    ) -> Self {
        Self {
            targets,
            store,
            health,
            config,
            metrics: MonitorMetrics::new(),
            logger: StructuredLogger::new("podwatch"),
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = &ScopeId> {
        self.targets.iter().map(|t| t.scope())
    }

    /// Run cycles until shutdown; the first cycle starts immediately
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            targets = self.targets.len(),
            "Starting sync loop"
        );

        for kind in self.kinds() {
            self.health.register(components::sync_component(kind)).await;
        }

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let report = self.run_once().await;
                    debug!(
                        succeeded = report.succeeded(),
                        failed = report.failed().count(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Sync cycle complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down sync loop");
                    break;
                }
            }
        }
    }

    /// One cycle over every target
    pub async fn run_once(&self) -> CycleReport {
        let passes = self.targets.iter().map(|t| self.sync_target(t.as_ref()));
        let report = CycleReport {
            scopes: futures::future::join_all(passes).await,
        };

        for kind in self.kinds() {
            let failed: Vec<String> = report
                .failed()
                .filter(|s| s.scope.kind == kind)
                .map(|s| s.scope.name.clone())
                .collect();
            self.health.record_scopes(kind, failed).await;
        }

        if let Some(path) = &self.config.snapshot_path {
            match self.store.save_snapshot(path).await {
                Ok(()) => self.health.set_healthy(components::STORE).await,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to save store snapshot");
                    self.health
                        .set_degraded(components::STORE, e.to_string())
                        .await;
                }
            }
        }

        self.health.set_ready(true).await;
        report
    }

    async fn sync_target(&self, target: &dyn SyncTarget) -> ScopeOutcome {
        let scope = target.scope().clone();
        let runtime = scope.kind.to_string();
        let start = Instant::now();

        match target.sync(self.store.as_ref(), &self.config.options).await {
            Ok(sync) => {
                let report = sync.report;
                self.metrics.observe_reconcile(
                    &runtime,
                    start.elapsed().as_secs_f64(),
                    report.created,
                    report.updated,
                    report.removed,
                );
                self.metrics.inc_stats_failures(report.stats_failures);
                self.logger.log_reconcile(
                    &scope.to_string(),
                    report.created,
                    report.updated,
                    report.removed,
                    report.samples,
                    report.stats_failures,
                );

                let units = self.store.units(Some(&scope)).await.unwrap_or_default();
                self.metrics.set_units_tracked(&scope.to_string(), units.len());

                let incidents = if self.config.scan_logs {
                    self.scan_logs(sync.adapter.as_ref(), &units).await
                } else {
                    0
                };

                ScopeOutcome {
                    scope,
                    result: Ok(report),
                    incidents,
                }
            }
            Err(e) => {
                self.metrics.inc_reconcile_failures(&runtime);
                self.logger.log_reconcile_failed(&scope.to_string(), &e.to_string());
                ScopeOutcome {
                    scope,
                    result: Err(e),
                    incidents: 0,
                }
            }
        }
    }

    /// Scan the log tail of every running unit; per-unit failures are skipped
    async fn scan_logs(&self, adapter: &dyn RuntimeAdapter, units: &[UnitRecord]) -> usize {
        let mut total = 0;
        for unit in units.iter().filter(|u| u.status.is_running()) {
            for (ctx, container) in incident_contexts(unit) {
                match scan_unit_logs(
                    adapter,
                    self.store.as_ref(),
                    &ctx,
                    container.as_deref(),
                    self.config.log_tail_lines,
                )
                .await
                {
                    Ok(0) => {}
                    Ok(count) => {
                        self.metrics.inc_incidents_recorded(count);
                        self.logger.log_incidents(&ctx.container_name, count);
                        total += count;
                    }
                    Err(e) => {
                        debug!(unit = %unit.external_id, error = %e, "Log scan failed");
                    }
                }
            }
        }
        total
    }

    fn kinds(&self) -> Vec<RuntimeKind> {
        let mut kinds: Vec<RuntimeKind> = Vec::new();
        for target in &self.targets {
            if !kinds.contains(&target.scope().kind) {
                kinds.push(target.scope().kind);
            }
        }
        kinds
    }
}

/// Docker containers are scanned whole; pods once per container
fn incident_contexts(unit: &UnitRecord) -> Vec<(IncidentContext, Option<String>)> {
    match unit.scope.kind {
        RuntimeKind::Docker => vec![(
            IncidentContext::new(RuntimeKind::Docker, &unit.external_id, &unit.name),
            None,
        )],
        RuntimeKind::Kubernetes => unit
            .sub_units
            .iter()
            .map(|sub| {
                (
                    IncidentContext::new(RuntimeKind::Kubernetes, &unit.external_id, &sub.name)
                        .with_service(&unit.name),
                    Some(sub.name.clone()),
                )
            })
            .collect(),
    }
}

/// Builder for the sync loop
pub struct SyncLoopBuilder {
    targets: Vec<Arc<dyn SyncTarget>>,
    store: Option<Arc<MemoryStore>>,
    health: Option<Arc<HealthRegistry>>,
    config: SyncConfig,
}

impl SyncLoopBuilder {
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
            store: None,
            health: None,
            config: SyncConfig::default(),
        }
    }

    pub fn target(mut self, target: Arc<dyn SyncTarget>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn health(mut self, health: Arc<HealthRegistry>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn options(mut self, options: SyncOptions) -> Self {
        self.config.options = options;
        self
    }

    pub fn scan_logs(mut self, enabled: bool, tail_lines: usize) -> Self {
        self.config.scan_logs = enabled;
        self.config.log_tail_lines = tail_lines;
        self
    }

    pub fn snapshot_path(mut self, path: Option<PathBuf>) -> Self {
        self.config.snapshot_path = path;
        self
    }

    pub fn build(self) -> Result<SyncLoop> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Store is required"))?;
        let health = self.health.unwrap_or_else(|| Arc::new(HealthRegistry::new()));
        if self.config.interval.is_zero() {
            anyhow::bail!("Sync interval must be non-zero");
        }

        Ok(SyncLoop::new(self.targets, store, health, self.config))
    }
}

impl Default for SyncLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
