//! Observability infrastructure for the monitor
//!
//! Provides:
//! - Prometheus metrics (reconcile latency and outcomes, stream sessions, incidents)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for reconciliation passes (in seconds)
const RECONCILE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    reconcile_latency_seconds: HistogramVec,
    units_created: IntCounterVec,
    units_updated: IntCounterVec,
    units_removed: IntCounterVec,
    reconcile_failures: IntCounterVec,
    stats_failures: IntCounter,
    units_tracked: IntGaugeVec,
    stream_sessions: IntGauge,
    stream_ticks: IntCounter,
    stream_query_failures: IntCounterVec,
    incidents_recorded: IntCounter,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_latency_seconds: register_histogram_vec!(
                "podwatch_reconcile_latency_seconds",
                "Duration of one reconciliation pass",
                &["runtime"],
                RECONCILE_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_latency_seconds"),

            units_created: register_int_counter_vec!(
                "podwatch_units_created_total",
                "Units created by reconciliation",
                &["runtime"]
            )
            .expect("Failed to register units_created"),

            units_updated: register_int_counter_vec!(
                "podwatch_units_updated_total",
                "Units overwritten by reconciliation",
                &["runtime"]
            )
            .expect("Failed to register units_updated"),

            units_removed: register_int_counter_vec!(
                "podwatch_units_removed_total",
                "Units pruned by reconciliation",
                &["runtime"]
            )
            .expect("Failed to register units_removed"),

            reconcile_failures: register_int_counter_vec!(
                "podwatch_reconcile_failures_total",
                "Reconciliation passes aborted",
                &["runtime"]
            )
            .expect("Failed to register reconcile_failures"),

            stats_failures: register_int_counter!(
                "podwatch_stats_failures_total",
                "Per-unit stats collections that failed"
            )
            .expect("Failed to register stats_failures"),

            units_tracked: register_int_gauge_vec!(
                "podwatch_units_tracked",
                "Units persisted per scope after the last pass",
                &["scope"]
            )
            .expect("Failed to register units_tracked"),

            stream_sessions: register_int_gauge!(
                "podwatch_stream_sessions",
                "Metric stream connections currently open"
            )
            .expect("Failed to register stream_sessions"),

            stream_ticks: register_int_counter!(
                "podwatch_stream_ticks_total",
                "Stream ticks completed across all sessions"
            )
            .expect("Failed to register stream_ticks"),

            stream_query_failures: register_int_counter_vec!(
                "podwatch_stream_query_failures_total",
                "Failed metric sub-queries by dimension",
                &["dimension"]
            )
            .expect("Failed to register stream_query_failures"),

            incidents_recorded: register_int_counter!(
                "podwatch_incidents_recorded_total",
                "Incident records extracted from logs"
            )
            .expect("Failed to register incidents_recorded"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Create a new metrics handle (registers global metrics on first call)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_reconcile(
        &self,
        runtime: &str,
        duration_secs: f64,
        created: usize,
        updated: usize,
        removed: usize,
    ) {
        let inner = self.inner();
        inner
            .reconcile_latency_seconds
            .with_label_values(&[runtime])
            .observe(duration_secs);
        inner.units_created.with_label_values(&[runtime]).inc_by(created as u64);
        inner.units_updated.with_label_values(&[runtime]).inc_by(updated as u64);
        inner.units_removed.with_label_values(&[runtime]).inc_by(removed as u64);
    }

    pub fn inc_reconcile_failures(&self, runtime: &str) {
        self.inner().reconcile_failures.with_label_values(&[runtime]).inc();
    }

    pub fn inc_stats_failures(&self, count: usize) {
        self.inner().stats_failures.inc_by(count as u64);
    }

    pub fn set_units_tracked(&self, scope: &str, count: usize) {
        self.inner()
            .units_tracked
            .with_label_values(&[scope])
            .set(count as i64);
    }

    pub fn stream_opened(&self) {
        self.inner().stream_sessions.inc();
    }

    pub fn stream_closed(&self) {
        self.inner().stream_sessions.dec();
    }

    pub fn inc_stream_ticks(&self) {
        self.inner().stream_ticks.inc();
    }

    pub fn inc_stream_query_failures(&self, dimension: &str) {
        self.inner()
            .stream_query_failures
            .with_label_values(&[dimension])
            .inc();
    }

    pub fn inc_incidents_recorded(&self, count: usize) {
        self.inner().incidents_recorded.inc_by(count as u64);
    }
}

/// Structured logger for monitor lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, docker_hosts: usize, clusters: usize) {
        info!(
            event = "agent_started",
            instance = %self.instance,
            agent_version = %version,
            docker_hosts = docker_hosts,
            clusters = clusters,
            "Podwatch agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Podwatch agent shutting down"
        );
    }

    pub fn log_reconcile(
        &self,
        scope: &str,
        created: usize,
        updated: usize,
        removed: usize,
        samples: usize,
        stats_failures: usize,
    ) {
        info!(
            event = "reconcile_completed",
            instance = %self.instance,
            scope = %scope,
            created = created,
            updated = updated,
            removed = removed,
            samples = samples,
            stats_failures = stats_failures,
            "Reconciliation pass completed"
        );
    }

    pub fn log_reconcile_failed(&self, scope: &str, error: &str) {
        warn!(
            event = "reconcile_failed",
            instance = %self.instance,
            scope = %scope,
            error = %error,
            "Reconciliation pass aborted"
        );
    }

    pub fn log_stream_opened(&self, user: &str, container: Option<&str>, period_secs: u64) {
        info!(
            event = "stream_opened",
            instance = %self.instance,
            user = %user,
            container = ?container,
            period_secs = period_secs,
            "Metric stream opened"
        );
    }

    pub fn log_stream_closed(&self, user: &str, reason: &str, ticks: u64) {
        info!(
            event = "stream_closed",
            instance = %self.instance,
            user = %user,
            reason = %reason,
            ticks = ticks,
            "Metric stream closed"
        );
    }

    pub fn log_incidents(&self, container: &str, count: usize) {
        if count > 0 {
            warn!(
                event = "incidents_recorded",
                instance = %self.instance,
                container = %container,
                count = count,
                "Error blocks found in container logs"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_metrics_creation() {
        let metrics = MonitorMetrics::new();
        let other = MonitorMetrics::new();

        metrics.observe_reconcile("docker", 0.2, 1, 2, 1);
        metrics.inc_reconcile_failures("kubernetes");
        metrics.inc_stats_failures(2);
        metrics.set_units_tracked("docker/local", 3);
        other.stream_opened();
        other.inc_stream_ticks();
        other.inc_stream_query_failures("netrx");
        other.stream_closed();
        metrics.inc_incidents_recorded(1);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "podwatch_units_created_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-instance");
        assert_eq!(logger.instance, "test-instance");
        logger.log_incidents("web", 0);
    }
}
