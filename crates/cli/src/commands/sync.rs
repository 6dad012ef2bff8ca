//! One-shot sync of Docker hosts and Kubernetes clusters

use super::CliContext;
use crate::output::{color_status, print_error, print_rows, print_warning, OutputFormat};
use agent_lib::reconcile::{sync_cluster, sync_host, ClusterSyncReport, ReconcileReport, SyncOptions};
use agent_lib::runtime::KubernetesAdapter;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use tabled::Tabled;

#[derive(Tabled)]
struct HostRow {
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Created")]
    created: usize,
    #[tabled(rename = "Updated")]
    updated: usize,
    #[tabled(rename = "Removed")]
    removed: usize,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Stats Failures")]
    stats_failures: usize,
    #[tabled(rename = "Status")]
    status: String,
}

#[derive(Serialize)]
struct HostResult {
    host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ReconcileReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&HostResult> for HostRow {
    fn from(r: &HostResult) -> Self {
        let report = r.report.clone().unwrap_or_default();
        Self {
            host: r.host.clone(),
            created: report.created,
            updated: report.updated,
            removed: report.removed,
            samples: report.samples,
            stats_failures: report.stats_failures,
            status: match &r.error {
                None => color_status("ok"),
                Some(_) => color_status("failed"),
            },
        }
    }
}

/// `pw sync docker [--host NAME] [--skip-metrics]`
pub async fn sync_docker(ctx: &CliContext, host: Option<String>, skip_metrics: bool) -> Result<()> {
    let hosts = ctx.config.select_hosts(host.as_deref());
    if hosts.is_empty() {
        bail!("No matching active Docker hosts configured");
    }

    let store = ctx.open_store()?;
    let options = SyncOptions {
        skip_metrics,
        ..Default::default()
    };

    let mut results = Vec::with_capacity(hosts.len());
    for host in &hosts {
        let outcome = match ctx.connect_host(host).await {
            Ok(adapter) => sync_host(&host.name, &adapter, &store, &options)
                .await
                .with_context(|| format!("Sync of host '{}' failed", host.name)),
            Err(e) => Err(e),
        };
        results.push(match outcome {
            Ok(report) => HostResult {
                host: host.name.clone(),
                report: Some(report),
                error: None,
            },
            Err(e) => {
                print_error(&format!("{:#}", e));
                HostResult {
                    host: host.name.clone(),
                    report: None,
                    error: Some(format!("{:#}", e)),
                }
            }
        });
    }

    ctx.save_store(&store).await?;

    let rows: Vec<HostRow> = results.iter().map(HostRow::from).collect();
    print_rows(rows, &results, ctx.format)?;
    if matches!(ctx.format, OutputFormat::Table) {
        for result in &results {
            if let Some(report) = result.report.as_ref().filter(|r| r.stats_failures > 0) {
                print_warning(&format!(
                    "{}: stats unavailable for {} containers",
                    result.host, report.stats_failures
                ));
            }
        }
    }

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        bail!("{} of {} hosts failed to sync", failed, results.len());
    }
    Ok(())
}

#[derive(Tabled)]
struct ClusterRow {
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "Namespaces")]
    namespaces: String,
    #[tabled(rename = "Pods (+/~/-)")]
    pods: String,
    #[tabled(rename = "Events")]
    events: usize,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Status")]
    status: String,
}

#[derive(Serialize)]
struct ClusterResult {
    cluster: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ClusterSyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&ClusterResult> for ClusterRow {
    fn from(r: &ClusterResult) -> Self {
        let report = r.report.clone().unwrap_or_default();
        Self {
            cluster: r.cluster.clone(),
            namespaces: format!(
                "{} (-{})",
                report.namespaces.created + report.namespaces.updated,
                report.namespaces.removed
            ),
            pods: format!(
                "{}/{}/{}",
                report.pods.created, report.pods.updated, report.pods.removed
            ),
            events: report.events.created + report.events.updated,
            samples: report.pods.samples,
            status: match &r.error {
                None => color_status("ok"),
                Some(_) => color_status("failed"),
            },
        }
    }
}

/// `pw sync k8s [--cluster NAME]`
pub async fn sync_k8s(ctx: &CliContext, cluster: Option<String>) -> Result<()> {
    let clusters = ctx.config.select_clusters(cluster.as_deref());
    if clusters.is_empty() {
        bail!("No matching active clusters configured");
    }

    let store = ctx.open_store()?;
    let options = SyncOptions::default();

    let mut results = Vec::with_capacity(clusters.len());
    for cluster in &clusters {
        let outcome = async {
            let adapter = KubernetesAdapter::connect(
                cluster.name.clone(),
                &cluster.strategies(),
                ctx.config.connect_timeout(),
            )
            .await
            .with_context(|| format!("Cannot connect to cluster '{}'", cluster.name))?;
            sync_cluster(&cluster.name, &adapter, &store, &options)
                .await
                .with_context(|| format!("Sync of cluster '{}' failed", cluster.name))
        }
        .await;

        results.push(match outcome {
            Ok(report) => ClusterResult {
                cluster: cluster.name.clone(),
                report: Some(report),
                error: None,
            },
            Err(e) => {
                print_error(&format!("{:#}", e));
                ClusterResult {
                    cluster: cluster.name.clone(),
                    report: None,
                    error: Some(format!("{:#}", e)),
                }
            }
        });
    }

    ctx.save_store(&store).await?;

    let rows: Vec<ClusterRow> = results.iter().map(ClusterRow::from).collect();
    print_rows(rows, &results, ctx.format)?;

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        bail!("{} of {} clusters failed to sync", failed, results.len());
    }
    Ok(())
}
