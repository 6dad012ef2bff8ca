//! Error-log extraction and incident listing

use super::CliContext;
use crate::output::{print_info, print_rows, print_success, short_id, truncate, OutputFormat};
use agent_lib::incidents::{build_incidents, IncidentContext};
use agent_lib::models::{IncidentRecord, RuntimeKind};
use agent_lib::store::StateStore;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::ValueEnum;
use std::path::Path;
use tabled::Tabled;

/// Runtime the log file came from
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum SourceArg {
    #[default]
    Docker,
    Kubernetes,
}

impl From<SourceArg> for RuntimeKind {
    fn from(s: SourceArg) -> Self {
        match s {
            SourceArg::Docker => RuntimeKind::Docker,
            SourceArg::Kubernetes => RuntimeKind::Kubernetes,
        }
    }
}

#[derive(Tabled)]
struct IncidentRow {
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Summary")]
    summary: String,
}

impl From<&IncidentRecord> for IncidentRow {
    fn from(r: &IncidentRecord) -> Self {
        Self {
            timestamp: r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            source: r.source_type.to_string(),
            container: format!("{} ({})", r.container_name, short_id(&r.container_id)),
            service: r.service_name.clone().unwrap_or_default(),
            summary: truncate(&r.summary, 80),
        }
    }
}

/// `pw incidents extract FILE --container NAME [--service S]`
pub async fn extract(
    ctx: &CliContext,
    file: &Path,
    container: &str,
    container_id: Option<String>,
    service: Option<String>,
    source: SourceArg,
) -> Result<()> {
    let log = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read log file {}", file.display()))?;

    let mut incident_ctx = IncidentContext::new(
        source.into(),
        container_id.unwrap_or_else(|| container.to_string()),
        container,
    );
    if let Some(service) = service {
        incident_ctx = incident_ctx.with_service(service);
    }

    let incidents = build_incidents(&incident_ctx, &log, Utc::now());
    if incidents.is_empty() {
        print_info("No error blocks found");
        return Ok(());
    }

    let store = ctx.open_store()?;
    let count = store.append_incidents(incidents.clone()).await?;
    ctx.save_store(&store).await?;

    let rows: Vec<IncidentRow> = incidents.iter().map(IncidentRow::from).collect();
    print_rows(rows, &incidents, ctx.format)?;
    if matches!(ctx.format, OutputFormat::Table) {
        print_success(&format!("Recorded {} incidents for {}", count, container));
    }
    Ok(())
}

/// `pw incidents list [--container ID]`
pub async fn list(ctx: &CliContext, container_id: Option<String>) -> Result<()> {
    let store = ctx.open_store()?;
    let mut incidents = store.incidents(container_id.as_deref()).await?;
    incidents.sort_by_key(|i| i.timestamp);

    let rows: Vec<IncidentRow> = incidents.iter().map(IncidentRow::from).collect();
    print_rows(rows, &incidents, ctx.format)
}
