//! Listing of persisted units

use super::CliContext;
use crate::output::{color_status, format_bytes, print_rows, short_id};
use agent_lib::models::{CpuUsage, MetricSample, ScopeId, UnitRecord};
use agent_lib::store::StateStore;
use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Restarts")]
    restarts: u32,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
}

#[derive(Serialize)]
struct ContainerView {
    #[serde(flatten)]
    unit: UnitRecord,
    latest_sample: Option<MetricSample>,
}

fn format_cpu(usage: &CpuUsage) -> String {
    match usage {
        CpuUsage::Percent(p) => format!("{:.1}%", p),
        CpuUsage::Millicores(m) => format!("{:.0}m", m),
    }
}

/// `pw containers [--host NAME]`
pub async fn list_containers(ctx: &CliContext, host: Option<String>) -> Result<()> {
    let store = ctx.open_store()?;
    let scope = host.map(ScopeId::docker);

    let mut units = store.units(scope.as_ref()).await?;
    units.sort_by(|a, b| a.scope.cmp(&b.scope).then_with(|| a.name.cmp(&b.name)));

    let mut views = Vec::with_capacity(units.len());
    for unit in units {
        let latest_sample = store
            .samples(&unit.scope, &unit.external_id)
            .await?
            .into_iter()
            .filter(|s| s.owner.sub_unit.is_none())
            .max_by_key(|s| s.timestamp);
        views.push(ContainerView {
            unit,
            latest_sample,
        });
    }

    let rows: Vec<ContainerRow> = views
        .iter()
        .map(|v| ContainerRow {
            scope: v.unit.scope.to_string(),
            name: v.unit.name.clone(),
            id: short_id(&v.unit.external_id),
            image: v.unit.image.clone().unwrap_or_default(),
            status: color_status(v.unit.status.as_str()),
            restarts: v.unit.restart_count,
            ip: v.unit.network.ip_address.clone().unwrap_or_default(),
            cpu: v
                .latest_sample
                .as_ref()
                .map(|s| format_cpu(&s.cpu))
                .unwrap_or_else(|| "-".to_string()),
            memory: v
                .latest_sample
                .as_ref()
                .map(|s| format_bytes(s.memory_usage_bytes as i64))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    print_rows(rows, &views, ctx.format)
}
