//! Container lifecycle actions

use super::CliContext;
use crate::output::{print_json, print_success, OutputFormat};
use agent_lib::models::{ScopeId, UnitAction};
use agent_lib::runtime::RuntimeAdapter;
use agent_lib::store::StateStore;
use anyhow::{Context, Result};
use serde_json::json;

/// `pw action HOST CONTAINER ACTION`
///
/// `container` is a Docker id or name; a name recorded by a previous sync
/// is resolved to its id first.
pub async fn run_action(
    ctx: &CliContext,
    host: &str,
    container: &str,
    action: UnitAction,
) -> Result<()> {
    let entry = ctx.host(host)?;
    let store = ctx.open_store()?;
    let scope = ScopeId::docker(&entry.name);

    let target = store
        .units(Some(&scope))
        .await?
        .into_iter()
        .find(|u| u.name == container)
        .map(|u| u.external_id)
        .unwrap_or_else(|| container.to_string());

    let adapter = ctx.connect_host(&entry).await?;
    adapter
        .perform_action(&target, action)
        .await
        .with_context(|| format!("Failed to {} {} on {}", action, container, host))?;

    match ctx.format {
        OutputFormat::Json => print_json(&json!({
            "host": host,
            "container": container,
            "action": action.to_string(),
            "ok": true,
        }))?,
        OutputFormat::Table => {
            print_success(&format!("{} {} on {}", action, container, host))
        }
    }
    Ok(())
}
