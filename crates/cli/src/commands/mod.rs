//! Command implementations

pub mod action;
pub mod containers;
pub mod host_info;
pub mod incidents;
pub mod sync;

use crate::config::{Config, HostEntry};
use crate::output::OutputFormat;
use agent_lib::runtime::DockerAdapter;
use agent_lib::store::MemoryStore;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::debug;

/// Everything a command needs besides its own arguments
pub struct CliContext {
    pub config: Config,
    pub snapshot: PathBuf,
    pub format: OutputFormat,
}

impl CliContext {
    pub fn open_store(&self) -> Result<MemoryStore> {
        MemoryStore::open(&self.snapshot)
            .with_context(|| format!("Failed to load state from {}", self.snapshot.display()))
    }

    pub async fn save_store(&self, store: &MemoryStore) -> Result<()> {
        store
            .save_snapshot(&self.snapshot)
            .await
            .with_context(|| format!("Failed to save state to {}", self.snapshot.display()))
    }

    /// Configured host entry by name
    pub fn host(&self, name: &str) -> Result<HostEntry> {
        self.config
            .select_hosts(Some(name))
            .into_iter()
            .next()
            .with_context(|| format!("Docker host '{}' is not configured", name))
    }

    pub async fn connect_host(&self, host: &HostEntry) -> Result<DockerAdapter> {
        let adapter = DockerAdapter::connect_descriptor(&host.host_url, self.config.connect_timeout())
            .await
            .with_context(|| format!("Cannot connect to Docker host '{}'", host.name))?;
        debug!(host = %host.name, strategy = %adapter.strategy(), "Connected");
        Ok(adapter)
    }
}
