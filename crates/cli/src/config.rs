//! Configuration management for the CLI

use agent_lib::runtime::KubeStrategy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCAL_HOST: &str = "local";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Store snapshot shared by every command
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub docker_hosts: Vec<HostEntry>,
    #[serde(default)]
    pub clusters: Vec<ClusterEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub name: String,
    #[serde(default)]
    pub host_url: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub name: String,
    #[serde(default)]
    pub kubeconfig: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub in_cluster: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl ClusterEntry {
    pub fn strategies(&self) -> Vec<KubeStrategy> {
        KubeStrategy::for_cluster(
            self.kubeconfig.as_deref(),
            self.context.as_deref(),
            self.in_cluster,
        )
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from `path`, or the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    fn config_dir() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("podwatch"))
    }

    /// Snapshot location: flag, then config, then next to the config file
    pub fn snapshot_path(&self, override_path: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = override_path {
            return Ok(path.to_path_buf());
        }
        match &self.snapshot_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("state.json")),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)
                .max(1),
        )
    }

    /// Active hosts, optionally narrowed to one name
    ///
    /// With no hosts configured the local engine is used under the name
    /// `local`.
    pub fn select_hosts(&self, name: Option<&str>) -> Vec<HostEntry> {
        let hosts: Vec<HostEntry> = if self.docker_hosts.is_empty() {
            vec![HostEntry {
                name: LOCAL_HOST.to_string(),
                host_url: String::new(),
                active: true,
            }]
        } else {
            self.docker_hosts.clone()
        };

        hosts
            .into_iter()
            .filter(|h| match name {
                Some(n) => h.name == n,
                None => h.active,
            })
            .collect()
    }

    /// Active clusters, optionally narrowed to one name
    pub fn select_clusters(&self, name: Option<&str>) -> Vec<ClusterEntry> {
        self.clusters
            .iter()
            .filter(|c| match name {
                Some(n) => c.name == n,
                None => c.active,
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("none.json"))).unwrap();
        assert!(config.docker_hosts.is_empty());
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_implicit_local_host() {
        let config = Config::default();
        let hosts = config.select_hosts(None);
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "local");
        assert!(config.select_hosts(Some("edge")).is_empty());
    }

    #[test]
    fn test_select_skips_inactive_unless_named() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "snapshot_path": "/tmp/pw-state.json",
                "docker_hosts": [
                    {"name": "a", "host_url": "tcp://10.0.0.1:2375"},
                    {"name": "b", "active": false}
                ],
                "clusters": [{"name": "prod", "in_cluster": true}]
            }"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        let names: Vec<_> = config.select_hosts(None).into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["a"]);
        assert_eq!(config.select_hosts(Some("b")).len(), 1);
        assert_eq!(config.select_clusters(None)[0].strategies().len(), 2);
        assert_eq!(
            config.snapshot_path(None).unwrap(),
            PathBuf::from("/tmp/pw-state.json")
        );
    }
}
