//! Agent configuration

use agent_lib::runtime::KubeStrategy;
use agent_lib::stream::ApiToken;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_ENV: &str = "PODWATCH_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "podwatch.toml";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Instance name attached to lifecycle log events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for health, metrics and streaming
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Collect stats samples for running units during sync
    #[serde(default = "default_true")]
    pub collect_metrics: bool,

    /// Extract incidents from running units' logs after each pass
    #[serde(default)]
    pub scan_logs: bool,

    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,

    /// Per-attempt runtime connection timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Store snapshot, loaded at startup and saved after every cycle
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    #[serde(default)]
    pub prometheus: PrometheusConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub docker_hosts: Vec<DockerHostConfig>,

    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,

    /// Credentials accepted by the metrics stream
    #[serde(default)]
    pub tokens: Vec<ApiToken>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default = "default_prometheus_url")]
    pub url: String,
    #[serde(default = "default_prometheus_timeout")]
    pub timeout_secs: u64,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: default_prometheus_url(),
            timeout_secs: default_prometheus_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_period")]
    pub default_period_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_period_secs: default_period(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerHostConfig {
    pub name: String,
    /// Empty means auto-detect the local engine
    #[serde(default)]
    pub host_url: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
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

impl ClusterConfig {
    pub fn strategies(&self) -> Vec<KubeStrategy> {
        KubeStrategy::for_cluster(
            self.kubeconfig.as_deref(),
            self.context.as_deref(),
            self.in_cluster,
        )
    }
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "podwatch".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_sync_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_log_tail_lines() -> usize {
    100
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_prometheus_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_prometheus_timeout() -> u64 {
    10
}

fn default_period() -> u64 {
    5
}

impl AgentConfig {
    /// Load from `$PODWATCH_CONFIG` (or `podwatch.toml`) then `PODWATCH__*` env
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from a specific file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("PODWATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        let config: AgentConfig = config
            .try_deserialize()
            .context("Invalid agent configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 {
            bail!("sync_interval_secs must be greater than zero");
        }

        let mut seen = HashSet::new();
        for name in self.docker_hosts.iter().map(|h| &h.name) {
            if name.trim().is_empty() || !seen.insert(name) {
                bail!("docker host names must be unique and non-empty: {:?}", name);
            }
        }
        let mut seen = HashSet::new();
        for name in self.clusters.iter().map(|c| &c.name) {
            if name.trim().is_empty() || !seen.insert(name) {
                bail!("cluster names must be unique and non-empty: {:?}", name);
            }
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.prometheus.timeout_secs.max(1))
    }

    pub fn active_hosts(&self) -> impl Iterator<Item = &DockerHostConfig> {
        self.docker_hosts.iter().filter(|h| h.active)
    }

    pub fn active_clusters(&self) -> impl Iterator<Item = &ClusterConfig> {
        self.clusters.iter().filter(|c| c.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load_from(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.sync_interval(), Duration::from_secs(30));
        assert!(config.collect_metrics);
        assert!(!config.scan_logs);
        assert_eq!(config.log_tail_lines, 100);
        assert_eq!(config.prometheus.url, "http://localhost:9090");
        assert_eq!(config.query_timeout(), Duration::from_secs(10));
        assert_eq!(config.stream.default_period_secs, 5);
        assert!(config.docker_hosts.is_empty());
    }

    #[test]
    fn test_targets_and_tokens_from_file() {
        let file = write_config(
            r#"
            sync_interval_secs = 10

            [prometheus]
            url = "http://prom:9090"

            [[docker_hosts]]
            name = "local"

            [[docker_hosts]]
            name = "old"
            host_url = "tcp://10.0.0.5:2375"
            active = false

            [[clusters]]
            name = "prod"
            kubeconfig = "/etc/kube/prod"
            context = "admin"

            [[tokens]]
            token = "secret"
            username = "alice"
            "#,
        );

        let config = AgentConfig::load_from(file.path()).unwrap();
        assert_eq!(config.sync_interval_secs, 10);
        assert_eq!(config.prometheus.url, "http://prom:9090");
        assert_eq!(config.prometheus.timeout_secs, 10);

        let hosts: Vec<_> = config.active_hosts().map(|h| h.name.as_str()).collect();
        assert_eq!(hosts, vec!["local"]);

        let cluster = config.active_clusters().next().unwrap();
        assert_eq!(cluster.strategies().len(), 2);
        assert!(config.tokens[0].enabled);
    }

    #[test]
    fn test_duplicate_host_names_rejected() {
        let file = write_config(
            r#"
            [[docker_hosts]]
            name = "a"
            [[docker_hosts]]
            name = "a"
            "#,
        );
        assert!(AgentConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let file = write_config("sync_interval_secs = 0\n");
        assert!(AgentConfig::load_from(file.path()).is_err());
    }
}
