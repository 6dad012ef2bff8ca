//! Ordered connection strategies
//!
//! An adapter is constructed from an explicit list of strategies. Each one
//! is tried in order with its own timeout; the first that connects and
//! answers a ping wins. If all fail, the error lists every attempt.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_UNIX_SOCKETS: &[&str] = &["/var/run/docker.sock", "/run/docker.sock"];
const DEFAULT_NAMED_PIPE: &str = "//./pipe/docker_engine";
const DEFAULT_LOOPBACK: &str = "tcp://127.0.0.1:2375";

/// How to reach a Docker engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStrategy {
    /// Platform default (environment, then the runtime's built-in location)
    PlatformDefault,
    /// Unix domain socket, or a named pipe on Windows
    LocalSocket(PathBuf),
    /// TCP/HTTP endpoint
    Http(String),
}

impl ConnectionStrategy {
    /// Default detection order: platform default, local sockets, loopback
    pub fn default_order() -> Vec<Self> {
        let mut strategies = vec![ConnectionStrategy::PlatformDefault];
        if cfg!(windows) {
            strategies.push(ConnectionStrategy::LocalSocket(PathBuf::from(
                DEFAULT_NAMED_PIPE,
            )));
        } else {
            strategies.extend(
                DEFAULT_UNIX_SOCKETS
                    .iter()
                    .map(|p| ConnectionStrategy::LocalSocket(PathBuf::from(p))),
            );
        }
        strategies.push(ConnectionStrategy::Http(DEFAULT_LOOPBACK.to_string()));
        strategies
    }

    /// Strategies for a configured host URL. Empty or `auto` detects.
    pub fn from_descriptor(descriptor: &str) -> Vec<Self> {
        let descriptor = descriptor.trim();
        match descriptor {
            "" | "auto" | "env" => Self::default_order(),
            d if d.starts_with("unix://") => vec![ConnectionStrategy::LocalSocket(
                PathBuf::from(&d["unix://".len()..]),
            )],
            d if d.starts_with("npipe://") => vec![ConnectionStrategy::LocalSocket(
                PathBuf::from(&d["npipe://".len()..]),
            )],
            d if d.starts_with("tcp://") || d.starts_with("http://") => {
                vec![ConnectionStrategy::Http(d.to_string())]
            }
            d if d.starts_with('/') => vec![ConnectionStrategy::LocalSocket(PathBuf::from(d))],
            d => vec![ConnectionStrategy::Http(d.to_string())],
        }
    }
}

impl fmt::Display for ConnectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStrategy::PlatformDefault => f.write_str("platform-default"),
            ConnectionStrategy::LocalSocket(path) => write!(f, "socket {}", path.display()),
            ConnectionStrategy::Http(url) => write!(f, "http {}", url),
        }
    }
}

/// How to reach a Kubernetes API server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KubeStrategy {
    Kubeconfig {
        path: PathBuf,
        context: Option<String>,
    },
    InCluster,
    /// kube's own inference (KUBECONFIG, ~/.kube/config, in-cluster)
    Inferred,
}

impl KubeStrategy {
    /// Ordered strategies for a cluster target
    pub fn for_cluster(kubeconfig: Option<&str>, context: Option<&str>, in_cluster: bool) -> Vec<Self> {
        let mut strategies = Vec::new();
        if let Some(path) = kubeconfig.filter(|p| !p.trim().is_empty()) {
            strategies.push(KubeStrategy::Kubeconfig {
                path: PathBuf::from(path),
                context: context.map(str::to_string),
            });
        }
        if in_cluster {
            strategies.push(KubeStrategy::InCluster);
        }
        strategies.push(KubeStrategy::Inferred);
        strategies
    }
}

impl fmt::Display for KubeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KubeStrategy::Kubeconfig { path, context } => match context {
                Some(ctx) => write!(f, "kubeconfig {} (context {})", path.display(), ctx),
                None => write!(f, "kubeconfig {}", path.display()),
            },
            KubeStrategy::InCluster => f.write_str("in-cluster"),
            KubeStrategy::Inferred => f.write_str("inferred"),
        }
    }
}

/// One failed connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub strategy: String,
    pub cause: String,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.cause)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("no connection strategies configured")]
    NoStrategies,
    #[error("all {} connection attempts failed: {}", .attempts.len(), join_attempts(.attempts))]
    Exhausted { attempts: Vec<AttemptFailure> },
}

fn join_attempts(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Try each strategy in order and return the first successful connection
///
/// `connect` must establish and verify the connection (e.g. ping). Each
/// attempt is bounded by `timeout`; a timed-out attempt counts as failed.
pub async fn connect_first<S, T, F, Fut>(
    strategies: &[S],
    timeout: Duration,
    mut connect: F,
) -> Result<(T, S), ConnectError>
where
    S: fmt::Display + Clone,
    F: FnMut(S) -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    if strategies.is_empty() {
        return Err(ConnectError::NoStrategies);
    }

    let mut attempts = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        debug!(strategy = %strategy, "Trying connection strategy");
        let cause = match tokio::time::timeout(timeout, connect(strategy.clone())).await {
            Ok(Ok(conn)) => {
                info!(strategy = %strategy, "Connected");
                return Ok((conn, strategy.clone()));
            }
            Ok(Err(e)) => e,
            Err(_) => format!("timed out after {}ms", timeout.as_millis()),
        };
        warn!(strategy = %strategy, cause = %cause, "Connection strategy failed");
        attempts.push(AttemptFailure {
            strategy: strategy.to_string(),
            cause,
        });
    }

    Err(ConnectError::Exhausted { attempts })
}
