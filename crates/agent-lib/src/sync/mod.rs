//! Periodic synchronization of every configured scope
//!
//! This module provides:
//! - Sync targets for Docker hosts and Kubernetes clusters, connected lazily
//!   and reconnected after connectivity failures
//! - The sync loop that reconciles all targets each cycle

mod r#loop;
mod targets;

#[cfg(test)]
mod tests;

pub use r#loop::{CycleReport, ScopeOutcome, SyncConfig, SyncLoop, SyncLoopBuilder};
pub use targets::{
    ClusterTarget, DockerHostTarget, HostTarget, KubeClusterTarget, SyncTarget, TargetSync,
};
