//! Liveness and readiness of the monitor's moving parts
//!
//! Each sync component tracks which scopes failed on the last cycle; a
//! component with failing scopes is degraded, never unhealthy, because the
//! other scopes keep syncing.

use crate::models::RuntimeKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Running, but some scopes or writes are failing
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        !matches!(self, ComponentStatus::Unhealthy)
    }

    fn severity(self) -> u8 {
        match self {
            ComponentStatus::Healthy => 0,
            ComponentStatus::Degraded => 1,
            ComponentStatus::Unhealthy => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Scopes whose last pass failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failing_scopes: Vec<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn at_now(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            failing_scopes: Vec::new(),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::at_now(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::at_now(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::at_now(ComponentStatus::Unhealthy, Some(message.into()))
    }

    /// Healthy with no failures, otherwise degraded naming each failed scope
    pub fn from_scopes(failing: Vec<String>) -> Self {
        if failing.is_empty() {
            return Self::healthy();
        }
        let mut health = Self::degraded(format!("sync failed for {}", failing.join(", ")));
        health.failing_scopes = failing;
        health
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components; an empty set is healthy
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max_by_key(|s| s.severity())
            .unwrap_or(ComponentStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    use crate::models::RuntimeKind;

    pub const DOCKER_SYNC: &str = "docker_sync";
    pub const KUBERNETES_SYNC: &str = "kubernetes_sync";
    pub const STORE: &str = "store";
    pub const STREAM: &str = "stream";

    /// Sync component responsible for a runtime's scopes
    pub fn sync_component(kind: RuntimeKind) -> &'static str {
        match kind {
            RuntimeKind::Docker => DOCKER_SYNC,
            RuntimeKind::Kubernetes => KUBERNETES_SYNC,
        }
    }
}

/// Shared, cloneable view of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    synced: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Record the outcome of one cycle for every scope of a runtime
    pub async fn record_scopes(&self, kind: RuntimeKind, failing: Vec<String>) {
        self.update(
            components::sync_component(kind),
            ComponentHealth::from_scopes(failing),
        )
        .await;
    }

    /// Mark whether a full sync cycle has finished
    pub async fn set_ready(&self, ready: bool) {
        *self.synced.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        HealthResponse {
            status: HealthResponse::compute_status(&components),
            components,
        }
    }

    /// Ready once a cycle finished and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let reason = if !*self.synced.read().await {
            Some("First sync cycle has not completed".to_string())
        } else {
            let components = self.components.read().await;
            let mut down: Vec<&str> = components
                .iter()
                .filter(|(_, c)| !c.status.is_operational())
                .map(|(name, _)| name.as_str())
                .collect();
            down.sort_unstable();
            (!down.is_empty()).then(|| format!("Unhealthy components: {}", down.join(", ")))
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn failing_scopes_degrade_their_runtime() {
        let registry = HealthRegistry::new();
        registry.register(components::DOCKER_SYNC).await;
        registry
            .record_scopes(
                RuntimeKind::Kubernetes,
                vec!["prod".to_string(), "staging".to_string()],
            )
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.status.is_operational());

        let k8s = &health.components[components::KUBERNETES_SYNC];
        assert_eq!(k8s.message.as_deref(), Some("sync failed for prod, staging"));
        assert_eq!(k8s.failing_scopes, vec!["prod", "staging"]);
        assert_eq!(
            health.components[components::DOCKER_SYNC].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn recovered_scopes_clear_degradation() {
        let registry = HealthRegistry::new();
        registry
            .record_scopes(RuntimeKind::Docker, vec!["edge-1".to_string()])
            .await;
        registry.record_scopes(RuntimeKind::Docker, Vec::new()).await;

        let health = registry.health().await;
        let docker = &health.components[components::DOCKER_SYNC];
        assert_eq!(docker.status, ComponentStatus::Healthy);
        assert!(docker.failing_scopes.is_empty());
    }

    #[tokio::test]
    async fn unhealthy_outranks_degraded() {
        let registry = HealthRegistry::new();
        registry.set_degraded(components::STREAM, "slow source").await;
        registry.set_unhealthy(components::STORE, "snapshot write failed").await;

        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn readiness_follows_first_cycle_and_unhealthy_components() {
        let registry = HealthRegistry::new();
        registry.register(components::DOCKER_SYNC).await;
        assert!(!registry.readiness().await.ready);

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry
            .record_scopes(RuntimeKind::Docker, vec!["edge-1".to_string()])
            .await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(components::STORE, "disk full").await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Unhealthy components: store"));
    }
}
