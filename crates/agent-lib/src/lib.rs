//! Container state monitor library
//!
//! This crate provides the core functionality for:
//! - Docker and Kubernetes runtime adapters
//! - Stats normalization into derived metric samples
//! - Reconciliation of persisted state against live enumeration
//! - Error-log incident extraction
//! - Live metric streaming from an external metrics source
//! - Health checks and observability

pub mod health;
pub mod incidents;
pub mod models;
pub mod observability;
pub mod reconcile;
pub mod runtime;
pub mod stats;
pub mod store;
pub mod stream;
pub mod sync;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use store::{MemoryStore, StateStore, StoreError};
