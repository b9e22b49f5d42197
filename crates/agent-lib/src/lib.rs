//! Agent library for mirroring Kubernetes cluster state
//!
//! This crate provides the core functionality for:
//! - Collector orchestration (concurrent start, shared sync, ordered stop)
//! - An in-memory store with one typed map per resource kind
//! - Pod ownership resolution to top-level controllers
//! - The lifecycle state machine driven by backend responses
//! - Periodic snapshot shipping
//! - Health checks and observability

pub mod collector;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod ownership;
pub mod snapshot;
pub mod store;

pub use collector::{Collector, CollectorRegistry, RegistryError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use lifecycle::{AgentState, LifecycleStatus, StateMachine};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use ownership::OwnershipEnricher;
pub use snapshot::{LogSink, SnapshotConfig, SnapshotLoop, SnapshotSink};
pub use store::{ResourceKind, Store, TypedStore};
