//! Classification core for AppClass resources
//!
//! This crate provides the core functionality for:
//! - Predicate compilation and evaluation over workload attributes
//! - Classification of workload units and conflict/authority resolution
//! - Status assembly and the per-resource reconciliation driver
//! - Health checks and observability

pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod predicate;
pub mod provider;
pub mod reconcile;
pub mod resolver;
pub mod status;
pub mod store;

pub use error::{PassError, PredicateCompileError, ProviderError, SpecificationError, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use provider::{StaticAttributeProvider, WorkloadAttributeProvider};
pub use reconcile::{
    DriverConfig, MembershipChange, ReconcileDriver, ReconcileDriverBuilder, ResourceEvent,
};
pub use store::{InMemoryStatusStore, StatusStore};
