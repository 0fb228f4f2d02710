//! Reconciliation of classification resources
//!
//! A pass validates and compiles a resource's spec, captures one snapshot per
//! referenced app group, classifies, applies authority, and commits status.
//! The driver owns the per-resource lifecycle and trigger coalescing.

mod driver;
mod pass;
mod slot;


pub use driver::{
    DriverConfig, MembershipChange, ReconcileDriver, ReconcileDriverBuilder, ResourceEvent,
};
pub use pass::{classify, evaluate, prepare, PassOutcome, PreparedSpec, Rejection};
