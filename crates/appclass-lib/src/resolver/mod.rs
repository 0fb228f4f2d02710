//! Classification and conflict resolution
//!
//! This module provides:
//! - Specification validation and predicate-to-class binding
//! - Predicate-driven candidate classification of workload units
//! - Merging of candidates with authoritative global overrides

mod authority;
mod binding;
mod classification;

pub use authority::{reconcile, ClassificationConflict, FinalAssignments, Resolution};
pub use binding::{bind, ClassBindings};
pub use classification::{resolve, CandidateAssignments, ClassMatch};
