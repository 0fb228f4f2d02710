//! Error taxonomy for classification passes
//!
//! Every failure is mapped to one of these kinds before it leaves a
//! component; only [`Problem`] records reach the status layer.

use crate::models::{AppGroupKey, Problem, ResourceKey};
use std::time::Duration;
use thiserror::Error;

/// Invalid resource specification. Not retried until the spec changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecificationError {
    #[error("duplicate predicate name '{0}'")]
    DuplicatePredicate(String),

    #[error("duplicate class name '{0}'")]
    DuplicateClass(String),

    #[error("class '{class}' references unknown predicate '{predicate}'")]
    DanglingPredicate { class: String, predicate: String },

    #[error("app group {group} has conflicting overrides: {classes:?}")]
    ConflictingOverride {
        group: AppGroupKey,
        classes: Vec<String>,
    },

    #[error("{0}")]
    Invalid(String),
}

impl SpecificationError {
    pub fn to_problem(&self) -> Problem {
        Problem::SpecificationError {
            message: self.to_string(),
        }
    }
}

/// A predicate expression that could not be compiled
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("predicate '{predicate}' failed to compile at '{fragment}': {reason}")]
pub struct PredicateCompileError {
    pub predicate: String,
    pub fragment: String,
    pub reason: String,
}

impl PredicateCompileError {
    pub fn to_problem(&self) -> Problem {
        Problem::PredicateCompileError {
            predicate: self.predicate.clone(),
            fragment: self.fragment.clone(),
            reason: self.reason.clone(),
        }
    }
}

/// The workload attribute provider could not be reached. Transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("workload attribute provider unavailable for {group}: {reason}")]
pub struct ProviderError {
    pub group: AppGroupKey,
    pub reason: String,
}

impl ProviderError {
    pub fn new(group: AppGroupKey, reason: impl Into<String>) -> Self {
        Self {
            group,
            reason: reason.into(),
        }
    }
}

/// Status write to the external store failed. Transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to write status for {key}: {reason}")]
pub struct StoreError {
    pub key: ResourceKey,
    pub reason: String,
}

/// Reasons a pass was abandoned without committing status
#[derive(Debug, Error)]
pub enum PassError {
    #[error(transparent)]
    ProviderUnavailable(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("pass exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl PassError {
    /// Whether the pass should be retried with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PassError::ProviderUnavailable(_) | PassError::Store(_)
        )
    }
}
