//! One classification pass as a pure function of spec and snapshots

use crate::error::{PredicateCompileError, SpecificationError};
use crate::models::{AppClassSpec, AppClassStatus, Problem, SnapshotSet};
use crate::predicate::{compile_all, PredicateSet};
use crate::resolver::{
    bind, reconcile, resolve, ClassBindings, ClassificationConflict, FinalAssignments,
};
use crate::status::build;

/// A specification that validated and compiled
#[derive(Debug)]
pub struct PreparedSpec {
    pub bindings: ClassBindings,
    pub predicates: PredicateSet,
}

/// Why a specification cannot be classified at all. At least one list is
/// non-empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rejection {
    pub specification: Vec<SpecificationError>,
    pub compile: Vec<PredicateCompileError>,
}

impl Rejection {
    /// Specification problems first, then compile problems in predicate order
    pub fn problems(&self) -> Vec<Problem> {
        self.specification
            .iter()
            .map(SpecificationError::to_problem)
            .chain(self.compile.iter().map(PredicateCompileError::to_problem))
            .collect()
    }

    /// Degraded status with no classified units, only the problems
    pub fn status(&self) -> AppClassStatus {
        build(&FinalAssignments::new(), &[], self.problems())
    }
}

/// Result of classifying a prepared spec
#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub status: AppClassStatus,
    pub conflicts: Vec<ClassificationConflict>,
}

/// Validate the spec and compile its predicates. Both run even when one
/// fails, so the rejection lists every outstanding problem.
pub fn prepare(spec: &AppClassSpec) -> Result<PreparedSpec, Rejection> {
    match (bind(spec), compile_all(&spec.predicates)) {
        (Ok(bindings), Ok(predicates)) => Ok(PreparedSpec {
            bindings,
            predicates,
        }),
        (bindings, predicates) => Err(Rejection {
            specification: bindings.err().unwrap_or_default(),
            compile: predicates.err().unwrap_or_default(),
        }),
    }
}

/// Resolve candidates, apply authority, and build the status
pub fn classify(
    spec: &AppClassSpec,
    prepared: &PreparedSpec,
    snapshots: &SnapshotSet,
) -> PassOutcome {
    let candidates = resolve(
        &spec.application_classes,
        &prepared.bindings,
        &prepared.predicates,
        snapshots,
    );
    let resolution = reconcile(&candidates, spec.overrides(), snapshots);

    let problems = resolution
        .conflicts
        .iter()
        .map(ClassificationConflict::to_problem)
        .collect();

    PassOutcome {
        status: build(&resolution.assignments, spec.overrides(), problems),
        conflicts: resolution.conflicts,
    }
}

/// Full pass without the driver: rejections become a degraded status
pub fn evaluate(spec: &AppClassSpec, snapshots: &SnapshotSet) -> PassOutcome {
    match prepare(spec) {
        Ok(prepared) => classify(spec, &prepared, snapshots),
        Err(rejection) => PassOutcome {
            status: rejection.status(),
            conflicts: Vec::new(),
        },
    }
}
