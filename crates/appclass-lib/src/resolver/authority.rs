//! Conflict and authority resolution
//!
//! Precedence, highest first:
//! 1. a global override for the unit's app group
//! 2. a single matched class
//! 3. no matched class: the unit stays unclassified
//! 4. several matched classes: highest affinity score, ties are conflicts

use super::classification::{CandidateAssignments, ClassMatch};
use crate::models::{
    AppGroupKey, GlobalSpecAppGroupClassification, Problem, SnapshotSet, WorkloadUnit,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Final class of every classified unit
pub type FinalAssignments = BTreeMap<WorkloadUnit, String>;

/// A unit whose top-scoring classes could not be separated
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationConflict {
    pub unit: WorkloadUnit,
    /// Tied classes, ascending
    pub classes: Vec<String>,
    pub score: Option<f64>,
}

impl ClassificationConflict {
    pub fn to_problem(&self) -> Problem {
        Problem::ClassificationConflict {
            namespace: self.unit.namespace.clone(),
            app_group: self.unit.app_group.clone(),
            workload: self.unit.workload.clone(),
            classes: self.classes.clone(),
            score: self.score,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub assignments: FinalAssignments,
    pub conflicts: Vec<ClassificationConflict>,
}

/// Pick the highest-scoring class; `None` scores rank below any score
fn pick(unit: &WorkloadUnit, matches: &[ClassMatch]) -> Result<String, ClassificationConflict> {
    let top = matches
        .iter()
        .map(|m| m.score)
        .fold(None, |best, score| if score > best { score } else { best });

    let mut tied: Vec<String> = matches
        .iter()
        .filter(|m| m.score == top)
        .map(|m| m.class.clone())
        .collect();
    tied.sort();

    if tied.len() == 1 {
        Ok(tied.remove(0))
    } else {
        Err(ClassificationConflict {
            unit: unit.clone(),
            classes: tied,
            score: top,
        })
    }
}

/// Merge predicate-derived candidates with the authoritative overrides
pub fn reconcile(
    candidates: &CandidateAssignments,
    overrides: &[GlobalSpecAppGroupClassification],
    snapshots: &SnapshotSet,
) -> Resolution {
    let authority: BTreeMap<AppGroupKey, &str> = overrides
        .iter()
        .map(|o| (o.key(), o.class.as_str()))
        .collect();

    let mut resolution = Resolution::default();

    for (unit, matches) in candidates {
        if let Some(class) = authority.get(&unit.group()) {
            resolution.assignments.insert(unit.clone(), class.to_string());
            continue;
        }

        match matches.len() {
            0 => {}
            1 => {
                resolution
                    .assignments
                    .insert(unit.clone(), matches[0].class.clone());
            }
            _ => match pick(unit, matches) {
                Ok(class) => {
                    debug!(unit = %unit, class = %class, "Multiple matches resolved by score");
                    resolution.assignments.insert(unit.clone(), class);
                }
                Err(conflict) => resolution.conflicts.push(conflict),
            },
        }
    }

    // Overrides also cover workloads that no class entry lists
    for (group, class) in &authority {
        if let Some(snapshot) = snapshots.get(group) {
            for workload in snapshot.keys() {
                resolution
                    .assignments
                    .entry(WorkloadUnit::new(group, workload))
                    .or_insert_with(|| class.to_string());
            }
        }
    }

    resolution
}
