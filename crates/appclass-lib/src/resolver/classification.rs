//! Predicate-driven candidate classification
//!
//! Every candidate workload unit is evaluated against the predicates bound to
//! each class that lists it. A class matches when all of its bound predicates
//! match; its affinity score is the sum of the predicate scores.

use super::binding::ClassBindings;
use crate::models::{
    AppGroupWorkloadReference, ApplicationClassSpecEntry, SnapshotSet, WorkloadAttributes,
    WorkloadUnit,
};
use crate::predicate::PredicateSet;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// A class a workload unit qualified for
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMatch {
    pub class: String,
    pub score: Option<f64>,
}

/// Every candidate unit with the classes it matched (possibly none)
pub type CandidateAssignments = BTreeMap<WorkloadUnit, Vec<ClassMatch>>;

/// Workload ids a reference selects; an empty selection means the whole group
pub(crate) fn selected_workloads<'a>(
    reference: &'a AppGroupWorkloadReference,
    snapshots: &'a SnapshotSet,
) -> Vec<&'a str> {
    if reference.app_group_workloads.is_empty() {
        snapshots
            .get(&reference.key())
            .map(|snapshot| snapshot.keys().map(String::as_str).collect())
            .unwrap_or_default()
    } else {
        reference
            .app_group_workloads
            .iter()
            .map(String::as_str)
            .collect()
    }
}

fn attributes_of<'a>(
    unit: &WorkloadUnit,
    snapshots: &'a SnapshotSet,
) -> Option<&'a WorkloadAttributes> {
    snapshots
        .get(&unit.group())
        .and_then(|snapshot| snapshot.get(&unit.workload))
}

/// Evaluate a class's bound predicates against one unit
fn match_class(
    bound: &[String],
    predicates: &PredicateSet,
    attrs: &WorkloadAttributes,
) -> Option<Option<f64>> {
    let mut score: Option<f64> = None;

    for name in bound {
        // Dangling names are rejected by `bind`; an unknown name never matches
        let result = predicates.get(name)?.evaluate(attrs);
        if !result.matched {
            return None;
        }
        if let Some(s) = result.score {
            score = Some(score.unwrap_or(0.0) + s);
        }
    }

    Some(score)
}

/// Resolve every candidate unit of every class entry
pub fn resolve(
    entries: &[ApplicationClassSpecEntry],
    bindings: &ClassBindings,
    predicates: &PredicateSet,
    snapshots: &SnapshotSet,
) -> CandidateAssignments {
    let empty = WorkloadAttributes::new();
    let mut candidates = CandidateAssignments::new();

    for entry in entries {
        let bound = match bindings.get(&entry.name) {
            Some(bound) => bound,
            None => continue,
        };

        for reference in &entry.app_group_workloads {
            let group = reference.key();

            for workload in selected_workloads(reference, snapshots) {
                let unit = WorkloadUnit::new(&group, workload);
                let attrs = attributes_of(&unit, snapshots).unwrap_or_else(|| {
                    trace!(unit = %unit, "Workload missing from snapshot, all attributes absent");
                    &empty
                });

                let matches = candidates.entry(unit.clone()).or_default();
                if matches.iter().any(|m| m.class == entry.name) {
                    continue;
                }

                if let Some(score) = match_class(bound, predicates, attrs) {
                    debug!(unit = %unit, class = %entry.name, score = ?score, "Class matched");
                    matches.push(ClassMatch {
                        class: entry.name.clone(),
                        score,
                    });
                }
            }
        }
    }

    for matches in candidates.values_mut() {
        matches.sort_by(|a, b| a.class.cmp(&b.class));
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppGroupKey, AttributeValue, Predicate, WorkloadSnapshot};
    use crate::predicate::compile_all;

    fn reference(workloads: &[&str]) -> AppGroupWorkloadReference {
        AppGroupWorkloadReference {
            namespace: "ns".to_string(),
            app_group: "g1".to_string(),
            app_group_workloads: workloads.iter().map(|w| w.to_string()).collect(),
        }
    }

    fn entry(name: &str, workloads: &[&str]) -> ApplicationClassSpecEntry {
        ApplicationClassSpecEntry {
            name: name.to_string(),
            app_group_workloads: vec![reference(workloads)],
            predicates: vec![],
        }
    }

    fn snapshots() -> SnapshotSet {
        let mut snapshot = WorkloadSnapshot::new();
        for (workload, region, cpu) in [("w1", "us-east", 2.0), ("w2", "eu-west", 16.0)] {
            let attrs: WorkloadAttributes = [
                ("region".to_string(), AttributeValue::from(region)),
                ("cpu".to_string(), AttributeValue::Number(cpu)),
            ]
            .into_iter()
            .collect();
            snapshot.insert(workload.to_string(), attrs);
        }
        [(AppGroupKey::new("ns", "g1"), snapshot)].into_iter().collect()
    }

    fn bindings(pairs: &[(&str, &[&str])]) -> ClassBindings {
        pairs
            .iter()
            .map(|(class, preds)| {
                (
                    class.to_string(),
                    preds.iter().map(|p| p.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_all_bound_predicates_must_match() {
        let predicates = compile_all(&[
            Predicate::new("east", "region == \"us-east\" score 1"),
            Predicate::new("big", "cpu >= 8 score 2"),
        ])
        .unwrap();
        let entries = vec![entry("east-big", &["w1", "w2"]), entry("east", &["w1", "w2"])];
        let bindings = bindings(&[
            ("east-big", &["east", "big"][..]),
            ("east", &["east"][..]),
        ]);

        let candidates = resolve(&entries, &bindings, &predicates, &snapshots());

        let w1 = &candidates[&WorkloadUnit::new(&AppGroupKey::new("ns", "g1"), "w1")];
        assert_eq!(
            w1,
            &vec![ClassMatch {
                class: "east".to_string(),
                score: Some(1.0)
            }]
        );

        let w2 = &candidates[&WorkloadUnit::new(&AppGroupKey::new("ns", "g1"), "w2")];
        assert!(w2.is_empty());
    }

    #[test]
    fn test_scores_are_summed() {
        let predicates = compile_all(&[
            Predicate::new("a", "true score 1.5"),
            Predicate::new("b", "true score 2"),
            Predicate::new("c", "true"),
        ])
        .unwrap();
        let entries = vec![entry("k", &["w1"])];
        let bindings = bindings(&[("k", &["a", "b", "c"][..])]);

        let candidates = resolve(&entries, &bindings, &predicates, &snapshots());
        let matches = candidates.values().next().unwrap();
        assert_eq!(matches[0].score, Some(3.5));
    }

    #[test]
    fn test_unbound_class_admits_all_candidates() {
        let predicates = PredicateSet::new();
        let entries = vec![entry("catch-all", &[])];
        let unbound: &[&str] = &[];
        let bindings = bindings(&[("catch-all", unbound)]);

        let candidates = resolve(&entries, &bindings, &predicates, &snapshots());
        assert_eq!(candidates.len(), 2);
        assert!(candidates.values().all(|m| m.len() == 1 && m[0].score.is_none()));
    }

    #[test]
    fn test_workload_missing_from_snapshot_sees_absent_attributes() {
        let predicates =
            compile_all(&[Predicate::new("no-region", "!exists(region)")]).unwrap();
        let entries = vec![entry("orphans", &["w9"])];
        let bindings = bindings(&[("orphans", &["no-region"][..])]);

        let candidates = resolve(&entries, &bindings, &predicates, &snapshots());
        let w9 = &candidates[&WorkloadUnit::new(&AppGroupKey::new("ns", "g1"), "w9")];
        assert_eq!(w9.len(), 1);
    }

    #[test]
    fn test_entry_order_does_not_change_result() {
        let predicates = compile_all(&[
            Predicate::new("a", "region == \"us-east\""),
            Predicate::new("b", "cpu > 1"),
        ])
        .unwrap();
        let bindings = bindings(&[("a", &["a"][..]), ("b", &["b"][..])]);

        let forward = resolve(
            &[entry("a", &["w1", "w2"]), entry("b", &["w1", "w2"])],
            &bindings,
            &predicates,
            &snapshots(),
        );
        let backward = resolve(
            &[entry("b", &["w2", "w1"]), entry("a", &["w2", "w1"])],
            &bindings,
            &predicates,
            &snapshots(),
        );

        let classes = |c: &CandidateAssignments| -> Vec<Vec<String>> {
            c.values()
                .map(|m| {
                    let mut names: Vec<_> = m.iter().map(|x| x.class.clone()).collect();
                    names.sort();
                    names
                })
                .collect()
        };
        assert_eq!(classes(&forward), classes(&backward));
    }
}
