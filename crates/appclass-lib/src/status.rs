//! Status assembly
//!
//! Turns final per-unit assignments into the observed `AppClassStatus`.
//! Ordering is fixed (class, namespace, app group, workload, all ascending)
//! so identical inputs always serialize to identical bytes.

use crate::models::{
    AppClassStatus, AppGroupKey, AppInfoReference, ApplicationClass, ClassificationPhase,
    GlobalAppGroupClassification, GlobalClassificationDescriptor,
    GlobalSpecAppGroupClassification, Problem,
};
use crate::resolver::FinalAssignments;
use std::collections::{BTreeMap, BTreeSet};

/// Build the status for one pass. Any problem makes the status `Degraded`.
pub fn build(
    assignments: &FinalAssignments,
    overrides: &[GlobalSpecAppGroupClassification],
    problems: Vec<Problem>,
) -> AppClassStatus {
    let mut by_class: BTreeMap<&str, BTreeMap<AppGroupKey, BTreeSet<&str>>> = BTreeMap::new();
    for (unit, class) in assignments {
        by_class
            .entry(class.as_str())
            .or_default()
            .entry(unit.group())
            .or_default()
            .insert(unit.workload.as_str());
    }

    let application_classes = by_class
        .into_iter()
        .map(|(class, groups)| ApplicationClass {
            name: class.to_string(),
            app_infos: groups
                .into_iter()
                .map(|(group, workloads)| AppInfoReference {
                    name: group.app_info_name(),
                    app_group_workloads: workloads.into_iter().map(str::to_string).collect(),
                    namespace: group.namespace,
                    app_group: group.app_group,
                })
                .collect(),
        })
        .collect();

    let phase = if problems.is_empty() {
        ClassificationPhase::Ready
    } else {
        ClassificationPhase::Degraded
    };

    AppClassStatus {
        phase,
        observed_generation: None,
        application_classes,
        global_classification: project_overrides(overrides),
        problems,
    }
}

/// Project the authoritative overrides into the global status view
fn project_overrides(
    overrides: &[GlobalSpecAppGroupClassification],
) -> Option<GlobalClassificationDescriptor> {
    if overrides.is_empty() {
        return None;
    }

    let authority: BTreeMap<AppGroupKey, &str> = overrides
        .iter()
        .map(|o| (o.key(), o.class.as_str()))
        .collect();

    let app_groups = authority
        .into_iter()
        .map(|(group, class)| GlobalAppGroupClassification {
            name: group.app_group.clone(),
            app_info: group.app_info_name(),
            class: class.to_string(),
            namespace: group.namespace,
            app_group: group.app_group,
        })
        .collect();

    Some(GlobalClassificationDescriptor { app_groups })
}
