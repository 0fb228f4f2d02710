//! Specification validation and predicate-to-class binding
//!
//! A class entry that lists `predicates` is bound to exactly those. An entry
//! without a list is bound by name: the predicate named like the class, plus
//! any predicate named `<class>.<suffix>`.

use crate::error::SpecificationError;
use crate::models::{AppClassSpec, AppGroupKey};
use std::collections::{BTreeMap, BTreeSet};

/// Class name -> bound predicate names, in binding order
pub type ClassBindings = BTreeMap<String, Vec<String>>;

fn bound_by_convention<'a>(class: &str, predicate_names: &[&'a str]) -> Vec<&'a str> {
    let prefix = format!("{}.", class);
    predicate_names
        .iter()
        .copied()
        .filter(|name| *name == class || name.starts_with(&prefix))
        .collect()
}

/// Validate the specification and compute the predicate bindings of every class
pub fn bind(spec: &AppClassSpec) -> Result<ClassBindings, Vec<SpecificationError>> {
    let mut errors = Vec::new();

    let mut seen = BTreeSet::new();
    let mut predicate_names = Vec::with_capacity(spec.predicates.len());
    for predicate in &spec.predicates {
        if predicate.name.is_empty() {
            errors.push(SpecificationError::Invalid(
                "predicate without a name".to_string(),
            ));
        } else if !seen.insert(predicate.name.as_str()) {
            errors.push(SpecificationError::DuplicatePredicate(
                predicate.name.clone(),
            ));
        } else {
            predicate_names.push(predicate.name.as_str());
        }
    }

    let mut bindings = ClassBindings::new();
    for entry in &spec.application_classes {
        if entry.name.is_empty() {
            errors.push(SpecificationError::Invalid(
                "application class without a name".to_string(),
            ));
            continue;
        }
        if bindings.contains_key(&entry.name) {
            errors.push(SpecificationError::DuplicateClass(entry.name.clone()));
            continue;
        }

        let bound: Vec<String> = if entry.predicates.is_empty() {
            bound_by_convention(&entry.name, &predicate_names)
                .into_iter()
                .map(str::to_string)
                .collect()
        } else {
            for name in &entry.predicates {
                if !seen.contains(name.as_str()) {
                    errors.push(SpecificationError::DanglingPredicate {
                        class: entry.name.clone(),
                        predicate: name.clone(),
                    });
                }
            }
            entry.predicates.clone()
        };

        for reference in &entry.app_group_workloads {
            if reference.namespace.is_empty() || reference.app_group.is_empty() {
                errors.push(SpecificationError::Invalid(format!(
                    "class '{}' has a reference without namespace or app group",
                    entry.name
                )));
            }
        }

        bindings.insert(entry.name.clone(), bound);
    }

    let mut override_classes: BTreeMap<AppGroupKey, BTreeSet<&str>> = BTreeMap::new();
    for global in spec.overrides() {
        if global.class.is_empty() || global.namespace.is_empty() || global.app_group.is_empty() {
            errors.push(SpecificationError::Invalid(format!(
                "global classification for {} is missing class, namespace or app group",
                global.key()
            )));
            continue;
        }
        override_classes
            .entry(global.key())
            .or_default()
            .insert(global.class.as_str());
    }
    for (group, classes) in override_classes {
        if classes.len() > 1 {
            errors.push(SpecificationError::ConflictingOverride {
                group,
                classes: classes.into_iter().map(str::to_string).collect(),
            });
        }
    }

    if errors.is_empty() {
        Ok(bindings)
    } else {
        Err(errors)
    }
}
