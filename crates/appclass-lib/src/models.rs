//! Core data models for the AppClass resource
//!
//! Field names follow the resource schema (camelCase on the wire) so
//! resources and status can be loaded from and rendered to JSON.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identity of a classification resource: (namespace, name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identity of an app group: (namespace, appGroup)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppGroupKey {
    pub namespace: String,
    pub app_group: String,
}

impl AppGroupKey {
    pub fn new(namespace: impl Into<String>, app_group: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            app_group: app_group.into(),
        }
    }

    /// Name used for the app info references in status
    pub fn app_info_name(&self) -> String {
        format!("{}/{}", self.namespace, self.app_group)
    }
}

impl fmt::Display for AppGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.app_group)
    }
}

/// The addressable unit the evaluator reasons about
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadUnit {
    pub namespace: String,
    pub app_group: String,
    pub workload: String,
}

impl WorkloadUnit {
    pub fn new(group: &AppGroupKey, workload: impl Into<String>) -> Self {
        Self {
            namespace: group.namespace.clone(),
            app_group: group.app_group.clone(),
            workload: workload.into(),
        }
    }

    pub fn group(&self) -> AppGroupKey {
        AppGroupKey::new(&self.namespace, &self.app_group)
    }
}

impl fmt::Display for WorkloadUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.app_group, self.workload)
    }
}

/// Minimal object metadata carried by the external store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Incremented by the store on every spec change
    #[serde(default)]
    pub generation: i64,
}

/// A classification resource as delivered by the watch mechanism
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppClass {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: AppClassSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AppClassStatus>,
}

impl AppClass {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.metadata.namespace, &self.metadata.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppClassSpec {
    #[serde(default)]
    pub predicates: Vec<Predicate>,
    #[serde(default)]
    pub application_classes: Vec<ApplicationClassSpecEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_classification: Option<GlobalSpecClassificationDescriptor>,
}

impl AppClassSpec {
    /// Every app group referenced by a class entry or an override, in key order
    pub fn referenced_app_groups(&self) -> BTreeSet<AppGroupKey> {
        let mut groups: BTreeSet<AppGroupKey> = self
            .application_classes
            .iter()
            .flat_map(|entry| entry.app_group_workloads.iter())
            .map(|reference| reference.key())
            .collect();

        if let Some(global) = &self.global_classification {
            groups.extend(global.app_groups.iter().map(|o| o.key()));
        }

        groups
    }

    pub fn overrides(&self) -> &[GlobalSpecAppGroupClassification] {
        self.global_classification
            .as_ref()
            .map(|g| g.app_groups.as_slice())
            .unwrap_or_default()
    }
}

/// A named, reusable scheduling condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub name: String,
    pub expression: String,
}

impl Predicate {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

/// A class and its candidate app group workloads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationClassSpecEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub app_group_workloads: Vec<AppGroupWorkloadReference>,
    /// Explicitly bound predicate names. When empty, predicates are bound by
    /// name (`<class>` or `<class>.*`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicates: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppGroupWorkloadReference {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub app_group: String,
    /// Empty means every workload the provider reports for the app group
    #[serde(default)]
    pub app_group_workloads: BTreeSet<String>,
}

impl AppGroupWorkloadReference {
    pub fn key(&self) -> AppGroupKey {
        AppGroupKey::new(&self.namespace, &self.app_group)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSpecClassificationDescriptor {
    #[serde(default)]
    pub app_groups: Vec<GlobalSpecAppGroupClassification>,
}

/// Authoritative classification of a whole app group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSpecAppGroupClassification {
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub app_group: String,
}

impl GlobalSpecAppGroupClassification {
    pub fn key(&self) -> AppGroupKey {
        AppGroupKey::new(&self.namespace, &self.app_group)
    }
}

/// Lifecycle phase of a classification resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationPhase {
    #[default]
    Pending,
    Evaluating,
    Ready,
    Degraded,
}

impl ClassificationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationPhase::Pending => "Pending",
            ClassificationPhase::Evaluating => "Evaluating",
            ClassificationPhase::Ready => "Ready",
            ClassificationPhase::Degraded => "Degraded",
        }
    }
}

/// Observed classification outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppClassStatus {
    #[serde(default)]
    pub phase: ClassificationPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub application_classes: Vec<ApplicationClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_classification: Option<GlobalClassificationDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<Problem>,
}

impl AppClassStatus {
    /// Number of classified workload units across all classes
    pub fn classified_units(&self) -> usize {
        self.application_classes
            .iter()
            .flat_map(|c| c.app_infos.iter())
            .map(|info| info.app_group_workloads.len())
            .sum()
    }

    /// Class a workload unit was placed in, if any
    pub fn class_of(&self, unit: &WorkloadUnit) -> Option<&str> {
        self.application_classes
            .iter()
            .find(|class| {
                class.app_infos.iter().any(|info| {
                    info.namespace == unit.namespace
                        && info.app_group == unit.app_group
                        && info.app_group_workloads.contains(&unit.workload)
                })
            })
            .map(|class| class.name.as_str())
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &Problem> {
        self.problems
            .iter()
            .filter(|p| matches!(p, Problem::ClassificationConflict { .. }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationClass {
    pub name: String,
    #[serde(default)]
    pub app_infos: Vec<AppInfoReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfoReference {
    pub name: String,
    pub namespace: String,
    pub app_group: String,
    pub app_group_workloads: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalClassificationDescriptor {
    #[serde(default)]
    pub app_groups: Vec<GlobalAppGroupClassification>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalAppGroupClassification {
    pub name: String,
    pub app_info: String,
    pub class: String,
    pub namespace: String,
    pub app_group: String,
}

/// Outstanding problem surfaced on the resource status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Problem {
    #[serde(rename_all = "camelCase")]
    SpecificationError { message: String },
    #[serde(rename_all = "camelCase")]
    PredicateCompileError {
        predicate: String,
        fragment: String,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    ClassificationConflict {
        namespace: String,
        app_group: String,
        workload: String,
        classes: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        score: Option<f64>,
    },
}

/// Loosely typed workload attribute value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    String(String),
    #[default]
    Absent,
}

impl AttributeValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, AttributeValue::Absent)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// Attributes of one workload unit
pub type WorkloadAttributes = BTreeMap<String, AttributeValue>;

/// Workload id -> attributes, for one app group
pub type WorkloadSnapshot = BTreeMap<String, WorkloadAttributes>;

/// Snapshots for every app group a pass needs, captured once per pass
pub type SnapshotSet = BTreeMap<AppGroupKey, WorkloadSnapshot>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_deserializes_camel_case() {
        let json = r#"{
            "metadata": {"name": "tiers", "namespace": "ns", "generation": 3},
            "spec": {
                "predicates": [{"name": "gold", "expression": "tier == \"gold\""}],
                "applicationClasses": [{
                    "name": "gold",
                    "appGroupWorkloads": [{"namespace": "ns", "appGroup": "g1", "appGroupWorkloads": ["w1"]}]
                }],
                "globalClassification": {"appGroups": [{"class": "gold", "namespace": "ns", "appGroup": "g2"}]}
            }
        }"#;

        let resource: AppClass = serde_json::from_str(json).unwrap();
        assert_eq!(resource.key(), ResourceKey::new("ns", "tiers"));
        assert_eq!(resource.metadata.generation, 3);
        assert_eq!(resource.spec.application_classes[0].app_group_workloads[0].app_group, "g1");
        assert_eq!(resource.spec.overrides().len(), 1);

        let groups = resource.spec.referenced_app_groups();
        assert_eq!(groups.len(), 2);
        assert!(groups.contains(&AppGroupKey::new("ns", "g2")));
    }

    #[test]
    fn test_attribute_values_are_untagged() {
        let attrs: WorkloadAttributes =
            serde_json::from_str(r#"{"region": "us-east", "cpu": 2.5, "gpu": true}"#).unwrap();

        assert_eq!(attrs["region"], AttributeValue::from("us-east"));
        assert_eq!(attrs["cpu"], AttributeValue::Number(2.5));
        assert_eq!(attrs["gpu"], AttributeValue::Bool(true));
    }

    #[test]
    fn test_problem_serializes_with_kind_tag() {
        let problem = Problem::PredicateCompileError {
            predicate: "P3".to_string(),
            fragment: "==".to_string(),
            reason: "expected operand".to_string(),
        };

        let value = serde_json::to_value(&problem).unwrap();
        assert_eq!(value["kind"], "predicateCompileError");
        assert_eq!(value["predicate"], "P3");
    }
}
