//! Workload attribute provider
//!
//! The provider is an external collaborator that reports, per app group, the
//! workloads it knows about and their attributes. Snapshots are captured once
//! at the start of a pass and reused for the whole pass.

use crate::error::ProviderError;
use crate::models::{AppGroupKey, SnapshotSet, WorkloadSnapshot};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use tracing::debug;

/// Source of workload attribute snapshots
#[async_trait]
pub trait WorkloadAttributeProvider: Send + Sync {
    /// Snapshot of one app group. Unknown groups yield an empty snapshot.
    async fn snapshot(&self, group: &AppGroupKey) -> Result<WorkloadSnapshot, ProviderError>;
}

/// Query the provider once for every group a pass needs
pub async fn capture_snapshots(
    provider: &dyn WorkloadAttributeProvider,
    groups: &BTreeSet<AppGroupKey>,
) -> Result<SnapshotSet, ProviderError> {
    let mut snapshots = SnapshotSet::new();

    for group in groups {
        let snapshot = provider.snapshot(group).await?;
        debug!(group = %group, workloads = snapshot.len(), "Captured workload snapshot");
        snapshots.insert(group.clone(), snapshot);
    }

    Ok(snapshots)
}

/// In-memory provider fed by whatever discovers membership and metrics
#[derive(Debug, Default)]
pub struct StaticAttributeProvider {
    groups: DashMap<AppGroupKey, WorkloadSnapshot>,
}

impl StaticAttributeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot of an app group
    pub fn set_group(&self, group: AppGroupKey, snapshot: WorkloadSnapshot) {
        debug!(group = %group, workloads = snapshot.len(), "Updating app group snapshot");
        self.groups.insert(group, snapshot);
    }

    /// Replace every group at once; returns the groups whose content changed
    pub fn replace_all(
        &self,
        groups: impl IntoIterator<Item = (AppGroupKey, WorkloadSnapshot)>,
    ) -> BTreeSet<AppGroupKey> {
        let incoming: Vec<_> = groups.into_iter().collect();
        let mut changed = BTreeSet::new();

        let incoming_keys: BTreeSet<AppGroupKey> =
            incoming.iter().map(|(k, _)| k.clone()).collect();
        let stale: Vec<AppGroupKey> = self
            .groups
            .iter()
            .map(|r| r.key().clone())
            .filter(|k| !incoming_keys.contains(k))
            .collect();
        for key in stale {
            self.groups.remove(&key);
            changed.insert(key);
        }

        for (key, snapshot) in incoming {
            let same = self
                .groups
                .get(&key)
                .map(|existing| *existing == snapshot)
                .unwrap_or(false);
            if !same {
                self.groups.insert(key.clone(), snapshot);
                changed.insert(key);
            }
        }

        changed
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[async_trait]
impl WorkloadAttributeProvider for StaticAttributeProvider {
    async fn snapshot(&self, group: &AppGroupKey) -> Result<WorkloadSnapshot, ProviderError> {
        Ok(self
            .groups
            .get(group)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }
}
