//! Status persistence boundary
//!
//! Writes are full replacements of a resource's status, so retrying a write
//! after a transient failure is always safe.

use crate::error::StoreError;
use crate::models::{AppClassStatus, ResourceKey};
use async_trait::async_trait;
use dashmap::DashMap;

/// External store that persists and exposes resource status
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn write_status(&self, key: &ResourceKey, status: &AppClassStatus)
        -> Result<(), StoreError>;

    async fn delete_status(&self, key: &ResourceKey) -> Result<(), StoreError>;
}

/// Status store held in memory, used by the controller binary and tests
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    statuses: DashMap<ResourceKey, AppClassStatus>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<AppClassStatus> {
        self.statuses.get(key).map(|r| r.clone())
    }

    /// All statuses, ordered by resource key
    pub fn list(&self) -> Vec<(ResourceKey, AppClassStatus)> {
        let mut all: Vec<_> = self
            .statuses
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn write_status(
        &self,
        key: &ResourceKey,
        status: &AppClassStatus,
    ) -> Result<(), StoreError> {
        self.statuses.insert(key.clone(), status.clone());
        Ok(())
    }

    async fn delete_status(&self, key: &ResourceKey) -> Result<(), StoreError> {
        self.statuses.remove(key);
        Ok(())
    }
}
