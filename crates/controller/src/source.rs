//! File-backed resource and snapshot source
//!
//! Stands in for the object store watch and the workload provider feed: the
//! resources file holds a JSON list of AppClass objects, the snapshots file a
//! JSON list of app groups with per-workload attributes. Both files are
//! re-read when they change on disk.

use anyhow::{Context, Result};
use appclass_lib::{
    AppClass, AppGroupKey, MembershipChange, ResourceEvent, ResourceKey, SnapshotSet,
    StaticAttributeProvider, WorkloadSnapshot,
};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// One app group's entry in the snapshots file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppGroupSnapshot {
    pub namespace: String,
    pub app_group: String,
    #[serde(default)]
    pub workloads: WorkloadSnapshot,
}

/// Read the resources file
pub fn load_resources(path: &Path) -> Result<Vec<AppClass>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read resources from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse resources in {}", path.display()))
}

/// Read the snapshots file
pub fn load_snapshots(path: &Path) -> Result<SnapshotSet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshots from {}", path.display()))?;
    let groups: Vec<AppGroupSnapshot> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse snapshots in {}", path.display()))?;

    Ok(groups
        .into_iter()
        .map(|g| (AppGroupKey::new(g.namespace, g.app_group), g.workloads))
        .collect())
}

/// Tracks what was last read from disk and turns file changes into events
pub struct FileSource {
    resources_path: PathBuf,
    snapshots_path: Option<PathBuf>,
    provider: Arc<StaticAttributeProvider>,
    known: BTreeMap<ResourceKey, AppClass>,
}

impl FileSource {
    pub fn new(
        resources_path: impl Into<PathBuf>,
        snapshots_path: Option<PathBuf>,
        provider: Arc<StaticAttributeProvider>,
    ) -> Self {
        Self {
            resources_path: resources_path.into(),
            snapshots_path,
            provider,
            known: BTreeMap::new(),
        }
    }

    /// Re-read the resources file and emit events for what changed.
    ///
    /// Files rarely carry a generation, so a spec change bumps it here the
    /// way the object store would.
    pub async fn sync_resources(
        &mut self,
        events: &mpsc::Sender<ResourceEvent>,
    ) -> Result<usize> {
        let loaded = load_resources(&self.resources_path)?;
        let mut seen = BTreeSet::new();
        let mut sent = 0;

        for mut resource in loaded {
            let key = resource.key();
            if !seen.insert(key.clone()) {
                warn!(resource = %key, "Duplicate resource in file, keeping the first");
                continue;
            }
            resource.status = None;

            let generation = match self.known.get(&key) {
                Some(previous) if previous.spec == resource.spec => continue,
                Some(previous) => previous.metadata.generation + 1,
                None => 1,
            };
            resource.metadata.generation = resource.metadata.generation.max(generation);

            self.known.insert(key, resource.clone());
            events
                .send(ResourceEvent::Applied(resource))
                .await
                .context("Resource event channel closed")?;
            sent += 1;
        }

        let removed: Vec<ResourceKey> = self
            .known
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in removed {
            self.known.remove(&key);
            events
                .send(ResourceEvent::Deleted(key))
                .await
                .context("Resource event channel closed")?;
            sent += 1;
        }

        debug!(events = sent, resources = self.known.len(), "Resources synced");
        Ok(sent)
    }

    /// Re-read the snapshots file and signal changed app groups
    pub async fn sync_snapshots(
        &self,
        membership: &mpsc::Sender<MembershipChange>,
    ) -> Result<usize> {
        let Some(path) = &self.snapshots_path else {
            return Ok(0);
        };

        let changed = self.provider.replace_all(load_snapshots(path)?);
        for group in &changed {
            membership
                .send(MembershipChange {
                    group: group.clone(),
                })
                .await
                .context("Membership channel closed")?;
        }

        debug!(changed = changed.len(), groups = self.provider.len(), "Snapshots synced");
        Ok(changed.len())
    }

    fn watched_dirs(&self) -> BTreeSet<PathBuf> {
        std::iter::once(&self.resources_path)
            .chain(self.snapshots_path.iter())
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .map(|dir| {
                if dir.as_os_str().is_empty() {
                    PathBuf::from(".")
                } else {
                    dir
                }
            })
            .collect()
    }

    fn touches(event: &Event, path: &Path) -> bool {
        event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == path.file_name())
    }

    /// Watch both files and keep emitting events until shutdown.
    /// Stops watching when the returned handle is dropped.
    pub fn watch(
        mut self,
        events: mpsc::Sender<ResourceEvent>,
        membership: mpsc::Sender<MembershipChange>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<WatcherHandle> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create filesystem watcher")?;

        // Editors replace files, so the parent directories are watched
        for dir in self.watched_dirs() {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {}", dir.display()))?;
            info!(path = %dir.display(), "Watching source directory");
        }

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else {
                            debug!("Watcher channel closed");
                            break;
                        };
                        let relevant = matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        );
                        if !relevant {
                            continue;
                        }

                        if Self::touches(&event, &self.resources_path) {
                            if let Err(e) = self.sync_resources(&events).await {
                                warn!(error = %e, "Failed to reload resources");
                            }
                        }
                        let snapshots_touched = self
                            .snapshots_path
                            .as_deref()
                            .is_some_and(|p| Self::touches(&event, p));
                        if snapshots_touched {
                            if let Err(e) = self.sync_snapshots(&membership).await {
                                warn!(error = %e, "Failed to reload snapshots");
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Shutting down source watcher");
                        break;
                    }
                }
            }
        });

        Ok(WatcherHandle {
            _watcher: watcher,
            task,
        })
    }
}

/// Handle to a running watcher
/// Stops watching when dropped
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl WatcherHandle {
    /// Wait for the watcher task to finish after shutdown
    pub async fn join(self) {
        let WatcherHandle { _watcher, task } = self;
        if let Err(e) = task.await {
            warn!(error = %e, "Source watcher task failed");
        }
    }
}
