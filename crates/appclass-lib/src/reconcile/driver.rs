//! Reconciliation driver
//!
//! Tracks classification resources and drives one pass per trigger. Each
//! resource gets an [`InstanceSlot`]; resources are reconciled on their own
//! tasks and in parallel, while passes for one resource never overlap.

use super::pass::{classify, prepare, Rejection};
use super::slot::InstanceSlot;
use crate::error::{PassError, StoreError};
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::models::{AppClass, AppClassStatus, AppGroupKey, ClassificationPhase, ResourceKey};
use crate::observability::{outcomes, ControllerMetrics, StructuredLogger};
use crate::provider::{capture_snapshots, WorkloadAttributeProvider};
use crate::store::StatusStore;
use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the reconciliation driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Period of the full resync (default: 60 seconds)
    pub resync_interval: Duration,
    /// Deadline for capturing snapshots and classifying (default: 30 seconds).
    /// Snapshot capture is cut off when it expires; classification runs to
    /// completion and the pass is dropped afterwards if it overran.
    pub pass_deadline: Duration,
    /// First retry delay after a transient failure (default: 500ms)
    pub initial_backoff: Duration,
    /// Upper bound on the retry delay (default: 60 seconds)
    pub max_backoff: Duration,
    /// Status write attempts before the pass is treated as failed
    pub store_write_attempts: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(60),
            pass_deadline: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            store_write_attempts: 3,
        }
    }
}

impl DriverConfig {
    /// Retry delay after `failures` consecutive transient failures
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(20);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Notification from the resource watch
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    Applied(AppClass),
    Deleted(ResourceKey),
}

/// The provider's membership for an app group changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub group: AppGroupKey,
}

impl MembershipChange {
    pub fn new(namespace: impl Into<String>, app_group: impl Into<String>) -> Self {
        Self {
            group: AppGroupKey::new(namespace, app_group),
        }
    }
}

/// Drives classification passes for every tracked resource
///
/// Clones share the same resources and slots.
#[derive(Clone)]
pub struct ReconcileDriver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    provider: Arc<dyn WorkloadAttributeProvider>,
    store: Arc<dyn StatusStore>,
    config: DriverConfig,
    health: Option<HealthRegistry>,
    resources: DashMap<ResourceKey, AppClass>,
    slots: DashMap<ResourceKey, Arc<InstanceSlot>>,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
}

impl ReconcileDriver {
    pub fn new(
        provider: Arc<dyn WorkloadAttributeProvider>,
        store: Arc<dyn StatusStore>,
        config: DriverConfig,
    ) -> Self {
        Self::from_parts(provider, store, config, None)
    }

    fn from_parts(
        provider: Arc<dyn WorkloadAttributeProvider>,
        store: Arc<dyn StatusStore>,
        config: DriverConfig,
        health: Option<HealthRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                provider,
                store,
                config,
                health,
                resources: DashMap::new(),
                slots: DashMap::new(),
                metrics: ControllerMetrics::new(),
                logger: StructuredLogger::new("appclass-controller"),
            }),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Track a created or updated resource. Returns whether a pass was triggered.
    pub fn apply(&self, resource: AppClass) -> bool {
        let key = resource.key();

        let unchanged = self.inner.resources.get(&key).is_some_and(|current| {
            current.metadata.generation == resource.metadata.generation
                && current.spec == resource.spec
        });
        if unchanged {
            debug!(resource = %key, "Resource unchanged, skipping trigger");
            return false;
        }

        debug!(
            resource = %key,
            generation = resource.metadata.generation,
            "Resource applied"
        );
        self.inner.resources.insert(key.clone(), resource);
        self.inner
            .metrics
            .set_resources_tracked(self.inner.resources.len() as i64);

        self.inner.trigger(&key)
    }

    /// Stop tracking a resource and remove its stored status
    pub async fn delete(&self, key: &ResourceKey) -> Result<(), StoreError> {
        let tracked = self.inner.resources.remove(key).is_some();
        self.inner.slots.remove(key);
        self.inner
            .metrics
            .set_resources_tracked(self.inner.resources.len() as i64);
        self.inner.metrics.forget_resource(key);

        if tracked {
            info!(resource = %key, "Resource deleted");
        }
        self.inner.store.delete_status(key).await
    }

    /// Request a pass; coalesces with any pass already in flight
    pub fn trigger(&self, key: &ResourceKey) -> bool {
        self.inner.trigger(key)
    }

    /// Trigger every resource that references the changed app group.
    /// Returns the number of resources triggered.
    pub fn notify_membership_change(&self, change: &MembershipChange) -> usize {
        let affected: Vec<ResourceKey> = self
            .inner
            .resources
            .iter()
            .filter(|r| r.spec.referenced_app_groups().contains(&change.group))
            .map(|r| r.key().clone())
            .collect();

        debug!(
            group = %change.group,
            resources = affected.len(),
            "App group membership changed"
        );
        for key in &affected {
            self.inner.trigger(key);
        }
        affected.len()
    }

    /// Trigger every tracked resource
    pub fn resync_all(&self) -> usize {
        let keys = self.tracked();
        for key in &keys {
            self.inner.trigger(key);
        }
        keys.len()
    }

    pub fn tracked(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self.inner.resources.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    pub async fn phase(&self, key: &ResourceKey) -> Option<ClassificationPhase> {
        let slot = self.inner.slot(key)?;
        let phase = slot.state.read().await.phase;
        Some(phase)
    }

    /// Last status committed for a resource
    pub async fn last_status(&self, key: &ResourceKey) -> Option<AppClassStatus> {
        let slot = self.inner.slot(key)?;
        let status = slot.state.read().await.last_status.clone();
        status
    }

    /// Passes evaluated for a resource, including rejected specs
    pub fn passes(&self, key: &ResourceKey) -> u64 {
        self.inner.slot(key).map(|slot| slot.passes()).unwrap_or(0)
    }

    /// True when no resource has a pass in flight
    pub fn is_idle(&self) -> bool {
        self.inner.slots.iter().all(|slot| !slot.is_running())
    }

    async fn handle_event(&self, event: ResourceEvent) {
        match event {
            ResourceEvent::Applied(resource) => {
                self.apply(resource);
            }
            ResourceEvent::Deleted(key) => {
                if let Err(e) = self.delete(&key).await {
                    warn!(resource = %key, error = %e, "Failed to remove status");
                }
            }
        }
    }

    /// Run the driver until shutdown
    pub async fn run(
        self,
        mut events: mpsc::Receiver<ResourceEvent>,
        mut membership: mpsc::Receiver<MembershipChange>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            resync_secs = self.inner.config.resync_interval.as_secs(),
            deadline_secs = self.inner.config.pass_deadline.as_secs(),
            "Starting reconciliation driver"
        );
        self.inner.report(components::DRIVER, ComponentHealth::healthy()).await;

        let mut ticker = interval(self.inner.config.resync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        let mut events_open = true;
        let mut membership_open = true;

        loop {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("Resource event channel closed");
                        events_open = false;
                    }
                },
                change = membership.recv(), if membership_open => match change {
                    Some(change) => {
                        self.notify_membership_change(&change);
                    }
                    None => {
                        debug!("Membership channel closed");
                        membership_open = false;
                    }
                },
                _ = ticker.tick() => {
                    let count = self.resync_all();
                    debug!(resources = count, "Periodic resync");
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reconciliation driver");
                    break;
                }
            }
        }
    }
}

impl DriverInner {
    fn slot(&self, key: &ResourceKey) -> Option<Arc<InstanceSlot>> {
        self.slots.get(key).map(|slot| slot.value().clone())
    }

    /// True while `slot` belongs to a tracked resource
    fn is_current(&self, key: &ResourceKey, slot: &Arc<InstanceSlot>) -> bool {
        self.resources.contains_key(key)
            && self.slot(key).is_some_and(|s| Arc::ptr_eq(&s, slot))
    }

    fn trigger(self: &Arc<Self>, key: &ResourceKey) -> bool {
        if !self.resources.contains_key(key) {
            return false;
        }

        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(InstanceSlot::new()))
            .value()
            .clone();

        if slot.trigger() {
            tokio::spawn(self.clone().drive(key.clone(), slot));
        } else {
            debug!(resource = %key, "Pass in flight, trigger coalesced");
        }
        true
    }

    async fn drive(self: Arc<Self>, key: ResourceKey, slot: Arc<InstanceSlot>) {
        loop {
            while slot.take_dirty() {
                self.run_pass(&key, &slot).await;
            }
            if !slot.release() {
                break;
            }
        }
    }

    async fn run_pass(self: &Arc<Self>, key: &ResourceKey, slot: &Arc<InstanceSlot>) {
        // The resource may have been deleted, or deleted and re-created
        if !self.is_current(key, slot) {
            return;
        }
        let resource = match self.resources.get(key) {
            Some(r) => r.clone(),
            None => return,
        };
        let generation = resource.metadata.generation;

        let previous_phase = {
            let mut state = slot.state.write().await;
            let rejected = state
                .rejected
                .as_ref()
                .is_some_and(|(g, spec)| *g == generation && *spec == resource.spec);
            if rejected {
                debug!(resource = %key, generation, "Spec already rejected, skipping");
                return;
            }
            std::mem::replace(&mut state.phase, ClassificationPhase::Evaluating)
        };
        slot.record_pass();
        let start = Instant::now();

        let prepared = match prepare(&resource.spec) {
            Ok(prepared) => prepared,
            Err(rejection) => {
                self.reject(key, slot, &resource, rejection, previous_phase, start)
                    .await;
                return;
            }
        };

        let groups = resource.spec.referenced_app_groups();
        let deadline = self.config.pass_deadline;
        let evaluated = timeout(deadline, async {
            let snapshots = capture_snapshots(self.provider.as_ref(), &groups).await?;
            Ok::<_, PassError>(classify(&resource.spec, &prepared, &snapshots))
        })
        .await
        .unwrap_or(Err(PassError::DeadlineExceeded(deadline)))
        // Classification never yields, so the timeout cannot interrupt it
        .and_then(|outcome| {
            if start.elapsed() > deadline {
                Err(PassError::DeadlineExceeded(deadline))
            } else {
                Ok(outcome)
            }
        });

        let outcome = match evaluated {
            Ok(outcome) => outcome,
            Err(error) => {
                self.abandon(key, slot, error, previous_phase, start).await;
                return;
            }
        };

        let mut status = outcome.status;
        status.observed_generation = Some(generation);

        match self.commit(key, slot, &status).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(error) => {
                self.abandon(key, slot, error.into(), previous_phase, start)
                    .await;
                return;
            }
        }

        let elapsed = start.elapsed();
        let classified = status.classified_units();
        self.metrics.observe_pass_latency(elapsed.as_secs_f64());
        self.metrics.inc_pass(match status.phase {
            ClassificationPhase::Ready => outcomes::READY,
            _ => outcomes::DEGRADED,
        });
        self.metrics.add_conflicts(outcome.conflicts.len() as u64);
        self.metrics.set_classified_units(key, classified as i64);

        for conflict in &outcome.conflicts {
            self.logger.log_conflict(key, &conflict.unit, &conflict.classes);
        }
        self.logger.log_pass_completed(
            key,
            generation,
            status.phase,
            classified,
            status.problems.len(),
            elapsed.as_millis(),
        );

        slot.reset_failures();
        {
            let mut state = slot.state.write().await;
            state.phase = status.phase;
            state.rejected = None;
            state.last_status = Some(status);
        }
        self.report(components::PROVIDER, ComponentHealth::healthy()).await;
        self.report(components::DRIVER, ComponentHealth::healthy()).await;
    }

    /// Commit a degraded status for a spec that cannot be classified
    async fn reject(
        self: &Arc<Self>,
        key: &ResourceKey,
        slot: &Arc<InstanceSlot>,
        resource: &AppClass,
        rejection: Rejection,
        previous_phase: ClassificationPhase,
        start: Instant,
    ) {
        let generation = resource.metadata.generation;

        self.metrics
            .add_specification_errors(rejection.specification.len() as u64);
        for error in &rejection.specification {
            self.logger.log_specification_error(key, &error.to_string());
        }
        self.metrics.add_compile_errors(rejection.compile.len() as u64);
        for error in &rejection.compile {
            self.logger
                .log_compile_error(key, &error.predicate, &error.fragment, &error.reason);
        }

        let mut status = rejection.status();
        status.observed_generation = Some(generation);

        match self.commit(key, slot, &status).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(error) => {
                self.abandon(key, slot, error.into(), previous_phase, start)
                    .await;
                return;
            }
        }

        let elapsed = start.elapsed();
        self.metrics.observe_pass_latency(elapsed.as_secs_f64());
        self.metrics.inc_pass(outcomes::DEGRADED);
        self.metrics.set_classified_units(key, 0);
        self.logger.log_pass_completed(
            key,
            generation,
            status.phase,
            0,
            status.problems.len(),
            elapsed.as_millis(),
        );

        slot.reset_failures();
        let mut state = slot.state.write().await;
        state.phase = status.phase;
        state.rejected = Some((generation, resource.spec.clone()));
        state.last_status = Some(status);
    }

    /// Write status, retrying transient store failures. Identical status is
    /// not rewritten. Returns false when the slot was superseded by a delete
    /// or re-create; the pass must not record anything then.
    async fn commit(
        self: &Arc<Self>,
        key: &ResourceKey,
        slot: &Arc<InstanceSlot>,
        status: &AppClassStatus,
    ) -> Result<bool, StoreError> {
        if !self.is_current(key, slot) {
            debug!(resource = %key, "Slot superseded, dropping status");
            return Ok(false);
        }

        let overwritten = slot.take_overwritten();
        if !overwritten && slot.state.read().await.last_status.as_ref() == Some(status) {
            debug!(resource = %key, "Status unchanged, skipping write");
            return Ok(true);
        }

        let attempts = self.config.store_write_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.write_status(key, status).await {
                Ok(()) => break,
                Err(e) if attempt < attempts => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        resource = %key,
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis(),
                        "Status write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if overwritten {
                        slot.mark_overwritten();
                    }
                    self.report(components::STORE, ComponentHealth::unhealthy(e.to_string()))
                        .await;
                    return Err(e);
                }
            }
        }

        // Deleted or re-created while the write was in flight
        if !self.is_current(key, slot) {
            self.repair(key).await?;
            return Ok(false);
        }

        self.report(components::STORE, ComponentHealth::healthy()).await;
        Ok(true)
    }

    /// Undo a status write that landed after its slot was superseded
    async fn repair(self: &Arc<Self>, key: &ResourceKey) -> Result<(), StoreError> {
        if !self.resources.contains_key(key) {
            debug!(resource = %key, "Removing status written after delete");
            return self.store.delete_status(key).await;
        }

        debug!(resource = %key, "Stale status written after re-create, re-evaluating");
        if let Some(current) = self.slot(key) {
            current.mark_overwritten();
        }
        self.trigger(key);
        Ok(())
    }

    /// Drop a pass without committing anything; transient failures are
    /// retried with backoff, an expired deadline waits for the next trigger.
    async fn abandon(
        self: &Arc<Self>,
        key: &ResourceKey,
        slot: &Arc<InstanceSlot>,
        error: PassError,
        previous_phase: ClassificationPhase,
        start: Instant,
    ) {
        slot.state.write().await.phase = previous_phase;
        self.metrics.observe_pass_latency(start.elapsed().as_secs_f64());

        match &error {
            PassError::ProviderUnavailable(_) => {
                self.metrics.inc_pass(outcomes::PROVIDER_UNAVAILABLE);
                self.metrics.inc_provider_errors();
                self.report(components::PROVIDER, ComponentHealth::degraded(error.to_string()))
                    .await;
            }
            PassError::Store(_) => self.metrics.inc_pass(outcomes::STORE_ERROR),
            PassError::DeadlineExceeded(_) => {
                self.metrics.inc_pass(outcomes::DEADLINE_EXCEEDED);
                self.report(components::DRIVER, ComponentHealth::degraded(error.to_string()))
                    .await;
            }
        }

        if !error.is_transient() {
            warn!(resource = %key, error = %error, "Pass abandoned, waiting for next trigger");
            return;
        }

        let failures = slot.record_failure();
        let delay = self.config.backoff(failures);
        match &error {
            PassError::ProviderUnavailable(_) => {
                self.logger
                    .log_provider_unavailable(key, &error.to_string(), delay.as_millis())
            }
            _ => warn!(
                resource = %key,
                error = %error,
                failures,
                retry_in_ms = delay.as_millis(),
                "Pass failed, retrying"
            ),
        }

        let inner = Arc::clone(self);
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.trigger(&key);
        });
    }

    async fn report(&self, component: &str, health: ComponentHealth) {
        if let Some(registry) = &self.health {
            registry.update(component, health).await;
        }
    }
}

/// Builder for the reconciliation driver
pub struct ReconcileDriverBuilder {
    provider: Option<Arc<dyn WorkloadAttributeProvider>>,
    store: Option<Arc<dyn StatusStore>>,
    health: Option<HealthRegistry>,
    config: DriverConfig,
}

impl ReconcileDriverBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            provider: None,
            store: None,
            health: None,
            config: DriverConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn WorkloadAttributeProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn store(mut self, store: Arc<dyn StatusStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Report component health to this registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.config.resync_interval = interval;
        self
    }

    pub fn pass_deadline(mut self, deadline: Duration) -> Self {
        self.config.pass_deadline = deadline;
        self
    }

    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.initial_backoff = initial;
        self.config.max_backoff = max;
        self
    }

    pub fn store_write_attempts(mut self, attempts: u32) -> Self {
        self.config.store_write_attempts = attempts;
        self
    }

    pub fn build(self) -> Result<ReconcileDriver> {
        let provider = self
            .provider
            .ok_or_else(|| anyhow::anyhow!("Attribute provider is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Status store is required"))?;

        if self.config.initial_backoff > self.config.max_backoff {
            anyhow::bail!("initial backoff exceeds max backoff");
        }

        Ok(ReconcileDriver::from_parts(
            provider,
            store,
            self.config,
            self.health,
        ))
    }
}

impl Default for ReconcileDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
