//! Per-resource reconciliation state
//!
//! `running` and `dirty` implement at-most-one pass per resource: a trigger
//! sets `dirty` and only the caller that wins the `running` CAS drives the
//! passes. Triggers that land mid-pass collapse into one follow-up pass.

use crate::models::{AppClassSpec, AppClassStatus, ClassificationPhase};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub(crate) struct SlotState {
    pub phase: ClassificationPhase,
    /// Generation and spec that were rejected; not re-evaluated until
    /// either changes
    pub rejected: Option<(i64, AppClassSpec)>,
    pub last_status: Option<AppClassStatus>,
}

#[derive(Debug, Default)]
pub(crate) struct InstanceSlot {
    running: AtomicBool,
    dirty: AtomicBool,
    /// The stored status was overwritten by a pass of an earlier slot
    overwritten: AtomicBool,
    failures: AtomicU32,
    passes: AtomicU64,
    pub state: RwLock<SlotState>,
}

impl InstanceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a trigger; returns true if the caller must start driving passes
    pub fn trigger(&self) -> bool {
        self.dirty.store(true, Ordering::SeqCst);
        self.claim()
    }

    fn claim(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Consume a pending trigger
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    /// Give up the driver role. Returns true if a trigger raced in and the
    /// caller reclaimed the role and must keep going.
    pub fn release(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        self.dirty.load(Ordering::SeqCst) && self.claim()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Force the next commit to write even if the status is unchanged
    pub fn mark_overwritten(&self) {
        self.overwritten.store(true, Ordering::SeqCst);
    }

    pub fn take_overwritten(&self) -> bool {
        self.overwritten.swap(false, Ordering::SeqCst)
    }

    pub fn record_pass(&self) -> u64 {
        self.passes.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Count a transient failure; returns the consecutive failure count
    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset_failures(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }
}
