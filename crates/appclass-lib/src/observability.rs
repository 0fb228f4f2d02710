//! Observability infrastructure for the classification controller
//!
//! Provides:
//! - Prometheus metrics (pass latency, pass outcomes, conflicts, provider errors)
//! - Structured JSON logging with tracing

use crate::models::{ClassificationPhase, ResourceKey, WorkloadUnit};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for pass latency (in seconds)
const PASS_LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Pass outcome labels
pub mod outcomes {
    pub const READY: &str = "ready";
    pub const DEGRADED: &str = "degraded";
    pub const PROVIDER_UNAVAILABLE: &str = "provider_unavailable";
    pub const DEADLINE_EXCEEDED: &str = "deadline_exceeded";
    pub const STORE_ERROR: &str = "store_error";
}

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    pass_latency_seconds: Histogram,
    passes: IntCounterVec,
    conflicts: IntCounter,
    compile_errors: IntCounter,
    specification_errors: IntCounter,
    provider_errors: IntCounter,
    resources_tracked: IntGauge,
    classified_units: IntGaugeVec,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            pass_latency_seconds: register_histogram!(
                "appclass_pass_latency_seconds",
                "Time spent in one reconciliation pass",
                PASS_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register pass_latency_seconds"),

            passes: register_int_counter_vec!(
                "appclass_passes_total",
                "Reconciliation passes by outcome",
                &["outcome"]
            )
            .expect("Failed to register passes_total"),

            conflicts: register_int_counter!(
                "appclass_classification_conflicts_total",
                "Workload units left unclassified by an unresolvable tie"
            )
            .expect("Failed to register classification_conflicts_total"),

            compile_errors: register_int_counter!(
                "appclass_predicate_compile_errors_total",
                "Predicate expressions that failed to compile"
            )
            .expect("Failed to register predicate_compile_errors_total"),

            specification_errors: register_int_counter!(
                "appclass_specification_errors_total",
                "Specification errors found while validating resources"
            )
            .expect("Failed to register specification_errors_total"),

            provider_errors: register_int_counter!(
                "appclass_provider_errors_total",
                "Passes aborted because the attribute provider was unavailable"
            )
            .expect("Failed to register provider_errors_total"),

            resources_tracked: register_int_gauge!(
                "appclass_resources_tracked",
                "Number of classification resources currently tracked"
            )
            .expect("Failed to register resources_tracked"),

            classified_units: register_int_gauge_vec!(
                "appclass_classified_units",
                "Workload units classified in the last committed status",
                &["namespace", "name"]
            )
            .expect("Failed to register classified_units"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_pass_latency(&self, duration_secs: f64) {
        self.inner().pass_latency_seconds.observe(duration_secs);
    }

    pub fn inc_pass(&self, outcome: &str) {
        self.inner().passes.with_label_values(&[outcome]).inc();
    }

    pub fn add_conflicts(&self, count: u64) {
        self.inner().conflicts.inc_by(count);
    }

    pub fn add_compile_errors(&self, count: u64) {
        self.inner().compile_errors.inc_by(count);
    }

    pub fn add_specification_errors(&self, count: u64) {
        self.inner().specification_errors.inc_by(count);
    }

    pub fn inc_provider_errors(&self) {
        self.inner().provider_errors.inc();
    }

    pub fn set_resources_tracked(&self, count: i64) {
        self.inner().resources_tracked.set(count);
    }

    pub fn set_classified_units(&self, key: &ResourceKey, count: i64) {
        self.inner()
            .classified_units
            .with_label_values(&[key.namespace.as_str(), key.name.as_str()])
            .set(count);
    }

    pub fn forget_resource(&self, key: &ResourceKey) {
        let _ = self
            .inner()
            .classified_units
            .remove_label_values(&[key.namespace.as_str(), key.name.as_str()]);
    }
}

/// Structured logger for controller events
///
/// Provides consistent JSON-formatted records for passes, conflicts,
/// and other significant events.
#[derive(Clone)]
pub struct StructuredLogger {
    controller: String,
}

impl StructuredLogger {
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
        }
    }

    pub fn log_pass_completed(
        &self,
        key: &ResourceKey,
        generation: i64,
        phase: ClassificationPhase,
        classified_units: usize,
        problems: usize,
        elapsed_ms: u128,
    ) {
        info!(
            event = "pass_completed",
            controller = %self.controller,
            resource = %key,
            generation = generation,
            phase = phase.as_str(),
            classified_units = classified_units,
            problems = problems,
            elapsed_ms = elapsed_ms,
            "Reconciliation pass completed"
        );
    }

    pub fn log_conflict(&self, key: &ResourceKey, unit: &WorkloadUnit, classes: &[String]) {
        warn!(
            event = "classification_conflict",
            controller = %self.controller,
            resource = %key,
            namespace = %unit.namespace,
            app_group = %unit.app_group,
            workload = %unit.workload,
            classes = ?classes,
            "Workload unit matched several classes with equal affinity"
        );
    }

    pub fn log_compile_error(
        &self,
        key: &ResourceKey,
        predicate: &str,
        fragment: &str,
        reason: &str,
    ) {
        warn!(
            event = "predicate_compile_error",
            controller = %self.controller,
            resource = %key,
            predicate = %predicate,
            fragment = %fragment,
            reason = %reason,
            "Predicate failed to compile"
        );
    }

    pub fn log_specification_error(&self, key: &ResourceKey, message: &str) {
        warn!(
            event = "specification_error",
            controller = %self.controller,
            resource = %key,
            message = %message,
            "Invalid classification specification"
        );
    }

    pub fn log_provider_unavailable(&self, key: &ResourceKey, error: &str, retry_in_ms: u128) {
        warn!(
            event = "provider_unavailable",
            controller = %self.controller,
            resource = %key,
            error = %error,
            retry_in_ms = retry_in_ms,
            "Workload attribute provider unavailable, pass abandoned"
        );
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "controller_started",
            controller = %self.controller,
            version = %version,
            "AppClass controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            controller = %self.controller,
            reason = %reason,
            "AppClass controller shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_metrics_creation() {
        // Metrics live in the global Prometheus registry; repeated handles
        // share one registration.
        let metrics = ControllerMetrics::new();
        let again = ControllerMetrics::new();

        metrics.observe_pass_latency(0.002);
        metrics.inc_pass(outcomes::READY);
        again.add_conflicts(2);
        again.set_resources_tracked(3);
        metrics.set_classified_units(&ResourceKey::new("ns", "tiers"), 5);
        metrics.forget_resource(&ResourceKey::new("ns", "tiers"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("appclass-controller");
        assert_eq!(logger.controller, "appclass-controller");
    }
}
