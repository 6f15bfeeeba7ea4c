//! Metrics for reconciliation passes
//!
//! Uses the `metrics` facade; the embedding application installs a recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::config::MetricsConfig;

static ENABLED: AtomicBool = AtomicBool::new(true);

pub const PASSES: &str = "groupkeeper.reconcile.passes";
pub const PASS_DURATION_MS: &str = "groupkeeper.reconcile.duration_ms";
pub const CONVERSATIONS_IGNORED: &str = "groupkeeper.conversations.ignored";
pub const JOINS_ATTEMPTED: &str = "groupkeeper.joins.attempted";
pub const JOINS_SUCCEEDED: &str = "groupkeeper.joins.succeeded";
pub const JOINS_FAILED: &str = "groupkeeper.joins.failed";
pub const JOINS_COALESCED: &str = "groupkeeper.joins.coalesced";
pub const ESTABLISHMENT_CHECK_FAILED: &str = "groupkeeper.establishment.check_failed";
pub const BOOTSTRAP_REGISTERED: &str = "groupkeeper.bootstrap.registered";
pub const BOOTSTRAP_FAILED: &str = "groupkeeper.bootstrap.failed";
pub const EXPAND_SUCCEEDED: &str = "groupkeeper.expand.succeeded";
pub const EXPAND_FAILED: &str = "groupkeeper.expand.failed";

/// Describe metrics and apply the enabled flag
pub fn init_metrics(config: &MetricsConfig) {
    ENABLED.store(config.enabled, Ordering::Relaxed);
    if !config.enabled {
        return;
    }

    describe_counter!(PASSES, "Number of reconciliation passes run");
    describe_histogram!(PASS_DURATION_MS, "Reconciliation pass duration in milliseconds");
    describe_counter!(CONVERSATIONS_IGNORED, "Non-group conversations skipped by a pass");
    describe_counter!(JOINS_ATTEMPTED, "External commit joins issued");
    describe_counter!(JOINS_SUCCEEDED, "External commit joins that succeeded");
    describe_counter!(JOINS_FAILED, "Join attempts that ended in failure");
    describe_counter!(JOINS_COALESCED, "Join requests merged into an in-flight attempt");
    describe_counter!(ESTABLISHMENT_CHECK_FAILED, "Establishment checks that failed or timed out");
    describe_counter!(BOOTSTRAP_REGISTERED, "Uninitialized groups registered");
    describe_counter!(BOOTSTRAP_FAILED, "Group registrations that failed");
    describe_counter!(EXPAND_SUCCEEDED, "Self-device additions that succeeded");
    describe_counter!(EXPAND_FAILED, "Self-device additions that failed");
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    if is_enabled() {
        counter!(name).increment(value);
    }
}

/// Record a histogram metric
pub fn record_histogram(name: &'static str, value: f64) {
    if is_enabled() {
        histogram!(name).record(value);
    }
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    /// Create a new timer
    pub fn new(name: &'static str) -> Self {
        Self { name, start: Instant::now() }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) {
        let duration = self.start.elapsed();
        record_histogram(self.name, duration.as_secs_f64() * 1000.0);
    }
}
