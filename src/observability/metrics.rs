//! Metrics registry
//!
//! - Counters only
//! - Monotonic increase
//! - Owned by a storage façade, so two façades never share counts

use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters for one storage façade.
///
/// All counters use Relaxed ordering; exact cross-counter consistency is not
/// required.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    threads_created: AtomicU64,
    requests_submitted: AtomicU64,
    requests_failed: AtomicU64,
    tx_begun: AtomicU64,
    tx_committed: AtomicU64,
    tx_aborted: AtomicU64,
    plans_compiled: AtomicU64,
    plans_rejected: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_threads(&self) {
        self.threads_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_requests(&self) {
        self.requests_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_request_failures(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_tx_begun(&self) {
        self.tx_begun.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_tx_committed(&self) {
        self.tx_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_tx_aborted(&self) {
        self.tx_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_plans_compiled(&self) {
        self.plans_compiled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_plans_rejected(&self) {
        self.plans_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            threads_created: self.threads_created.load(Ordering::Relaxed),
            requests_submitted: self.requests_submitted.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            tx_begun: self.tx_begun.load(Ordering::Relaxed),
            tx_committed: self.tx_committed.load(Ordering::Relaxed),
            tx_aborted: self.tx_aborted.load(Ordering::Relaxed),
            plans_compiled: self.plans_compiled.load(Ordering::Relaxed),
            plans_rejected: self.plans_rejected.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub threads_created: u64,
    pub requests_submitted: u64,
    pub requests_failed: u64,
    pub tx_begun: u64,
    pub tx_committed: u64,
    pub tx_aborted: u64,
    pub plans_compiled: u64,
    pub plans_rejected: u64,
}
