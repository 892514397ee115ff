//! Dispatch metrics for observability

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for a single dispatcher
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Completed dispatch cycles
    cycles: AtomicU64,
    /// Successful deliveries
    delivered: AtomicU64,
    /// Failed deliveries (error or panic)
    failed: AtomicU64,
    /// Messages deleted outside a transaction
    deleted: AtomicU64,
    /// Messages handed back for redelivery
    unlocked: AtomicU64,
    /// Acknowledgment failures reported during cleanup
    acknowledgment_failures: AtomicU64,
    /// Failed deliveries since the last success
    consecutive_failures: AtomicU64,
}

impl DispatchMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn inc_cycles(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Record a successful delivery; resets the consecutive failure run
    pub fn inc_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Record a failed delivery, returns the length of the current failure run
    pub fn inc_failed(&self) -> u64 {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::Relaxed)
    }

    pub fn add_deleted(&self, count: u64) {
        self.deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn unlocked(&self) -> u64 {
        self.unlocked.load(Ordering::Relaxed)
    }

    pub fn add_unlocked(&self, count: u64) {
        self.unlocked.fetch_add(count, Ordering::Relaxed);
    }

    pub fn acknowledgment_failures(&self) -> u64 {
        self.acknowledgment_failures.load(Ordering::Relaxed)
    }

    pub fn inc_acknowledgment_failures(&self) {
        self.acknowledgment_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles(),
            delivered: self.delivered(),
            failed: self.failed(),
            deleted: self.deleted(),
            unlocked: self.unlocked(),
            acknowledgment_failures: self.acknowledgment_failures(),
            consecutive_failures: self.consecutive_failures(),
        }
    }
}

/// Snapshot of dispatch metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub delivered: u64,
    pub failed: u64,
    pub deleted: u64,
    pub unlocked: u64,
    pub acknowledgment_failures: u64,
    pub consecutive_failures: u64,
}
