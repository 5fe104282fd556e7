//! Write-path metrics registry
//!
//! - Counters only, monotonic
//! - Relaxed atomics; exactness per counter, not across counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for the write path
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    mutations_encoded: AtomicU64,
    mutations_blocked: AtomicU64,
    mutations_failed: AtomicU64,
    batches_flushed: AtomicU64,
    bytes_flushed: AtomicU64,
    overflow_flushes: AtomicU64,
    regions_detached: AtomicU64,
    private_placements: AtomicU64,
    worker_failures: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_mutations_encoded(&self) {
        self.mutations_encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_mutations_blocked(&self) {
        self.mutations_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_mutations_failed(&self, count: u64) {
        self.mutations_failed.fetch_add(count, Ordering::Relaxed);
    }

    /// Record one flushed batch of `bytes` encoded bytes
    pub fn record_flush(&self, bytes: u64) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.bytes_flushed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_overflow_flushes(&self) {
        self.overflow_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_regions_detached(&self) {
        self.regions_detached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_private_placements(&self) {
        self.private_placements.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_worker_failures(&self) {
        self.worker_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            mutations_encoded: self.mutations_encoded.load(Ordering::Relaxed),
            mutations_blocked: self.mutations_blocked.load(Ordering::Relaxed),
            mutations_failed: self.mutations_failed.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            bytes_flushed: self.bytes_flushed.load(Ordering::Relaxed),
            overflow_flushes: self.overflow_flushes.load(Ordering::Relaxed),
            regions_detached: self.regions_detached.load(Ordering::Relaxed),
            private_placements: self.private_placements.load(Ordering::Relaxed),
            worker_failures: self.worker_failures.load(Ordering::Relaxed),
        }
    }

    /// Snapshot as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_default()
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub mutations_encoded: u64,
    pub mutations_blocked: u64,
    pub mutations_failed: u64,
    pub batches_flushed: u64,
    pub bytes_flushed: u64,
    pub overflow_flushes: u64,
    pub regions_detached: u64,
    pub private_placements: u64,
    pub worker_failures: u64,
}
