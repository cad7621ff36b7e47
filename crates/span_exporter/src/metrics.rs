//! Delivery counters shared by producers and the delivery worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Thread-safe delivery counters, shared between producers and the worker.
///
/// Every admitted record ends up counted exactly once in `spans_delivered` or
/// `spans_dropped`, or is still buffered:
/// `submitted == delivered + dropped + buffered`.
#[derive(Debug, Default)]
pub struct ExportMetrics {
    /// Records admitted by `submit` / `submit_many`
    pub spans_submitted: AtomicU64,
    /// Records in successfully delivered batches
    pub spans_delivered: AtomicU64,
    /// Records discarded (overflow, permanent failure, shutdown)
    pub spans_dropped: AtomicU64,
    /// Successful batches
    pub batches_delivered: AtomicU64,
    /// Attempts that ended in a transient failure
    pub transient_failures: AtomicU64,
    /// Attempts that ended in a permanent failure
    pub permanent_failures: AtomicU64,
    /// Current backoff interval in milliseconds
    pub backoff_ms: AtomicU64,
}

impl ExportMetrics {
    pub fn spans_submitted(&self) -> u64 {
        self.spans_submitted.load(Ordering::Relaxed)
    }

    pub fn spans_delivered(&self) -> u64 {
        self.spans_delivered.load(Ordering::Relaxed)
    }

    pub fn spans_dropped(&self) -> u64 {
        self.spans_dropped.load(Ordering::Relaxed)
    }

    pub fn batches_delivered(&self) -> u64 {
        self.batches_delivered.load(Ordering::Relaxed)
    }

    pub fn transient_failures(&self) -> u64 {
        self.transient_failures.load(Ordering::Relaxed)
    }

    pub fn permanent_failures(&self) -> u64 {
        self.permanent_failures.load(Ordering::Relaxed)
    }

    pub fn backoff_interval(&self) -> Duration {
        Duration::from_millis(self.backoff_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn record_submitted(&self, count: u64) {
        self.spans_submitted.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, count: u64) {
        self.spans_delivered.fetch_add(count, Ordering::Relaxed);
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        if count > 0 {
            self.spans_dropped.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_transient(&self) {
        self.transient_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_permanent(&self) {
        self.permanent_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_backoff(&self, interval: Duration) {
        self.backoff_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }
}
