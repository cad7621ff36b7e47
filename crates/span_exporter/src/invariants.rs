//! Debug assertion macros for delivery invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]` at each call site),
//! so release builds pay nothing for them.

// =============================================================================
// Backoff Monotonicity
// =============================================================================

/// Assert that a transient failure never shortens the backoff interval.
///
/// **Invariant**: `previous <= next` across consecutive transient failures,
/// unless `previous` was already above the ceiling.
///
/// Used in: `BackoffPolicy::next_interval()` on `TransientFailure`
macro_rules! debug_assert_backoff_non_decreasing {
    ($previous:expr, $next:expr, $ceiling:expr) => {
        debug_assert!(
            $previous <= $next || $previous > $ceiling,
            "backoff shrank on transient failure: {:?} -> {:?}",
            $previous,
            $next
        )
    };
}

/// Assert that the interval respects the configured ceiling.
///
/// **Invariant**: `next <= ceiling`
macro_rules! debug_assert_backoff_capped {
    ($next:expr, $ceiling:expr) => {
        debug_assert!(
            $next <= $ceiling,
            "backoff {:?} exceeds ceiling {:?}",
            $next,
            $ceiling
        )
    };
}

// =============================================================================
// Single Delivery Path
// =============================================================================

/// Assert that no other send is in flight when a new one starts.
///
/// **Invariant**: `state != Sending` on entry to a delivery attempt
///
/// Used in: `DeliveryWorker::attempt()` before draining the buffer
macro_rules! debug_assert_single_inflight {
    ($state:expr) => {
        debug_assert!(
            $state != $crate::exporter::ExporterState::Sending,
            "delivery attempt started while another send was in flight"
        )
    };
}

// =============================================================================
// Retained Batch
// =============================================================================

/// Assert that a restored batch is back in the buffer, minus overflow.
///
/// **Invariant**: `buffered_after >= batch_len - dropped`
///
/// Used in: `DeliveryWorker::attempt()` after `SpanBuffer::restore()`
macro_rules! debug_assert_batch_retained {
    ($buffered_after:expr, $batch_len:expr, $dropped:expr) => {
        debug_assert!(
            $buffered_after + $dropped >= $batch_len,
            "retained batch of {} lost records: {} buffered after restore, {} dropped",
            $batch_len,
            $buffered_after,
            $dropped
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_backoff_capped;
pub(crate) use debug_assert_backoff_non_decreasing;
pub(crate) use debug_assert_batch_retained;
pub(crate) use debug_assert_single_inflight;
