//! Span Buffer - Pending Records Awaiting Delivery
//!
//! A mutex-guarded queue shared by every producer thread and the single
//! delivery worker. Producers append; the worker swaps the whole queue out with
//! [`SpanBuffer::drain_for_send`], so records submitted while a send is in
//! flight accumulate in a fresh queue and never touch the batch being sent.
//!
//! The buffer is bounded by a ceiling. When an append or a restore would exceed
//! it, the [`OverflowPolicy`] decides which records are discarded, and the
//! number discarded is returned so the caller can log and count the loss.

use crate::span::SpanBatch;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What to discard when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest pending records to make room.
    #[default]
    DropOldest,
    /// Reject the incoming records (on restore, trim the newest tail).
    DropNewest,
}

/// Thread-safe accumulator of pending records.
pub struct SpanBuffer<S> {
    pending: Mutex<VecDeque<S>>,
    capacity: usize,
    overflow: OverflowPolicy,
}

impl<S> SpanBuffer<S> {
    /// Creates a buffer holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            overflow,
        }
    }

    /// Creates a buffer with no practical ceiling.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX, OverflowPolicy::DropOldest)
    }

    // The queue is valid after any panic between lock and unlock, so a
    // poisoned lock is simply recovered.
    fn lock(&self) -> MutexGuard<'_, VecDeque<S>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends one record. Returns how many records overflow discarded.
    pub fn append(&self, span: S) -> usize {
        let mut pending = self.lock();
        if pending.len() < self.capacity {
            pending.push_back(span);
            return 0;
        }
        match self.overflow {
            OverflowPolicy::DropOldest => {
                pending.pop_front();
                pending.push_back(span);
            }
            OverflowPolicy::DropNewest => drop(span),
        }
        1
    }

    /// Appends records in iteration order under a single lock acquisition.
    /// Returns how many records overflow discarded.
    pub fn append_many<I>(&self, spans: I) -> usize
    where
        I: IntoIterator<Item = S>,
    {
        let mut pending = self.lock();
        let mut dropped = 0;
        for span in spans {
            if pending.len() < self.capacity {
                pending.push_back(span);
                continue;
            }
            dropped += 1;
            if self.overflow == OverflowPolicy::DropOldest {
                pending.pop_front();
                pending.push_back(span);
            }
        }
        dropped
    }

    /// Swaps the pending queue for an empty one and returns the old contents.
    pub fn drain_for_send(&self) -> SpanBatch<S> {
        let drained = std::mem::take(&mut *self.lock());
        SpanBatch::with_spans(Vec::from(drained))
    }

    /// Puts a retained batch back in front of everything appended since it was
    /// drained. Returns how many records overflow discarded.
    pub fn restore(&self, batch: SpanBatch<S>) -> usize {
        let mut pending = self.lock();
        let mut merged: VecDeque<S> = batch.into_spans().into();
        merged.append(&mut pending);

        let excess = merged.len().saturating_sub(self.capacity);
        match self.overflow {
            OverflowPolicy::DropOldest => {
                merged.drain(..excess);
            }
            OverflowPolicy::DropNewest => merged.truncate(self.capacity),
        }
        *pending = merged;
        excess
    }

    /// Number of pending records
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of pending records
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drain_preserves_insertion_order() {
        let buffer = SpanBuffer::unbounded();
        buffer.append(1);
        buffer.append_many(vec![2, 3, 4]);
        buffer.append(5);

        let batch = buffer.drain_for_send();
        assert_eq!(batch.spans, vec![1, 2, 3, 4, 5]);
        assert!(buffer.is_empty());
        assert!(buffer.drain_for_send().is_empty());
    }

    #[test]
    fn test_appends_after_drain_go_to_new_batch() {
        let buffer = SpanBuffer::unbounded();
        buffer.append_many(0..3);

        let in_flight = buffer.drain_for_send();
        buffer.append(10);
        buffer.append(11);

        assert_eq!(in_flight.spans, vec![0, 1, 2]);
        assert_eq!(buffer.drain_for_send().spans, vec![10, 11]);
    }

    #[test]
    fn test_restore_prepends_retained_batch() {
        let buffer = SpanBuffer::unbounded();
        buffer.append_many(vec!["a", "b", "c"]);
        let failed = buffer.drain_for_send();

        buffer.append("d");
        assert_eq!(buffer.restore(failed), 0);

        assert_eq!(buffer.drain_for_send().spans, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_drop_oldest_on_append() {
        let buffer = SpanBuffer::new(3, OverflowPolicy::DropOldest);
        assert_eq!(buffer.append_many(1..=3), 0);
        assert_eq!(buffer.append(4), 1);
        assert_eq!(buffer.append_many(vec![5, 6]), 2);

        assert_eq!(buffer.drain_for_send().spans, vec![4, 5, 6]);
    }

    #[test]
    fn test_drop_newest_on_append() {
        let buffer = SpanBuffer::new(3, OverflowPolicy::DropNewest);
        assert_eq!(buffer.append_many(1..=5), 2);
        assert_eq!(buffer.append(6), 1);

        assert_eq!(buffer.drain_for_send().spans, vec![1, 2, 3]);
    }

    #[test]
    fn test_restore_overflow_respects_policy() {
        let oldest = SpanBuffer::new(4, OverflowPolicy::DropOldest);
        oldest.append_many(1..=3);
        let batch = oldest.drain_for_send();
        oldest.append_many(4..=6);
        assert_eq!(oldest.restore(batch), 2);
        assert_eq!(oldest.drain_for_send().spans, vec![3, 4, 5, 6]);

        let newest = SpanBuffer::new(4, OverflowPolicy::DropNewest);
        newest.append_many(1..=3);
        let batch = newest.drain_for_send();
        newest.append_many(4..=6);
        assert_eq!(newest.restore(batch), 2);
        assert_eq!(newest.drain_for_send().spans, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        const PRODUCERS: u64 = 8;
        const PER_PRODUCER: u64 = 5_000;

        let buffer = Arc::new(SpanBuffer::unbounded());
        let drained = Arc::new(Mutex::new(Vec::new()));

        let mut handles = vec![];
        for producer_id in 0..PRODUCERS {
            let buffer = Arc::clone(&buffer);
            handles.push(thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    buffer.append((producer_id, seq));
                }
            }));
        }

        // Drain concurrently with the producers
        let drainer = {
            let buffer = Arc::clone(&buffer);
            let drained = Arc::clone(&drained);
            thread::spawn(move || {
                for _ in 0..100 {
                    let batch = buffer.drain_for_send();
                    drained.lock().unwrap().extend(batch.into_spans());
                    thread::yield_now();
                }
            })
        };

        for handle in handles {
            handle.join().unwrap();
        }
        drainer.join().unwrap();

        let mut all = drained.lock().unwrap().clone();
        all.extend(buffer.drain_for_send().into_spans());
        assert_eq!(all.len() as u64, PRODUCERS * PER_PRODUCER);

        // Per-producer FIFO survives the swaps
        let mut last_seen = vec![None; PRODUCERS as usize];
        for (producer_id, seq) in all {
            let slot = &mut last_seen[producer_id as usize];
            if let Some(prev) = *slot {
                assert!(seq > prev, "producer {producer_id}: {seq} after {prev}");
            }
            *slot = Some(seq);
        }
    }
}
