//! Per-ring operation counters, enabled by the `metrics` cargo feature.
//!
//! The counters are relaxed `AtomicU64`s: nothing synchronises through them
//! and eventual visibility is enough for observability. They live on the
//! ring's cold line, away from the index counters the fast path touches.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters owned by one ring.
#[derive(Debug)]
pub struct Metrics {
    items_produced: AtomicU64,
    items_consumed: AtomicU64,
    batches_produced: AtomicU64,
    batches_consumed: AtomicU64,
    reserve_failures: AtomicU64,
}

impl Metrics {
    pub(crate) const fn new() -> Self {
        Self {
            items_produced: AtomicU64::new(0),
            items_consumed: AtomicU64::new(0),
            batches_produced: AtomicU64::new(0),
            batches_consumed: AtomicU64::new(0),
            reserve_failures: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_produced(&self, items: usize) {
        self.items_produced.fetch_add(items as u64, Ordering::Relaxed);
        self.batches_produced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_consumed(&self, items: usize) {
        self.items_consumed.fetch_add(items as u64, Ordering::Relaxed);
        self.batches_consumed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_reserve_failure(&self) {
        self.reserve_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values into a plain struct.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_produced: self.items_produced.load(Ordering::Relaxed),
            items_consumed: self.items_consumed.load(Ordering::Relaxed),
            batches_produced: self.batches_produced.load(Ordering::Relaxed),
            batches_consumed: self.batches_consumed.load(Ordering::Relaxed),
            reserve_failures: self.reserve_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of one ring's counters.
///
/// Snapshots add field-wise, so a channel-wide view is the sum of the
/// per-ring snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Items published by `commit`.
    pub items_produced: u64,
    /// Items handed to a consumer.
    pub items_consumed: u64,
    /// Number of commits.
    pub batches_produced: u64,
    /// Number of non-empty drains.
    pub batches_consumed: u64,
    /// Reservations refused because the ring was full.
    pub reserve_failures: u64,
}

impl MetricsSnapshot {
    pub(crate) fn merge(&mut self, other: MetricsSnapshot) {
        self.items_produced += other.items_produced;
        self.items_consumed += other.items_consumed;
        self.batches_produced += other.batches_produced;
        self.batches_consumed += other.batches_consumed;
        self.reserve_failures += other.reserve_failures;
    }
}
