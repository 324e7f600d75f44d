//! Multi-producer single-consumer channel over an array of SPSC rings.
//!
//! Each registered producer owns one [`Ring`]; the consumer sweeps all
//! rings in index order. Producers never share a cache line of mutable
//! state with each other, so the only cross-core traffic is the
//! producer/consumer pair inside each ring.
//!
//! ```text
//! producer 0 ──► ring 0 ──┐
//! producer 1 ──► ring 1 ──┼──► single consumer
//!     ...                 │    (recv / consume_all sweeps in ring order)
//! producer P-1 ► ring P-1 ┘
//! ```

use crate::backoff::Backoff;
#[cfg(feature = "metrics")]
use crate::metrics::MetricsSnapshot;
use crate::{Reservation, Ring};
use std::alloc::{self, Layout};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;

const fn assert_producer_bound<const P: usize>() {
    assert!(P > 0, "channel must allow at least one producer");
    assert!(P <= 128, "channel supports at most 128 producers");
}

/// Errors surfaced by [`Channel::register`].
///
/// Full rings and empty drains are steady-state conditions and never show
/// up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Every producer slot is taken.
    #[error("all {max} producer slots are registered")]
    AtCapacity {
        /// The channel's compile-time producer limit.
        max: usize,
    },
    /// The channel was closed before the registration.
    #[error("channel is closed")]
    Closed,
}

/// MPSC channel: `P` embedded rings of `N` slots each.
///
/// The rings live inside the channel object; construction performs no
/// per-ring allocation. `N` must be a power of two and `P` at most 128,
/// both checked at compile time.
///
/// Producers enter through [`register`](Channel::register), which binds a
/// ring to the caller for the life of the returned handle. The consumer
/// side ([`recv`](Channel::recv), [`consume_all`](Channel::consume_all))
/// must be driven by a single thread.
///
/// Larger configurations should be constructed with
/// [`boxed`](Channel::boxed): a `Channel<u64, 65536, 16>` is roughly 8 MiB
/// and would overflow a thread stack if built in place.
#[repr(C)]
pub struct Channel<T, const N: usize, const P: usize> {
    /// Registration cursor; hands out ring indices and nothing else.
    next_producer: AtomicUsize,
    closed: AtomicBool,
    rings: [Ring<T, N>; P],
}

// SAFETY: ring access is partitioned by role; see Ring.
unsafe impl<T: Send, const N: usize, const P: usize> Send for Channel<T, N, P> {}
unsafe impl<T: Send, const N: usize, const P: usize> Sync for Channel<T, N, P> {}

impl<T, const N: usize, const P: usize> Channel<T, N, P> {
    /// Creates a channel with all rings empty and unbound.
    pub const fn new() -> Self {
        assert_producer_bound::<P>();
        Self {
            next_producer: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            rings: [const { Ring::new() }; P],
        }
    }

    /// Allocates the channel directly on the heap.
    ///
    /// `new()` builds the value on the stack before any move to a `Box`,
    /// which large presets cannot afford. A freshly zeroed allocation is
    /// exactly the initial state `new()` produces (indices zero, flags
    /// clear, slots uninitialised), so this constructs in place.
    pub fn boxed() -> Box<Self> {
        assert_producer_bound::<P>();
        let layout = Layout::new::<Self>();
        // SAFETY: every field of Channel is valid at the all-zero bit
        // pattern: atomics at zero, bools false, slot arrays MaybeUninit.
        unsafe {
            let ptr = alloc::alloc_zeroed(layout).cast::<Self>();
            if ptr.is_null() {
                alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        }
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Slots per ring.
    #[inline]
    pub const fn ring_capacity(&self) -> usize {
        N
    }

    /// Producer slots.
    #[inline]
    pub const fn max_producers(&self) -> usize {
        P
    }

    /// Number of registered producers.
    #[inline]
    pub fn producer_count(&self) -> usize {
        self.registered()
    }

    /// True once [`close`](Channel::close) has run.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// True when every bound ring is drained. Together with
    /// [`is_closed`](Channel::is_closed) this is the consumer's
    /// termination condition.
    pub fn is_empty(&self) -> bool {
        self.bound_rings().iter().all(Ring::is_empty)
    }

    /// Direct access to a ring, bound or not. `None` past `P`.
    #[inline]
    pub fn ring(&self, idx: usize) -> Option<&Ring<T, N>> {
        self.rings.get(idx)
    }

    #[inline]
    fn registered(&self) -> usize {
        // A racing over-capacity register may briefly push the cursor past
        // P before rolling back; clamp so sweeps never index out of range.
        self.next_producer.load(Ordering::Acquire).min(P)
    }

    #[inline]
    fn bound_rings(&self) -> &[Ring<T, N>] {
        &self.rings[..self.registered()]
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Binds the next free ring to the caller and returns the producer
    /// handle for it.
    ///
    /// Safe under concurrent registration; the atomic cursor is the only
    /// synchronisation. Fails with [`ChannelError::AtCapacity`] when all
    /// `P` slots are taken and [`ChannelError::Closed`] after `close`.
    pub fn register(&self) -> Result<Producer<'_, T, N, P>, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let id = self.next_producer.fetch_add(1, Ordering::SeqCst);
        if id >= P {
            self.next_producer.fetch_sub(1, Ordering::SeqCst);
            return Err(ChannelError::AtCapacity { max: P });
        }

        self.rings[id].set_active();
        Ok(Producer { channel: self, id })
    }

    // ------------------------------------------------------------------
    // Consumer side
    // ------------------------------------------------------------------

    /// Copies items into `out`, sweeping the bound rings in index order.
    ///
    /// Sweeps repeat until `out` is full or a whole sweep moves nothing.
    /// The sweep order is fixed, so a loaded early ring can transiently
    /// delay later rings, but every sweep visits every ring; starvation is
    /// bounded by one sweep.
    ///
    /// Returns the number of items written. Must be called from the single
    /// consumer thread.
    pub fn recv(&self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        let mut filled = 0;
        loop {
            let before = filled;
            for ring in self.bound_rings() {
                if filled == out.len() {
                    return filled;
                }
                // SAFETY: single-consumer contract of recv.
                filled += unsafe { ring.copy_batch(&mut out[filled..]) };
            }
            if filled == before {
                return filled;
            }
        }
    }

    /// Zero-copy drain of every bound ring, in index order. The handler
    /// sees each ring's items in commit order; interleaving between rings
    /// follows the sweep.
    ///
    /// Must be called from the single consumer thread.
    pub fn consume_all<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        let mut total = 0;
        for ring in self.bound_rings() {
            // SAFETY: single-consumer contract of consume_all.
            total += unsafe { ring.consume_batch(&mut handler) };
        }
        total
    }

    /// Like [`consume_all`](Channel::consume_all) but hands ownership of
    /// each item to the handler.
    pub fn consume_all_owned<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let mut total = 0;
        for ring in self.bound_rings() {
            // SAFETY: single-consumer contract of consume_all_owned.
            total += unsafe { ring.consume_batch_owned(&mut handler) };
        }
        total
    }

    /// Drains at most `max_total` items across the sweep, preferring
    /// lower-indexed rings. Bounds the time one call can spend when the
    /// backlog is deep.
    pub fn consume_all_up_to<F>(&self, max_total: usize, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        let mut total = 0;
        for ring in self.bound_rings() {
            if total >= max_total {
                break;
            }
            // SAFETY: single-consumer contract of consume_all_up_to.
            total += unsafe { ring.consume_up_to(max_total - total, &mut handler) };
        }
        total
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Closes the channel and every ring. Idempotent.
    ///
    /// Producers observe reserve failures from here on; the consumer keeps
    /// draining until empty. No committed item is lost: the close flag and
    /// the tail stores are both release/acquire pairs.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for ring in &self.rings {
            ring.close();
        }
    }

    /// Field-wise sum of every bound ring's counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut total = MetricsSnapshot::default();
        for ring in self.bound_rings() {
            total.merge(ring.metrics());
        }
        total
    }
}

impl<T, const N: usize, const P: usize> Default for Channel<T, N, P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Write handle bound to one ring of a [`Channel`].
///
/// Obtained from [`Channel::register`]. The handle is the producer
/// identity: it is `Send`, so it may move to a worker thread, but it is
/// deliberately not `Clone`: two handles on one ring would break the
/// single-producer protocol the ring's fast path is built on.
pub struct Producer<'a, T, const N: usize, const P: usize> {
    channel: &'a Channel<T, N, P>,
    id: usize,
}

unsafe impl<T: Send, const N: usize, const P: usize> Send for Producer<'_, T, N, P> {}

impl<T, const N: usize, const P: usize> std::fmt::Debug for Producer<'_, T, N, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer").field("id", &self.id).finish()
    }
}

impl<'a, T, const N: usize, const P: usize> Producer<'a, T, N, P> {
    /// Ring index this producer is bound to. Diagnostic only.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Capacity of the bound ring.
    #[inline]
    pub fn capacity(&self) -> usize {
        N
    }

    #[inline]
    fn ring(&self) -> &'a Ring<T, N> {
        &self.channel.rings[self.id]
    }

    /// Reserves up to `want` contiguous slots for writing; see
    /// [`Ring::reserve`] for the grant rules. `None` when the ring is full
    /// or closed.
    ///
    /// The exclusive borrow keeps a second reservation from existing while
    /// this one is live.
    #[inline]
    pub fn reserve(&mut self, want: usize) -> Option<Reservation<'_, T, N>> {
        // SAFETY: registration bound this ring to exactly this handle, and
        // &mut self serialises reservations on it.
        unsafe { self.ring().reserve(want) }
    }

    /// [`reserve`](Producer::reserve) with adaptive backoff on full.
    ///
    /// Escalates spin → yield → park between attempts and gives up (returns
    /// `None`) once the backoff is exhausted or the ring closes.
    pub fn reserve_with_backoff(&mut self, want: usize) -> Option<Reservation<'_, T, N>> {
        let ring = self.ring();
        let mut backoff = Backoff::new();
        loop {
            // SAFETY: as for reserve.
            if let Some(r) = unsafe { ring.reserve(want) } {
                return Some(r);
            }
            if ring.is_closed() || backoff.is_exhausted() {
                return None;
            }
            backoff.snooze();
        }
    }

    /// Sends one item. Returns `false` when the ring is full or closed.
    #[inline]
    pub fn push(&mut self, item: T) -> bool {
        match self.reserve(1) {
            Some(mut r) => {
                r.as_mut_slice()[0].write(item);
                r.commit();
                true
            }
            None => false,
        }
    }

    /// Copies a batch in, committing reservation-sized chunks. Returns the
    /// number of items actually sent, which is less than `items.len()`
    /// when the ring fills up mid-way.
    pub fn send(&mut self, items: &[T]) -> usize
    where
        T: Copy,
    {
        let mut sent = 0;
        while sent < items.len() {
            let Some(mut r) = self.reserve(items.len() - sent) else {
                break;
            };
            let window = r.as_mut_slice();
            let n = window.len();
            for (slot, &item) in window.iter_mut().zip(&items[sent..sent + n]) {
                slot.write(item);
            }
            r.commit();
            sent += n;
        }
        sent
    }

    /// Closes this producer's ring only.
    #[inline]
    pub fn close(&self) {
        self.ring().close();
    }

    /// True once this ring is closed, by either side.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.ring().is_closed()
    }

    /// Items currently buffered in this ring.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring().len()
    }

    /// True when this ring is drained.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_hands_out_ring_indices() {
        let ch: Channel<u64, 16, 4> = Channel::new();
        let p0 = ch.register().unwrap();
        let p1 = ch.register().unwrap();
        assert_eq!(p0.id(), 0);
        assert_eq!(p1.id(), 1);
        assert_eq!(ch.producer_count(), 2);
    }

    #[test]
    fn register_fails_at_capacity() {
        let ch: Channel<u64, 16, 2> = Channel::new();
        let _p0 = ch.register().unwrap();
        let _p1 = ch.register().unwrap();
        assert_eq!(
            ch.register().unwrap_err(),
            ChannelError::AtCapacity { max: 2 }
        );
        // The rollback leaves the count usable.
        assert_eq!(ch.producer_count(), 2);
    }

    #[test]
    fn register_fails_after_close() {
        let ch: Channel<u64, 16, 4> = Channel::new();
        ch.close();
        assert_eq!(ch.register().unwrap_err(), ChannelError::Closed);
    }

    #[test]
    fn recv_fills_from_all_rings() {
        let ch: Channel<u64, 16, 4> = Channel::new();
        let mut p0 = ch.register().unwrap();
        let mut p1 = ch.register().unwrap();

        assert_eq!(p0.send(&[10, 11]), 2);
        assert_eq!(p1.send(&[20, 21]), 2);

        let mut out = [0u64; 8];
        let n = ch.recv(&mut out);
        assert_eq!(n, 4);
        assert_eq!(&out[..4], &[10, 11, 20, 21]);
    }

    #[test]
    fn recv_respects_buffer_length() {
        let ch: Channel<u64, 16, 2> = Channel::new();
        let mut p0 = ch.register().unwrap();
        p0.send(&[1, 2, 3, 4, 5]);

        let mut out = [0u64; 3];
        assert_eq!(ch.recv(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(ch.recv(&mut out), 2);
        assert_eq!(&out[..2], &[4, 5]);
    }

    #[test]
    fn consume_all_sweeps_in_ring_order() {
        let ch: Channel<u64, 16, 4> = Channel::new();
        let mut p0 = ch.register().unwrap();
        let mut p1 = ch.register().unwrap();

        p0.send(&[1, 2, 3]);
        p1.send(&[4, 5, 6]);

        let mut seen = Vec::new();
        let n = ch.consume_all(|v| seen.push(*v));
        assert_eq!(n, 6);
        assert_eq!(seen, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn consume_all_up_to_prefers_early_rings() {
        let ch: Channel<u64, 16, 4> = Channel::new();
        let mut p0 = ch.register().unwrap();
        let mut p1 = ch.register().unwrap();

        p0.send(&[1, 2, 3]);
        p1.send(&[4, 5, 6]);

        let mut seen = Vec::new();
        assert_eq!(ch.consume_all_up_to(4, |v| seen.push(*v)), 4);
        assert_eq!(seen, [1, 2, 3, 4]);
    }

    #[test]
    fn consume_all_owned_moves_items() {
        let ch: Channel<String, 16, 2> = Channel::new();
        let mut p = ch.register().unwrap();
        assert!(p.push("alpha".to_string()));
        assert!(p.push("beta".to_string()));

        let mut seen = Vec::new();
        ch.consume_all_owned(|s| seen.push(s));
        assert_eq!(seen, ["alpha", "beta"]);
    }

    #[test]
    fn close_is_idempotent_and_drains() {
        let ch: Channel<u64, 16, 2> = Channel::new();
        let mut p = ch.register().unwrap();
        assert!(p.push(7));

        ch.close();
        ch.close();
        assert!(ch.is_closed());
        assert!(!p.push(8));
        assert!(!ch.is_empty());

        let mut seen = Vec::new();
        ch.consume_all(|v| seen.push(*v));
        assert_eq!(seen, [7]);
        assert!(ch.is_empty());
    }

    #[test]
    fn producer_close_leaves_other_rings_open() {
        let ch: Channel<u64, 16, 2> = Channel::new();
        let mut p0 = ch.register().unwrap();
        let mut p1 = ch.register().unwrap();

        p0.close();
        assert!(!p0.push(1));
        assert!(p1.push(2));
        assert!(!ch.is_closed());
    }

    #[test]
    fn boxed_channel_starts_empty() {
        let ch = Channel::<u64, 256, 8>::boxed();
        assert_eq!(ch.producer_count(), 0);
        assert!(!ch.is_closed());
        assert!(ch.is_empty());

        let mut p = ch.register().unwrap();
        assert!(p.push(9));
        let mut out = [0u64; 1];
        assert_eq!(ch.recv(&mut out), 1);
        assert_eq!(out, [9]);
    }

    #[test]
    fn reserve_with_backoff_gives_up_when_full() {
        let ch: Channel<u64, 4, 1> = Channel::new();
        let mut p = ch.register().unwrap();
        assert_eq!(p.send(&[0, 1, 2, 3]), 4);

        // No consumer runs, so the ring stays full and backoff exhausts.
        assert!(p.reserve_with_backoff(1).is_none());
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn metrics_aggregate_across_rings() {
        let ch: Channel<u64, 16, 4> = Channel::new();
        let mut p0 = ch.register().unwrap();
        let mut p1 = ch.register().unwrap();

        p0.send(&[1, 2]);
        p1.send(&[3]);
        ch.consume_all(|_| {});

        let m = ch.metrics();
        assert_eq!(m.items_produced, 3);
        assert_eq!(m.items_consumed, 3);
    }
}
