//! Bounded SPSC ring buffer with an embedded slot array.
//!
//! [`Ring<T, N>`] is the building block the channel composes: one producer
//! writes through a reserve/commit window, one consumer drains in batches.
//! Head and tail are 64-bit monotonic counters; the slot for a counter value
//! is `value & (N - 1)`, which requires `N` to be a power of two.
//!
//! # Memory layout
//!
//! The struct is `repr(C)` with three 128-byte regions ahead of the slot
//! array:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ producer line (128B)   tail, cached_head                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ consumer line (128B)   head, cached_tail                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ cold line (128B)       active, closed, counters              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ slots (64B aligned)    [UnsafeCell<MaybeUninit<T>>; N]       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The two hot lines are written by different cores. 64 bytes of separation
//! is not enough on x86-64, where the adjacent-line prefetcher pulls cache
//! lines in pairs; 128 bytes keeps the pair boundaries apart. The layout
//! tests below pin the offsets.
//!
//! # Shadow counters
//!
//! `cached_head` and `cached_tail` are plain (non-atomic) thread-local
//! shadows of the counterpart's index. A shadow always lags the real
//! counter, so acting on it can only under-report free space or available
//! items, never over-report. The shadows are refreshed with an acquire load
//! only when the stale value makes an operation look impossible, which keeps
//! cross-core traffic off the fast path.

use crate::invariants::debug_assert_in_window;
#[cfg(debug_assertions)]
use crate::invariants::{debug_assert_head_le_tail, debug_assert_monotonic, debug_assert_occupancy};
#[cfg(feature = "metrics")]
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::Reservation;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

const fn assert_capacity<const N: usize>() {
    assert!(N > 0, "ring capacity must be non-zero");
    assert!(
        N.is_power_of_two(),
        "ring capacity must be a power of two"
    );
}

/// Fields written by the producer on every commit.
#[repr(C, align(128))]
struct ProducerLine {
    /// Monotonic write index. Producer stores (release), consumer loads (acquire).
    tail: AtomicU64,
    /// Producer-local shadow of `head`.
    cached_head: UnsafeCell<u64>,
}

impl ProducerLine {
    const fn new() -> Self {
        Self {
            tail: AtomicU64::new(0),
            cached_head: UnsafeCell::new(0),
        }
    }
}

/// Fields written by the consumer on every drain.
#[repr(C, align(128))]
struct ConsumerLine {
    /// Monotonic read index. Consumer stores (release), producer loads (acquire).
    head: AtomicU64,
    /// Consumer-local shadow of `tail`.
    cached_tail: UnsafeCell<u64>,
}

impl ConsumerLine {
    const fn new() -> Self {
        Self {
            head: AtomicU64::new(0),
            cached_tail: UnsafeCell::new(0),
        }
    }
}

/// Rarely-touched lifecycle state, kept off both hot lines.
#[repr(C, align(128))]
struct ColdLine {
    /// True between registration and close.
    active: AtomicBool,
    closed: AtomicBool,
    #[cfg(feature = "metrics")]
    metrics: Metrics,
}

impl ColdLine {
    const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
        }
    }
}

#[repr(C, align(64))]
struct Slots<T, const N: usize>([UnsafeCell<MaybeUninit<T>>; N]);

/// Bounded single-producer single-consumer ring with `N` embedded slots.
///
/// The buffer lives inside the struct, so slot addressing is a base+offset
/// computation with no pointer chase, and a [`Channel`](crate::Channel)
/// holding an array of rings performs no per-ring allocation.
///
/// The producer-side and consumer-side methods are `unsafe fn`s: the ring
/// cannot itself enforce that exactly one thread plays each role. The
/// channel's `register` handshake is what makes the safe wrappers sound.
#[repr(C)]
pub struct Ring<T, const N: usize> {
    producer: ProducerLine,
    consumer: ConsumerLine,
    cold: ColdLine,
    slots: Slots<T, N>,
}

// SAFETY: the index protocol hands each initialised slot to exactly one
// thread at a time, so the ring is Send/Sync whenever T may move between
// threads.
unsafe impl<T: Send, const N: usize> Send for Ring<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for Ring<T, N> {}

impl<T, const N: usize> Ring<T, N> {
    const MASK: usize = N - 1;

    /// Creates an empty ring. All indices start at zero; the all-zero bit
    /// pattern is a valid initial state, which `Channel::boxed` relies on.
    ///
    /// Fails at compile time when `N` is not a power of two.
    pub const fn new() -> Self {
        assert_capacity::<N>();
        Self {
            producer: ProducerLine::new(),
            consumer: ConsumerLine::new(),
            cold: ColdLine::new(),
            slots: Slots([const { UnsafeCell::new(MaybeUninit::uninit()) }; N]),
        }
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Total slot count.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Items currently buffered. Racy by nature; exact only when both sides
    /// are quiescent.
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.producer.tail.load(Ordering::Relaxed);
        let head = self.consumer.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    /// True when `head == tail`. Uses acquire loads so that a consumer
    /// checking `is_closed() && is_empty()` as its termination condition
    /// cannot miss items committed before the close.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.producer.tail.load(Ordering::Acquire) == self.consumer.head.load(Ordering::Acquire)
    }

    /// True when the ring holds `N` items.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= N
    }

    /// True once [`close`](Ring::close) has run.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.cold.closed.load(Ordering::Acquire)
    }

    /// True between registration and close.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.cold.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self) {
        self.cold.active.store(true, Ordering::Release);
    }

    /// Closes the ring. Idempotent. Subsequent `reserve` calls fail; the
    /// consumer can still drain whatever was committed first.
    pub fn close(&self) {
        self.cold.active.store(false, Ordering::Release);
        self.cold.closed.store(true, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Producer side
    // ------------------------------------------------------------------

    /// Reserves up to `want` contiguous slots for writing.
    ///
    /// Returns `None` when the ring is full or closed, when `want == 0`, or
    /// when `want > N` (a request that could never be satisfied). The grant
    /// may be shorter than `want` if the window would cross the wrap
    /// boundary; honour `Reservation::len`.
    ///
    /// Fast path: one relaxed load of `tail` plus a comparison against the
    /// `cached_head` shadow. The acquire load of `head` happens only when
    /// the shadow says the ring looks full.
    ///
    /// # Safety
    ///
    /// Only one thread may act as this ring's producer, and it must not call
    /// `reserve` again before committing or dropping the reservation.
    pub unsafe fn reserve(&self, want: usize) -> Option<Reservation<'_, T, N>> {
        if want == 0 || want > N || self.is_closed() {
            return None;
        }

        let tail = self.producer.tail.load(Ordering::Relaxed);

        let mut head = *self.producer.cached_head.get();
        if tail.wrapping_sub(head) as usize + want > N {
            // Shadow says full; refresh it from the consumer's index.
            head = self.consumer.head.load(Ordering::Acquire);
            *self.producer.cached_head.get() = head;

            if tail.wrapping_sub(head) as usize + want > N {
                #[cfg(feature = "metrics")]
                self.cold.metrics.record_reserve_failure();
                return None;
            }
        }

        let idx = (tail as usize) & Self::MASK;
        let granted = want.min(N - idx);
        let first = (*self.slots.0.as_ptr().add(idx)).get();
        let window = std::slice::from_raw_parts_mut(first, granted);
        Some(Reservation::new(window, self))
    }

    /// Advances `tail` by `n`, publishing the writes made through the most
    /// recent reservation. Single release store; pairs with the consumer's
    /// acquire load of `tail`.
    pub(crate) fn publish(&self, n: usize) {
        if n == 0 {
            return;
        }
        let tail = self.producer.tail.load(Ordering::Relaxed);
        let new_tail = tail.wrapping_add(n as u64);

        // Debug builds cross-check against the consumer's index; release
        // builds keep the commit at one load and one store.
        #[cfg(debug_assertions)]
        {
            let head = self.consumer.head.load(Ordering::Relaxed);
            debug_assert_occupancy!(new_tail.wrapping_sub(head) as usize, N);
            debug_assert_monotonic!("tail", tail, new_tail);
        }

        self.producer.tail.store(new_tail, Ordering::Release);

        #[cfg(feature = "metrics")]
        self.cold.metrics.record_produced(n);
    }

    // ------------------------------------------------------------------
    // Consumer side
    // ------------------------------------------------------------------

    /// Drains every available item, invoking `handler` with a reference
    /// into the buffer for each, in index order. One release store of
    /// `head` publishes the whole batch.
    ///
    /// Returns the number of items drained; 0 means the ring was empty.
    /// Items are dropped in place after the handler returns.
    ///
    /// # Safety
    ///
    /// Only one thread may act as this ring's consumer. The handler must
    /// not stash the reference beyond the call and must not unwind: the
    /// head update is deferred to the end of the batch, so a panic leaves
    /// already-handled slots inside the live window.
    pub unsafe fn consume_batch<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        let head = self.consumer.head.load(Ordering::Relaxed);
        let Some(tail) = self.available_tail(head) else {
            return 0;
        };

        let mut pos = head;
        while pos != tail {
            debug_assert_in_window!(pos, head, tail);
            let item = (*self.slots.0.as_ptr().add((pos as usize) & Self::MASK))
                .get()
                .cast::<T>();
            handler(&*item);
            ptr::drop_in_place(item);
            pos = pos.wrapping_add(1);
        }

        self.consumer.head.store(tail, Ordering::Release);

        let drained = tail.wrapping_sub(head) as usize;
        #[cfg(feature = "metrics")]
        self.cold.metrics.record_consumed(drained);
        drained
    }

    /// Like [`consume_batch`](Ring::consume_batch) but moves each item out
    /// of the buffer and hands ownership to the handler.
    ///
    /// # Safety
    ///
    /// Single-consumer, as for `consume_batch`.
    pub unsafe fn consume_batch_owned<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let head = self.consumer.head.load(Ordering::Relaxed);
        let Some(tail) = self.available_tail(head) else {
            return 0;
        };

        let mut pos = head;
        while pos != tail {
            debug_assert_in_window!(pos, head, tail);
            let slot = (*self.slots.0.as_ptr().add((pos as usize) & Self::MASK)).get();
            handler((*slot).assume_init_read());
            pos = pos.wrapping_add(1);
        }

        self.consumer.head.store(tail, Ordering::Release);

        let drained = tail.wrapping_sub(head) as usize;
        #[cfg(feature = "metrics")]
        self.cold.metrics.record_consumed(drained);
        drained
    }

    /// Drains at most `max` items. Bounds the time spent in one call when a
    /// ring has a deep backlog.
    ///
    /// # Safety
    ///
    /// Single-consumer, as for `consume_batch`.
    pub unsafe fn consume_up_to<F>(&self, max: usize, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        if max == 0 {
            return 0;
        }

        let head = self.consumer.head.load(Ordering::Relaxed);
        let Some(tail) = self.available_tail(head) else {
            return 0;
        };

        let take = (tail.wrapping_sub(head) as usize).min(max);
        let end = head.wrapping_add(take as u64);

        let mut pos = head;
        while pos != end {
            debug_assert_in_window!(pos, head, tail);
            let item = (*self.slots.0.as_ptr().add((pos as usize) & Self::MASK))
                .get()
                .cast::<T>();
            handler(&*item);
            ptr::drop_in_place(item);
            pos = pos.wrapping_add(1);
        }

        self.consumer.head.store(end, Ordering::Release);

        #[cfg(feature = "metrics")]
        self.cold.metrics.record_consumed(take);
        take
    }

    /// Copies up to `out.len()` items into `out`, advances `head`, and
    /// returns the count. Loops over the wrap boundary, so a single call
    /// can fill `out` from both ends of the buffer.
    ///
    /// # Safety
    ///
    /// Single-consumer, as for `consume_batch`.
    pub unsafe fn copy_batch(&self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        let mut copied = 0;
        while copied < out.len() {
            let Some((src, len)) = self.peek() else {
                break;
            };
            let n = len.min(out.len() - copied);
            ptr::copy_nonoverlapping(src, out.as_mut_ptr().add(copied), n);
            self.advance(n);
            copied += n;
        }

        #[cfg(feature = "metrics")]
        if copied > 0 {
            self.cold.metrics.record_consumed(copied);
        }
        copied
    }

    /// Exposes the contiguous readable run starting at `head`, without
    /// consuming. Returns `None` when empty. More items may be available
    /// past the wrap boundary; call again after [`advance`](Ring::advance).
    ///
    /// # Safety
    ///
    /// Single-consumer. The pointer is invalidated by `advance`.
    pub unsafe fn peek(&self) -> Option<(*const T, usize)> {
        let head = self.consumer.head.load(Ordering::Relaxed);
        let tail = self.available_tail(head)?;

        let idx = (head as usize) & Self::MASK;
        let contiguous = (tail.wrapping_sub(head) as usize).min(N - idx);
        let first = (*self.slots.0.as_ptr().add(idx)).get().cast::<T>().cast_const();
        Some((first, contiguous))
    }

    /// Advances `head` past `n` items previously observed via
    /// [`peek`](Ring::peek).
    ///
    /// For `T` with drop glue the caller takes over disposal; the ring will
    /// not touch advanced-past slots again.
    #[inline]
    pub fn advance(&self, n: usize) {
        let head = self.consumer.head.load(Ordering::Relaxed);
        let new_head = head.wrapping_add(n as u64);

        #[cfg(debug_assertions)]
        {
            let tail = self.producer.tail.load(Ordering::Relaxed);
            debug_assert_head_le_tail!(new_head, tail);
            debug_assert_monotonic!("head", head, new_head);
        }

        self.consumer.head.store(new_head, Ordering::Release);
    }

    /// Resolves the drain limit for the consumer: the `cached_tail` shadow,
    /// refreshed from `tail` (acquire) only when the shadow has no items
    /// left. Returns `None` when the ring is really empty.
    #[inline]
    unsafe fn available_tail(&self, head: u64) -> Option<u64> {
        let mut tail = *self.consumer.cached_tail.get();
        if tail == head {
            tail = self.producer.tail.load(Ordering::Acquire);
            *self.consumer.cached_tail.get() = tail;
            if tail == head {
                return None;
            }
        }
        Some(tail)
    }

    // ------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------

    /// Snapshot of this ring's counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.cold.metrics.snapshot()
    }
}

impl<T, const N: usize> Default for Ring<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for Ring<T, N> {
    fn drop(&mut self) {
        // The window [head, tail) still holds initialised, unconsumed items.
        let head = *self.consumer.head.get_mut();
        let tail = *self.producer.tail.get_mut();

        let mut pos = head;
        while pos != tail {
            let idx = (pos as usize) & Self::MASK;
            // SAFETY: slots inside [head, tail) are initialised and owned
            // exclusively by us through &mut self.
            unsafe { self.slots.0[idx].get_mut().assume_init_drop() };
            pos = pos.wrapping_add(1);
        }
    }
}
