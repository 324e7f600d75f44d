//! Property-based checks of the ring's structural invariants.
//!
//! Single-threaded by design: the properties constrain the index protocol
//! itself (occupancy bounds, grant bounds, FIFO, loss-freedom), which must
//! hold on every interleaving-free trace before concurrency enters the
//! picture. The threaded suite lives in `channel_tests.rs`.

use fanin::Ring;
use proptest::prelude::*;

const CAP: usize = 64;

fn write_one(ring: &Ring<u64, CAP>, value: u64) -> bool {
    // SAFETY: tests are single-threaded; one logical producer.
    unsafe {
        match ring.reserve(1) {
            Some(mut r) => {
                r.as_mut_slice()[0].write(value);
                r.commit();
                true
            }
            None => false,
        }
    }
}

proptest! {
    /// Occupancy never exceeds capacity, whatever the write/drain mix.
    #[test]
    fn occupancy_stays_bounded(ops in prop::collection::vec(prop::bool::ANY, 1..200)) {
        let ring: Ring<u64, CAP> = Ring::new();

        for is_write in ops {
            if is_write {
                write_one(&ring, 1);
            } else {
                // SAFETY: single-threaded; one logical consumer.
                unsafe { ring.consume_up_to(1, |_| {}) };
            }
            prop_assert!(ring.len() <= CAP,
                "occupancy {} exceeds capacity {}", ring.len(), CAP);
        }
    }

    /// len() moves by exactly the amounts reported by the operations.
    #[test]
    fn len_tracks_reported_counts(ops in prop::collection::vec(prop::bool::ANY, 1..100)) {
        let ring: Ring<u64, CAP> = Ring::new();

        for is_write in ops {
            let before = ring.len();
            if is_write {
                if write_one(&ring, 7) {
                    prop_assert_eq!(ring.len(), before + 1);
                }
            } else {
                let drained = unsafe { ring.consume_batch(|_| {}) };
                prop_assert_eq!(ring.len(), before - drained);
            }
        }
    }

    /// Everything written is drained exactly once, in write order.
    #[test]
    fn drain_matches_writes(values in prop::collection::vec(any::<u64>(), 0..150)) {
        let ring: Ring<u64, CAP> = Ring::new();

        let mut written = Vec::new();
        for &v in &values {
            if write_one(&ring, v) {
                written.push(v);
            }
        }

        let mut drained = Vec::new();
        unsafe { ring.consume_batch(|&v| drained.push(v)) };

        prop_assert_eq!(drained, written);
        prop_assert!(ring.is_empty());
    }

    /// A grant never exceeds the request, the free space, or the contiguous
    /// run up to the wrap boundary, and is never empty.
    #[test]
    fn grants_respect_bounds(
        pre_fill in 0usize..CAP,
        pre_drain in 0usize..CAP,
        want in 1usize..2 * CAP,
    ) {
        let ring: Ring<u64, CAP> = Ring::new();

        for i in 0..pre_fill {
            write_one(&ring, i as u64);
        }
        let drained = unsafe { ring.consume_up_to(pre_drain, |_| {}) };

        let occupancy = pre_fill - drained;
        let free = CAP - occupancy;
        let to_end = CAP - (pre_fill % CAP);

        if let Some(grant) = unsafe { ring.reserve(want) } {
            prop_assert!(want <= CAP, "oversized request must not be granted");
            prop_assert!(grant.len() >= 1);
            prop_assert!(grant.len() <= want);
            prop_assert!(grant.len() <= free);
            prop_assert!(grant.len() <= to_end,
                "grant {} crosses the wrap boundary ({} to end)", grant.len(), to_end);
        } else {
            prop_assert!(want > CAP || want > free,
                "reserve({}) refused with {} free slots", want, free);
        }
    }
}
