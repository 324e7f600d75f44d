//! Debug assertions over the ring index protocol.
//!
//! These macros check the structural invariants of the head/tail counters at
//! the points where they are updated. They are compiled only in debug builds,
//! so the release fast path carries no checks. The callers that need an extra
//! counter load just for a check gate the whole block on `debug_assertions`;
//! those macros are gated here to match.

/// Occupancy implied by a new tail must not exceed capacity.
///
/// Checked in `Ring::publish` after computing the new tail.
#[cfg(debug_assertions)]
macro_rules! debug_assert_occupancy {
    ($occupancy:expr, $capacity:expr) => {
        debug_assert!(
            $occupancy <= $capacity,
            "ring overfilled: {} items in a {}-slot ring",
            $occupancy,
            $capacity
        )
    };
}

/// Head may never pass tail.
///
/// Checked in `Ring::advance` before the head store.
#[cfg(debug_assertions)]
macro_rules! debug_assert_head_le_tail {
    ($new_head:expr, $tail:expr) => {
        debug_assert!(
            $new_head <= $tail,
            "head {} advanced past tail {}",
            $new_head,
            $tail
        )
    };
}

/// Sequence counters only move forward.
#[cfg(debug_assertions)]
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} moved backwards: {} -> {}",
            $name,
            $old,
            $new
        )
    };
}

/// Reads must stay inside the initialised `[head, tail)` window.
///
/// Checked in the consume loops before each slot read.
macro_rules! debug_assert_in_window {
    ($pos:expr, $head:expr, $tail:expr) => {
        debug_assert!(
            $pos >= $head && $pos < $tail,
            "reading slot at seq {} outside initialised window [{}, {})",
            $pos,
            $head,
            $tail
        )
    };
}

#[cfg(debug_assertions)]
pub(crate) use debug_assert_head_le_tail;
pub(crate) use debug_assert_in_window;
#[cfg(debug_assertions)]
pub(crate) use debug_assert_monotonic;
#[cfg(debug_assertions)]
pub(crate) use debug_assert_occupancy;
