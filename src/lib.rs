//! Lock-free Multi-Producer Single-Consumer channel.
//!
//! The channel is ring-decomposed: every registered producer owns a private
//! SPSC ring and the single consumer sweeps all rings. Producer/producer
//! contention is eliminated by construction, which is what lets the fast
//! path run at billions of items per second.
//!
//! # Key mechanics
//!
//! - Embedded per-producer rings with 128-byte hot-line separation
//!   (adjacent-line prefetchers make 64 bytes insufficient)
//! - Zero-copy `reserve`/`commit` writes and batched drains with one
//!   atomic index update per batch
//! - Producer-local and consumer-local shadow indices that keep cross-core
//!   loads off the fast path
//! - Adaptive backoff (spin → yield → bounded park) for full rings and
//!   idle consumers
//!
//! Capacity and producer count are const generics; see the type aliases
//! for the common presets. The optional `metrics` feature compiles in
//! per-ring traffic counters.
//!
//! # Example
//!
//! ```
//! use fanin::Channel;
//!
//! let channel = Channel::<u64, 64, 4>::new();
//! let mut producer = channel.register().unwrap();
//!
//! // Single-item send.
//! producer.push(42);
//!
//! // Zero-copy batch: reserve a window, write in place, publish.
//! if let Some(mut window) = producer.reserve(2) {
//!     window.as_mut_slice()[0].write(43);
//!     window.as_mut_slice()[1].write(44);
//!     window.commit();
//! }
//!
//! let mut received = Vec::new();
//! channel.consume_all(|item: &u64| received.push(*item));
//! assert_eq!(received, [42, 43, 44]);
//! ```

mod backoff;
mod channel;
mod invariants;
#[cfg(feature = "metrics")]
mod metrics;
mod reservation;
mod ring;

pub use backoff::Backoff;
pub use channel::{Channel, ChannelError, Producer};
#[cfg(feature = "metrics")]
pub use metrics::MetricsSnapshot;
pub use reservation::{CommitError, Reservation};
pub use ring::Ring;

/// 4K slots per ring: every ring's hot window stays L1-resident.
pub type LowLatencyChannel<T> = Channel<T, 4096, 16>;

/// 64K slots per ring, 16 producers. Construct with [`Channel::boxed`].
pub type DefaultChannel<T> = Channel<T, 65536, 16>;

/// 256K slots per ring, 32 producers, for deep-backlog fan-in. Construct
/// with [`Channel::boxed`].
pub type HighThroughputChannel<T> = Channel<T, 262144, 32>;
