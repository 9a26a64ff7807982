//! Bounded, lock-free, intra-process message passing.
//!
//! - [`sync::spsc`] - single-producer/single-consumer queue split into
//!   [`Producer`](sync::spsc::Producer) and [`Consumer`](sync::spsc::Consumer)
//!   handles, with batch and zero-copy slot access
//! - [`MpmcRing`] - multi-producer/multi-consumer queue with per-slot sequence
//!   counters
//! - [`Spinlock`] - test-test-and-set lock with backoff for short critical
//!   sections outside the queues
//!
//! Queue operations never block and never allocate: a full queue hands the
//! value back, an empty one returns `None`. The only fallible step is
//! construction, which reports [`RingError`].

pub mod cache;
pub mod capacity;
pub mod config;
pub mod error;
pub mod mpmc;
pub mod spinlock;
mod spsc;
pub mod sync;
mod trace;

pub use config::RingConfig;
pub use error::{Result, RingError};
pub use mpmc::MpmcRing;
pub use spinlock::{Backoff, RawSpinlock, Spinlock, SpinlockGuard};
pub use trace::init_tracing;
