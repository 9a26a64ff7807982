//! Bounded MPMC (Multi-Producer Multi-Consumer) queue.
//!
//! Unlike [`crate::sync::spsc`], any number of threads may push and pop
//! concurrently. Cursors are claimed by compare-and-swap and each slot carries
//! its own sequence counter, so there is no single-writer assumption to lean
//! on and no lock anywhere on the hot path.

mod ring;

pub use ring::MpmcRing;
