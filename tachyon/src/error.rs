//! Construction-time errors.
//!
//! Steady-state push/pop never produce these: a full queue hands the value
//! back and an empty queue returns `None`. Only acquiring backing storage can
//! fail.

use std::collections::TryReserveError;

use thiserror::Error;

/// Result alias for ring construction.
pub type Result<T> = std::result::Result<T, RingError>;

/// Errors raised while building a ring buffer.
#[derive(Debug, Error)]
pub enum RingError {
    /// No power of two at or above the requested capacity fits in `usize`.
    #[error("requested capacity {requested} cannot be rounded up to a power of two")]
    CapacityOverflow { requested: usize },
    /// The allocator refused the slot array.
    #[error("failed to allocate storage for {slots} slots: {source}")]
    Allocation {
        slots: usize,
        #[source]
        source: TryReserveError,
    },
}
