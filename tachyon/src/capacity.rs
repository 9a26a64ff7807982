//! Capacity rounding and slot-array allocation shared by both ring variants.

use crate::error::{Result, RingError};
use crate::trace::{debug, error};

/// Rounds `n` up to the next power of two, with a floor of 2.
///
/// Power-of-two sizing lets cursors wrap with `idx & mask` instead of a
/// division. Returns `None` if the result would not fit in `usize`.
#[inline]
pub const fn round_up_pow2(n: usize) -> Option<usize> {
    if n < 2 {
        return Some(2);
    }
    n.checked_next_power_of_two()
}

/// Rounds `requested` and maps overflow to [`RingError::CapacityOverflow`].
pub(crate) fn slot_count(requested: usize) -> Result<usize> {
    let slots = round_up_pow2(requested).ok_or(RingError::CapacityOverflow { requested })?;
    if slots != requested {
        debug!(requested, slots, "rounded ring capacity up to a power of two");
    }
    Ok(slots)
}

/// Allocates exactly `slots` entries, building entry `i` with `init(i)`.
///
/// This is the only place a ring allocates; failure is reported instead of
/// aborting so callers can refuse to start cleanly.
pub(crate) fn allocate_slots<S>(slots: usize, init: impl FnMut(usize) -> S) -> Result<Box<[S]>> {
    let mut buffer = Vec::new();
    if let Err(source) = buffer.try_reserve_exact(slots) {
        error!(slots, %source, "failed to allocate ring storage");
        return Err(RingError::Allocation { slots, source });
    }
    buffer.extend((0..slots).map(init));
    Ok(buffer.into_boxed_slice())
}
