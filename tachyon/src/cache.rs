//! Cache-line sizing and false-sharing avoidance.
//!
//! Hot cursors written by different threads must never share a coherence unit,
//! otherwise every producer store invalidates the line the consumer is reading
//! (and vice versa). [`CachePadded`] forces its contents onto a line of its own.

use std::fmt;
use std::ops::{Deref, DerefMut};

/// Assumed size of a cache line in bytes.
///
/// 64 bytes holds for every x86-64 and most AArch64 parts in use today.
pub const CACHE_LINE_SIZE: usize = 64;

/// Aligns and pads `T` to a full cache line.
///
/// The `align` literal must stay in sync with [`CACHE_LINE_SIZE`]; a
/// compile-time assertion below enforces it.
#[repr(C, align(64))]
#[derive(Default)]
pub struct CachePadded<T> {
    value: T,
}

const _: () = assert!(std::mem::align_of::<CachePadded<u8>>() == CACHE_LINE_SIZE);
const _: () = assert!(std::mem::size_of::<CachePadded<u8>>() == CACHE_LINE_SIZE);

impl<T> CachePadded<T> {
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for CachePadded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePadded")
            .field("value", &self.value)
            .finish()
    }
}

/// Hints the CPU to pull the line containing `ptr` into cache for reading.
///
/// Purely advisory: never faults, and is a no-op on targets without a stable
/// prefetch intrinsic.
#[inline(always)]
#[allow(unused_unsafe)]
pub fn prefetch_read<T>(ptr: *const T) {
    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::x86_64::{_MM_HINT_T0, _mm_prefetch};
        // SAFETY: prefetch never dereferences the pointer and cannot fault,
        // even for dangling or null addresses. SSE is baseline on x86-64.
        unsafe { _mm_prefetch::<_MM_HINT_T0>(ptr.cast::<i8>()) };
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = ptr;
}

/// Hints the CPU to pull the line containing `ptr` into cache ahead of a write.
///
/// x86-64 has no stable write-intent hint, so this issues the same T0
/// prefetch as [`prefetch_read`].
#[inline(always)]
pub fn prefetch_write<T>(ptr: *mut T) {
    prefetch_read(ptr.cast_const());
}
