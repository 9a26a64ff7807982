//! Test-test-and-set spinlock with capped exponential backoff.
//!
//! For short critical sections where parking a thread in the kernel would cost
//! more than the section itself. Waiters first spin on a relaxed load and only
//! attempt the compare-and-swap once the lock looks free, so a held lock costs
//! its waiters reads from their own cache copy instead of a stream of
//! invalidating writes.
//!
//! The lock is neither reentrant nor fair. Locking twice from the same thread
//! deadlocks, and waiters are not served in arrival order.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tachyon::Spinlock;
//!
//! let counter = Arc::new(Spinlock::new(0u64));
//!
//! let handles: Vec<_> = (0..2)
//!     .map(|_| {
//!         let counter = Arc::clone(&counter);
//!         std::thread::spawn(move || {
//!             for _ in 0..1000 {
//!                 *counter.lock() += 1;
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for h in handles {
//!     h.join().unwrap();
//! }
//! assert_eq!(*counter.lock(), 2000);
//! ```

mod backoff;

pub use backoff::{Backoff, MAX_SPINS};

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// The bare lock word: `false` is free, `true` is held.
///
/// There is no owner tracking, so [`unlock`](Self::unlock) is `unsafe`. Use
/// [`Spinlock`] for a guard-based API.
pub struct RawSpinlock {
    locked: AtomicBool,
}

impl RawSpinlock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Spins until the lock is acquired.
    pub fn lock(&self) {
        let mut backoff = Backoff::new();
        loop {
            // Test: wait on a shared read while the lock is visibly held.
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }

            // Test-and-set: Acquire pairs with the Release in `unlock`.
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            backoff.snooze();
        }
    }

    /// Makes one acquisition attempt with no spinning.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the lock, publishing every write made while it was held.
    ///
    /// # Safety
    ///
    /// The calling context must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Advisory snapshot; may be stale by the time it returns.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for RawSpinlock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawSpinlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSpinlock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Data guarded by a [`RawSpinlock`].
pub struct Spinlock<T: ?Sized> {
    raw: RawSpinlock,
    data: UnsafeCell<T>,
}

// SAFETY: the lock hands out at most one &mut T at a time, so sharing the
// Spinlock only requires that T can move between threads.
unsafe impl<T: ?Sized + Send> Sync for Spinlock<T> {}
unsafe impl<T: ?Sized + Send> Send for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            raw: RawSpinlock::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Spinlock<T> {
    /// Spins until the lock is acquired and returns a guard that releases it
    /// on drop.
    #[inline]
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        self.raw.lock();
        SpinlockGuard { lock: self }
    }

    /// Returns a guard if the lock was free, without spinning.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        self.raw.try_lock().then(|| SpinlockGuard { lock: self })
    }

    /// Exclusive access without locking; `&mut self` already proves it.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl<T: Default> Default for Spinlock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for Spinlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spinlock")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// RAII guard for [`Spinlock`]; the lock is released when this is dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinlockGuard<'a, T: ?Sized> {
    lock: &'a Spinlock<T>,
}

impl<T: ?Sized> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the guard exists only while the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinlockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard exists only while the lock is held.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinlockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: this guard was created by a successful acquisition.
        unsafe { self.lock.raw.unlock() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    /// A plain, non-atomic counter protected only by a RawSpinlock.
    struct Counter {
        lock: RawSpinlock,
        value: UnsafeCell<u64>,
    }

    // SAFETY: `value` is only touched while `lock` is held.
    unsafe impl Sync for Counter {}

    #[test]
    fn test_raw_lock_unlock() {
        let lock = RawSpinlock::new();
        assert!(!lock.is_locked());

        lock.lock();
        assert!(lock.is_locked());
        assert!(!lock.try_lock());

        unsafe { lock.unlock() };
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }

    #[test]
    fn test_raw_mutual_exclusion() {
        let counter = Arc::new(Counter {
            lock: RawSpinlock::new(),
            value: UnsafeCell::new(0),
        });
        let threads = 4;
        let iters = 10_000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..iters {
                        counter.lock.lock();
                        unsafe { *counter.value.get() += 1 };
                        unsafe { counter.lock.unlock() };
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(unsafe { *counter.value.get() }, threads * iters);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = Spinlock::new(vec![1, 2]);
        {
            let mut guard = lock.lock();
            guard.push(3);
            assert!(lock.try_lock().is_none());
        }
        assert!(!lock.is_locked());
        assert_eq!(*lock.try_lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_try_lock_spin_until_free() {
        let lock = Arc::new(Spinlock::new(0u32));
        let guard = lock.lock();

        let contender = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                loop {
                    if let Some(mut g) = lock.try_lock() {
                        *g += 1;
                        break;
                    }
                    thread::yield_now();
                }
            })
        };

        thread::sleep(std::time::Duration::from_millis(10));
        drop(guard);
        contender.join().unwrap();
        assert_eq!(Arc::try_unwrap(lock).unwrap().into_inner(), 1);
    }

    #[test]
    fn test_get_mut_and_into_inner() {
        let mut lock = Spinlock::new(String::from("a"));
        lock.get_mut().push('b');
        assert_eq!(lock.into_inner(), "ab");
    }
}
