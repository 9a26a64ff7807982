//! Lock-free SPSC queue for in-process (inter-thread) communication.
//!
//! A bounded queue over a heap-allocated ring buffer with atomic cursors.
//!
//! # Overview
//!
//! - [`Producer`] - Write end (single producer per queue)
//! - [`Consumer`] - Read end (single consumer per queue)
//! - No mutexes or syscalls in the hot path; every operation does bounded
//!   work and reports full/empty instead of waiting
//!
//! # Example
//!
//! ```
//! use tachyon::sync::spsc;
//!
//! let (producer, consumer) = spsc::channel::<u64>(1024)?;
//!
//! // Producer thread
//! producer.try_push(42).expect("queue full");
//!
//! // Consumer thread
//! assert_eq!(consumer.try_pop(), Some(42));
//! # Ok::<(), tachyon::RingError>(())
//! ```
//!
//! # Zero-copy access
//!
//! [`Producer::acquire_slot`] and [`Consumer::acquire_slot`] expose the next
//! slot in place so large values can be built or inspected without an extra
//! move. Publishing is a separate, explicit step, so a multi-field
//! construction pays for one release store rather than one per field.
//!
//! ```
//! use tachyon::sync::spsc;
//!
//! struct Quote { bid: u64, ask: u64 }
//!
//! let (mut producer, mut consumer) = spsc::channel::<Quote>(16)?;
//!
//! if let Some(slot) = producer.acquire_slot() {
//!     slot.write(Quote { bid: 99, ask: 101 });
//! }
//!
//! if let Some(quote) = consumer.acquire_slot() {
//!     assert_eq!(quote.ask - quote.bid, 2);
//!     quote.release();
//! }
//! # Ok::<(), tachyon::RingError>(())
//! ```
//!
//! # Teardown
//!
//! Elements still queued when both handles are dropped are leaked, not
//! dropped. Drain the queue first if `T` owns resources.

use std::cell::Cell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::error::Result;
use crate::spsc::ring::Ring;

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the SPSC queue.
///
/// # Thread Safety
///
/// `Producer` is [`Send`] but **not** [`Sync`]:
/// - Can transfer ownership to another thread
/// - Cannot share `&Producer` (no concurrent `try_push()`)
pub struct Producer<T: Send> {
    ring: Arc<Ring<T>>,
    _unsync: PhantomUnsync,
}

/// Read end of the SPSC queue.
///
/// See [`Producer`] for thread safety details (same semantics apply).
pub struct Consumer<T: Send> {
    ring: Arc<Ring<T>>,
    _unsync: PhantomUnsync,
}

/// Creates a new SPSC channel.
///
/// The ring gets `capacity` rounded up to a power of two slots, one of which
/// is kept empty to tell full from empty; [`Producer::capacity`] reports the
/// usable count. Requesting 8 yields 7 usable slots.
///
/// # Errors
///
/// Fails if the rounded capacity overflows `usize` or the slot array cannot
/// be allocated.
///
/// # Example
///
/// ```
/// use tachyon::sync::spsc;
///
/// let (tx, rx) = spsc::channel::<String>(16)?;
///
/// tx.try_push("hello".to_string()).unwrap();
/// assert_eq!(rx.try_pop(), Some("hello".to_string()));
/// # Ok::<(), tachyon::RingError>(())
/// ```
pub fn channel<T: Send>(capacity: usize) -> Result<(Producer<T>, Consumer<T>)> {
    let ring = Arc::new(Ring::new(capacity)?);

    let producer = Producer {
        ring: Arc::clone(&ring),
        _unsync: PhantomData,
    };

    let consumer = Consumer {
        ring,
        _unsync: PhantomData,
    };

    Ok((producer, consumer))
}

/// Builds a channel from a [`RingConfig`](crate::RingConfig).
pub fn channel_with_config<T: Send>(
    config: &crate::RingConfig,
) -> Result<(Producer<T>, Consumer<T>)> {
    channel(config.capacity)
}

impl<T: Send> Producer<T> {
    /// Attempts to push an item onto the queue. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full, allowing retry.
    #[inline]
    pub fn try_push(&self, item: T) -> std::result::Result<(), T> {
        // SAFETY: Producer is !Sync and unique, so this is the only producer.
        unsafe { self.ring.push(item) }
    }

    /// Clones items from the front of `items` until the queue fills.
    ///
    /// Returns how many were pushed; the rest are left for the caller. Not
    /// transactional: a partial batch stays queued.
    #[inline]
    pub fn push_batch(&self, items: &[T]) -> usize
    where
        T: Clone,
    {
        // SAFETY: Producer is !Sync and unique, so this is the only producer.
        unsafe { self.ring.push_slice(items) }
    }

    /// Moves items out of `items` until the queue fills or the iterator ends.
    ///
    /// An item is only pulled once there is room for it, so nothing is lost
    /// when the queue fills; the iterator resumes at the first unpushed item.
    #[inline]
    pub fn push_iter<I>(&self, items: &mut I) -> usize
    where
        I: Iterator<Item = T>,
    {
        // SAFETY: Producer is !Sync and unique, so this is the only producer.
        unsafe { self.ring.push_iter(items) }
    }

    /// Reserves the next vacant slot for in-place construction.
    ///
    /// Returns `None` if the queue is full. Nothing becomes visible to the
    /// consumer until the slot is written or committed.
    #[inline]
    pub fn acquire_slot(&mut self) -> Option<WriteSlot<'_, T>> {
        // SAFETY: Producer is !Sync and unique, so this is the only producer.
        let slot = unsafe { self.ring.acquire_producer_slot() }?;
        Some(WriteSlot {
            ring: &self.ring,
            slot,
            _producer: PhantomData,
        })
    }

    /// Usable capacity (slot count minus one).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Number of queued elements. Advisory: the consumer may be draining.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring.occupancy()
    }

    /// Advisory emptiness check.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advisory fullness check.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }
}

impl<T: Send> Consumer<T> {
    /// Attempts to pop an item from the queue. Never blocks.
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    #[must_use]
    pub fn try_pop(&self) -> Option<T> {
        // SAFETY: Consumer is !Sync and unique, so this is the only consumer.
        unsafe { self.ring.pop() }
    }

    /// Appends up to `max` items to `out`, oldest first.
    ///
    /// Returns how many were popped.
    #[inline]
    pub fn pop_batch(&self, out: &mut Vec<T>, max: usize) -> usize {
        // SAFETY: Consumer is !Sync and unique, so this is the only consumer.
        unsafe { self.ring.pop_into(out, max) }
    }

    /// Borrows the oldest element in place.
    ///
    /// Returns `None` if the queue is empty. The element stays queued until
    /// [`ReadSlot::release`] or [`ReadSlot::take`] is called.
    #[inline]
    pub fn acquire_slot(&mut self) -> Option<ReadSlot<'_, T>> {
        // SAFETY: Consumer is !Sync and unique, so this is the only consumer.
        let value = unsafe { self.ring.acquire_consumer_slot() }?;
        Some(ReadSlot {
            ring: &self.ring,
            value,
            _consumer: PhantomData,
        })
    }

    /// Usable capacity (slot count minus one).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Number of queued elements. Advisory: the producer may be filling.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring.occupancy()
    }

    /// Advisory emptiness check.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A reserved, not yet published producer slot.
///
/// Dropping it without writing or committing publishes nothing; the slot is
/// handed out again by the next [`Producer::acquire_slot`]. A value already
/// built in place through [`as_uninit_mut`](Self::as_uninit_mut) or
/// [`as_mut_ptr`](Self::as_mut_ptr) is then leaked: its destructor never runs
/// and the next write overwrites it.
pub struct WriteSlot<'a, T> {
    ring: &'a Ring<T>,
    slot: NonNull<MaybeUninit<T>>,
    _producer: PhantomData<&'a mut MaybeUninit<T>>,
}

impl<T> WriteSlot<'_, T> {
    /// Raw access for field-by-field construction.
    #[inline]
    pub fn as_uninit_mut(&mut self) -> &mut MaybeUninit<T> {
        // SAFETY: the slot is vacant and reserved for this producer until the
        // cursor is published, and `&mut self` prevents aliasing.
        unsafe { self.slot.as_mut() }
    }

    /// Pointer to the slot storage.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.slot.as_ptr().cast::<T>()
    }

    /// Stores `value` and publishes it to the consumer.
    #[inline]
    pub fn write(mut self, value: T) {
        self.as_uninit_mut().write(value);
        // SAFETY: the slot was initialized on the line above.
        unsafe { self.commit() }
    }

    /// Publishes an in-place construction.
    ///
    /// # Safety
    ///
    /// The slot must have been fully initialized through
    /// [`as_uninit_mut`](Self::as_uninit_mut) or [`as_mut_ptr`](Self::as_mut_ptr).
    #[inline]
    pub unsafe fn commit(self) {
        // SAFETY: caller guarantees initialization; the WriteSlot borrows the
        // unique Producer mutably, so no other producer call is in flight.
        unsafe { self.ring.commit_producer_slot() }
    }
}

/// The oldest queued element, borrowed in place.
///
/// Dropping it without calling [`release`](Self::release) or
/// [`take`](Self::take) leaves the element at the front of the queue.
pub struct ReadSlot<'a, T> {
    ring: &'a Ring<T>,
    value: NonNull<T>,
    _consumer: PhantomData<&'a mut T>,
}

impl<T> ReadSlot<'_, T> {
    /// Drops the element in place and hands the slot back to the producer.
    #[inline]
    pub fn release(self) {
        // SAFETY: the slot holds a published element owned by this consumer.
        // It is destroyed exactly once, before the slot is handed back.
        unsafe {
            ptr::drop_in_place(self.value.as_ptr());
            self.ring.release_consumer_slot();
        }
    }

    /// Moves the element out and hands the slot back to the producer.
    #[inline]
    pub fn take(self) -> T {
        // SAFETY: as in `release`, but ownership moves to the caller instead
        // of being dropped.
        unsafe {
            let value = ptr::read(self.value.as_ptr());
            self.ring.release_consumer_slot();
            value
        }
    }
}

impl<T> Deref for ReadSlot<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the slot holds a published, initialized element.
        unsafe { self.value.as_ref() }
    }
}

impl<T> DerefMut for ReadSlot<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the producer won't touch this slot until it is released.
        unsafe { self.value.as_mut() }
    }
}
