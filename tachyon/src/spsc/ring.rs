//! Core lock-free SPSC ring buffer algorithm.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────── line 0 ────────────────┐┌──────────────── line 1 ────────────────┐
//! │ tail (producer-owned) │ cached_head    ││ head (consumer-owned) │ cached_tail    │
//! └────────────────────────────────────────┘└────────────────────────────────────────┘
//!   mask │ buffer: [Slot<T>; mask + 1]
//! ```
//!
//! Both cursors live in `[0, slots)` and advance with `(idx + 1) & mask`.
//! `head == tail` means empty; `(tail - head) & mask == mask` means full, so
//! one slot is always left unused and usable capacity is `slots - 1`.
//!
//! # Ordering
//!
//! Each side reads its own cursor relaxed (it is the only writer), reads the
//! other side's cursor with `Acquire`, and publishes its own cursor with
//! `Release`. That single pair is the happens-before edge from "element
//! written" to "element read" and from "slot vacated" to "slot reused".
//!
//! Each side additionally keeps a private cached copy of the other side's
//! cursor and only pays the acquire load when the cache says full/empty.
//!
//! # Safety
//!
//! The methods here are `unsafe` because the caller must uphold the SPSC
//! invariant: producer-side methods are only ever called from one thread at a
//! time, and likewise for consumer-side methods. [`crate::sync::spsc`] enforces
//! this with non-`Sync` handles.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cache::{CachePadded, prefetch_read};
use crate::capacity::{allocate_slots, slot_count};
use crate::error::Result;
use crate::trace::warn;

/// Role marker: Fields with this role are owned exclusively by the producer.
pub struct ProducerRole;

/// Role marker: Fields with this role are owned exclusively by the consumer.
pub struct ConsumerRole;

/// Role marker: Buffer slots whose ownership transfers via the SPSC protocol.
pub struct SlotRole;

/// Interior-mutable cell with a role marker for nominal type safety.
///
/// The `Role` parameter has no runtime effect; it keeps producer-owned,
/// consumer-owned and slot cells from being mixed up at compile time.
#[repr(transparent)]
pub struct SpscCell<T, Role>(UnsafeCell<T>, PhantomData<Role>);

impl<T, Role> SpscCell<T, Role> {
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value), PhantomData)
    }

    #[inline]
    pub const fn get(&self) -> *mut T {
        self.0.get()
    }
}

// SAFETY: every SpscCell is touched by exactly one side at a time. Role caches
// are private to their side; slots are handed over by the Release/Acquire
// cursor protocol, so a slot is never written and read concurrently.
unsafe impl<T: Send, Role> Sync for SpscCell<T, Role> {}
unsafe impl<T: Send, Role> Send for SpscCell<T, Role> {}

/// Cache cell owned exclusively by the producer.
pub type ProducerCache<T> = SpscCell<T, ProducerRole>;

/// Cache cell owned exclusively by the consumer.
pub type ConsumerCache<T> = SpscCell<T, ConsumerRole>;

/// Buffer slot cell with ownership governed by the SPSC protocol.
pub type SlotCell<T> = SpscCell<T, SlotRole>;

/// Producer-side state: write cursor and cached read cursor.
#[repr(C)]
pub struct ProducerState {
    /// Next slot to produce into. Written only by the producer.
    pub tail: AtomicUsize,

    /// Last `head` value the producer observed.
    pub cached_head: ProducerCache<usize>,
}

impl ProducerState {
    pub const fn new() -> Self {
        Self {
            tail: AtomicUsize::new(0),
            cached_head: ProducerCache::new(0),
        }
    }
}

impl Default for ProducerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer-side state: read cursor and cached write cursor.
#[repr(C)]
pub struct ConsumerState {
    /// Next slot to consume from. Written only by the consumer.
    pub head: AtomicUsize,

    /// Last `tail` value the consumer observed.
    pub cached_tail: ConsumerCache<usize>,
}

impl ConsumerState {
    pub const fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
            cached_tail: ConsumerCache::new(0),
        }
    }
}

impl Default for ConsumerState {
    fn default() -> Self {
        Self::new()
    }
}

/// A single slot in the ring buffer. Holds a live `T` only between a publish
/// of `tail` past it and the matching publish of `head` past it.
#[repr(C)]
pub struct Slot<T> {
    pub value: SlotCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    const fn vacant() -> Self {
        Self {
            value: SlotCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Heap-backed SPSC ring with a power-of-two slot count fixed at construction.
#[repr(C)]
pub struct Ring<T> {
    /// Producer state (tail + cached head), alone on its cache line.
    pub producer: CachePadded<ProducerState>,

    /// Consumer state (head + cached tail), alone on its cache line.
    pub consumer: CachePadded<ConsumerState>,

    /// `slots - 1`; doubles as usable capacity.
    mask: usize,

    buffer: Box<[Slot<T>]>,
}

impl<T> Ring<T> {
    /// Allocates a ring whose slot count is `requested` rounded up to a power
    /// of two. Usable capacity is one less than the slot count.
    pub fn new(requested: usize) -> Result<Self> {
        let slots = slot_count(requested)?;
        let buffer = allocate_slots(slots, |_| Slot::vacant())?;
        Ok(Self {
            producer: CachePadded::new(ProducerState::new()),
            consumer: CachePadded::new(ConsumerState::new()),
            mask: slots - 1,
            buffer,
        })
    }

    /// Maximum number of elements that can be live at once.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.mask
    }

    #[inline]
    const fn next(&self, idx: usize) -> usize {
        (idx + 1) & self.mask
    }

    #[inline]
    const fn distance(&self, tail: usize, head: usize) -> usize {
        tail.wrapping_sub(head) & self.mask
    }

    #[inline]
    fn slot_ptr(&self, idx: usize) -> *mut MaybeUninit<T> {
        self.buffer[idx & self.mask].value.get()
    }

    /// Advisory occupancy from two relaxed loads. Exact only when called from
    /// a thread that is quiescent on both sides.
    #[inline]
    pub fn occupancy(&self) -> usize {
        let head = self.consumer.head.load(Ordering::Relaxed);
        let tail = self.producer.tail.load(Ordering::Relaxed);
        self.distance(tail, head)
    }

    /// Free slots as seen by the producer at `tail`, refreshing the cached
    /// head only when the cache shows fewer than `want` free.
    ///
    /// # Safety
    ///
    /// Producer side only.
    #[inline]
    unsafe fn producer_room(&self, tail: usize, want: usize) -> usize {
        // SAFETY: cached_head is private to the producer.
        let cached_head = unsafe { *self.producer.cached_head.get() };
        let room = self.mask - self.distance(tail, cached_head);
        if room >= want {
            return room;
        }

        let head = self.consumer.head.load(Ordering::Acquire);
        // SAFETY: cached_head is private to the producer.
        unsafe { *self.producer.cached_head.get() = head };
        self.mask - self.distance(tail, head)
    }

    /// Published elements as seen by the consumer at `head`, refreshing the
    /// cached tail only when the cache shows fewer than `want` available.
    ///
    /// # Safety
    ///
    /// Consumer side only.
    #[inline]
    unsafe fn consumer_available(&self, head: usize, want: usize) -> usize {
        // SAFETY: cached_tail is private to the consumer.
        let cached_tail = unsafe { *self.consumer.cached_tail.get() };
        let available = self.distance(cached_tail, head);
        if available >= want {
            return available;
        }

        let tail = self.producer.tail.load(Ordering::Acquire);
        // SAFETY: cached_tail is private to the consumer.
        unsafe { *self.consumer.cached_tail.get() = tail };
        self.distance(tail, head)
    }

    /// Attempts to push an item onto the queue.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full.
    ///
    /// # Safety
    ///
    /// Only one thread may act as producer at a time.
    #[inline]
    pub unsafe fn push(&self, item: T) -> std::result::Result<(), T> {
        let tail = self.producer.tail.load(Ordering::Relaxed);

        // SAFETY: we are the producer.
        if unsafe { self.producer_room(tail, 1) } == 0 {
            return Err(item);
        }

        // SAFETY: the room check shows the consumer has vacated slot `tail`,
        // and it cannot read it until we publish the new tail below.
        unsafe { ptr::write(self.slot_ptr(tail), MaybeUninit::new(item)) };

        self.producer.tail.store(self.next(tail), Ordering::Release);
        Ok(())
    }

    /// Attempts to pop an item from the queue.
    ///
    /// # Safety
    ///
    /// Only one thread may act as consumer at a time.
    #[inline]
    pub unsafe fn pop(&self) -> Option<T> {
        let head = self.consumer.head.load(Ordering::Relaxed);

        // SAFETY: we are the consumer.
        if unsafe { self.consumer_available(head, 1) } == 0 {
            return None;
        }

        // SAFETY: the acquire load of tail (now or when cached) happened after
        // the producer's release store covering slot `head`, so the value is
        // initialized. The producer won't touch it until we publish head.
        let item = unsafe { ptr::read(self.slot_ptr(head)).assume_init() };

        self.consumer.head.store(self.next(head), Ordering::Release);
        Some(item)
    }

    /// Clones up to `items.len()` elements in, stopping when the ring fills.
    /// Pays at most one acquire and exactly one release for the whole batch.
    ///
    /// # Safety
    ///
    /// Producer side only.
    pub unsafe fn push_slice(&self, items: &[T]) -> usize
    where
        T: Clone,
    {
        let mut tail = self.producer.tail.load(Ordering::Relaxed);
        // SAFETY: we are the producer.
        let count = unsafe { self.producer_room(tail, items.len()) }.min(items.len());
        if count == 0 {
            return 0;
        }

        for item in &items[..count] {
            // SAFETY: all `count` slots from tail onward are vacant per the
            // room check and invisible to the consumer until the store below.
            unsafe { ptr::write(self.slot_ptr(tail), MaybeUninit::new(item.clone())) };
            tail = self.next(tail);
        }

        self.producer.tail.store(tail, Ordering::Release);
        count
    }

    /// Pulls items from `items` while there is room, never pulling one it
    /// cannot store. Publishes once at the end.
    ///
    /// # Safety
    ///
    /// Producer side only.
    pub unsafe fn push_iter<I>(&self, items: &mut I) -> usize
    where
        I: Iterator<Item = T>,
    {
        let start = self.producer.tail.load(Ordering::Relaxed);
        let mut tail = start;
        let mut pushed = 0;

        loop {
            // SAFETY: we are the producer. Room is measured against the
            // unpublished local tail, which already accounts for this batch.
            if unsafe { self.producer_room(tail, 1) } == 0 {
                break;
            }
            let Some(item) = items.next() else { break };
            // SAFETY: slot `tail` is vacant and not yet visible to the consumer.
            unsafe { ptr::write(self.slot_ptr(tail), MaybeUninit::new(item)) };
            tail = self.next(tail);
            pushed += 1;
        }

        if tail != start {
            self.producer.tail.store(tail, Ordering::Release);
        }
        pushed
    }

    /// Moves up to `max` elements into `out`. Pays at most one acquire and
    /// exactly one release for the whole batch.
    ///
    /// # Safety
    ///
    /// Consumer side only.
    pub unsafe fn pop_into(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut head = self.consumer.head.load(Ordering::Relaxed);
        // SAFETY: we are the consumer.
        let count = unsafe { self.consumer_available(head, max) }.min(max);
        if count == 0 {
            return 0;
        }

        out.reserve(count);
        for _ in 0..count {
            let next = self.next(head);
            prefetch_read(self.slot_ptr(next));
            // SAFETY: the `count` slots from head onward are published.
            out.push(unsafe { ptr::read(self.slot_ptr(head)).assume_init() });
            head = next;
        }

        self.consumer.head.store(head, Ordering::Release);
        count
    }

    /// Returns the next vacant slot without publishing anything.
    ///
    /// # Safety
    ///
    /// Producer side only. The slot stays reserved until
    /// [`commit_producer_slot`](Self::commit_producer_slot).
    #[inline]
    pub unsafe fn acquire_producer_slot(&self) -> Option<NonNull<MaybeUninit<T>>> {
        let tail = self.producer.tail.load(Ordering::Relaxed);
        // SAFETY: we are the producer.
        if unsafe { self.producer_room(tail, 1) } == 0 {
            return None;
        }
        NonNull::new(self.slot_ptr(tail))
    }

    /// Publishes the slot returned by the last successful
    /// [`acquire_producer_slot`](Self::acquire_producer_slot).
    ///
    /// # Safety
    ///
    /// Producer side only, and the slot must have been acquired and fully
    /// initialized.
    #[inline]
    pub unsafe fn commit_producer_slot(&self) {
        let tail = self.producer.tail.load(Ordering::Relaxed);
        self.producer.tail.store(self.next(tail), Ordering::Release);
    }

    /// Returns the oldest published element in place without consuming it.
    ///
    /// # Safety
    ///
    /// Consumer side only.
    #[inline]
    pub unsafe fn acquire_consumer_slot(&self) -> Option<NonNull<T>> {
        let head = self.consumer.head.load(Ordering::Relaxed);
        // SAFETY: we are the consumer.
        if unsafe { self.consumer_available(head, 1) } == 0 {
            return None;
        }
        NonNull::new(self.slot_ptr(head).cast::<T>())
    }

    /// Hands the slot at `head` back to the producer.
    ///
    /// # Safety
    ///
    /// Consumer side only. The slot must have been acquired and its element
    /// already moved out or dropped; this does not run its destructor.
    #[inline]
    pub unsafe fn release_consumer_slot(&self) {
        let head = self.consumer.head.load(Ordering::Relaxed);
        self.consumer.head.store(self.next(head), Ordering::Release);
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Owners are required to drain before teardown. Leftover elements are
        // leaked, not dropped.
        let leaked = self.occupancy();
        if leaked != 0 {
            warn!(leaked, "spsc ring dropped with undrained elements");
        }
    }
}

// SAFETY: Ring is Send because every field is Send for T: Send.
unsafe impl<T: Send> Send for Ring<T> {}

// SAFETY: Ring is Sync because concurrent access is mediated by atomics:
// - head/tail are AtomicUsize with Release/Acquire ordering
// - Buffer slots are protected by the SPSC invariant (see SpscCell)
unsafe impl<T: Send> Sync for Ring<T> {}
