//! Core lock-free MPMC ring buffer algorithm.
//!
//! # Algorithm
//!
//! Based on Dmitry Vyukov's bounded MPMC queue:
//!
//! - Each slot has an atomic sequence number, initially its own index
//! - A producer at position `pos` may write slot `pos & mask` only once
//!   `seq == pos`; it claims `pos` by CAS on `tail`, writes, then publishes
//!   `seq = pos + 1`
//! - A consumer at position `pos` may read slot `pos & mask` only once
//!   `seq == pos + 1`; it claims `pos` by CAS on `head`, reads, then releases
//!   the slot to the next lap with `seq = pos + capacity`
//! - `seq` behind the expected value means full (producer) or empty
//!   (consumer); ahead means another thread already claimed the position
//!
//! The cursor CASes are relaxed: the per-slot sequence carries the
//! Release/Acquire edge between writer and reader. Sequences only grow (mod
//! 2^64), so a stale observation can never be mistaken for a current one.
//!
//! Lock-free, not wait-free: under sustained contention a single thread can
//! keep losing the CAS and retry indefinitely.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cache::CachePadded;
use crate::capacity::{allocate_slots, slot_count};
use crate::config::RingConfig;
use crate::error::Result;
use crate::trace::warn;

/// A slot in the MPMC ring buffer with sequence number for synchronization.
#[repr(C)]
#[repr(align(64))] // Each slot on its own cache line to avoid false sharing between neighbours
struct Slot<T> {
    /// Sequence number for synchronization.
    /// - Initial: slot index (0, 1, 2, ..., N-1)
    /// - After producer write: position + 1 (signals "data ready")
    /// - After consumer read: position + N (signals "slot free")
    seq: AtomicUsize,

    /// The actual data stored in this slot.
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    const fn new(seq: usize) -> Self {
        Self {
            seq: AtomicUsize::new(seq),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Bounded multi-producer multi-consumer queue.
///
/// Share it between threads with an [`Arc`](std::sync::Arc); every method
/// takes `&self`.
///
/// # Ordering
///
/// An element popped by a consumer was fully constructed before that pop
/// observed it. There is no FIFO guarantee across producers: two producers
/// racing for consecutive positions are ordered by whoever wins the CAS.
///
/// # Teardown
///
/// Elements still queued on drop are leaked, not dropped. Drain first if `T`
/// owns resources.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tachyon::MpmcRing;
///
/// let ring = Arc::new(MpmcRing::<u32>::new(16)?);
///
/// let producer = {
///     let ring = Arc::clone(&ring);
///     std::thread::spawn(move || {
///         for i in 0..8 {
///             while ring.try_push(i).is_err() {
///                 std::hint::spin_loop();
///             }
///         }
///     })
/// };
/// producer.join().unwrap();
///
/// let mut seen = Vec::new();
/// ring.pop_batch(&mut seen, 16);
/// assert_eq!(seen, (0..8).collect::<Vec<_>>());
/// # Ok::<(), tachyon::RingError>(())
/// ```
pub struct MpmcRing<T> {
    /// Next position to claim for writing.
    tail: CachePadded<AtomicUsize>,

    /// Next position to claim for reading.
    head: CachePadded<AtomicUsize>,

    mask: usize,

    buffer: Box<[Slot<T>]>,
}

impl<T> MpmcRing<T> {
    /// Allocates a ring of `capacity` rounded up to a power of two. All slots
    /// are usable.
    ///
    /// # Errors
    ///
    /// Fails if the rounded capacity overflows `usize` or the slot array
    /// cannot be allocated.
    pub fn new(capacity: usize) -> Result<Self> {
        let slots = slot_count(capacity)?;
        let buffer = allocate_slots(slots, Slot::new)?;
        Ok(Self {
            tail: CachePadded::new(AtomicUsize::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
            mask: slots - 1,
            buffer,
        })
    }

    /// Builds a ring from a [`RingConfig`].
    pub fn with_config(config: &RingConfig) -> Result<Self> {
        Self::new(config.capacity)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline]
    fn slot(&self, pos: usize) -> &Slot<T> {
        &self.buffer[pos & self.mask]
    }

    /// Claims a slot and only then runs `make` to build the element in it.
    ///
    /// # Errors
    ///
    /// Returns `Err(make)` unrun if the queue is full.
    ///
    /// # Panics
    ///
    /// If `make` panics the claimed slot is never published and consumers
    /// stall at that position. Constructors passed here must not panic.
    pub fn try_emplace<F>(&self, make: F) -> std::result::Result<(), F>
    where
        F: FnOnce() -> T,
    {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = self.slot(pos);
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: We have exclusive write access because:
                        // - CAS succeeded, so no other producer holds `pos`
                        // - seq == pos means the previous lap's consumer
                        //   has released the slot
                        unsafe { (*slot.value.get()).write(make()) };
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    // Another producer moved tail; retry from its value.
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // seq < pos: the slot still holds last lap's element.
                return Err(make);
            } else {
                // seq > pos: someone already claimed this position.
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempts to push an item onto the queue. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full.
    #[inline]
    pub fn try_push(&self, item: T) -> std::result::Result<(), T> {
        self.try_emplace(move || item).map_err(|make| make())
    }

    /// Attempts to pop an item from the queue. Never blocks.
    ///
    /// Returns `None` if the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = self.slot(pos);
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: CAS succeeded, so this consumer alone holds
                        // `pos`; seq == pos + 1 was published with Release
                        // after the producer finished writing.
                        let item = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq.store(pos.wrapping_add(self.capacity()), Ordering::Release);
                        return Some(item);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // seq < pos + 1: nothing published here yet.
                return None;
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Clones items from the front of `items` until the queue fills.
    ///
    /// Each clone happens only after its slot is claimed. Returns how many
    /// were pushed; a partial batch stays queued.
    pub fn push_batch(&self, items: &[T]) -> usize
    where
        T: Clone,
    {
        items
            .iter()
            .take_while(|&item| self.try_emplace(|| item.clone()).is_ok())
            .count()
    }

    /// Appends up to `max` items to `out`. Returns how many were popped.
    pub fn pop_batch(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut popped = 0;
        while popped < max {
            let Some(item) = self.try_pop() else { break };
            out.push(item);
            popped += 1;
        }
        popped
    }

    /// Advisory: may be stale under concurrent use.
    #[inline]
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head == tail
    }

    /// Advisory: may report `false` while producers are racing to fill the
    /// last slot.
    #[inline]
    pub fn is_full(&self) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let seq = self.slot(tail).seq.load(Ordering::Acquire);
        (seq.wrapping_sub(tail) as isize) < 0
    }

    /// Advisory element count, clamped to `[0, capacity]`.
    #[inline]
    pub fn approximate_size(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        let diff = tail.wrapping_sub(head) as isize;
        (diff.max(0) as usize).min(self.capacity())
    }
}

impl<T> Drop for MpmcRing<T> {
    fn drop(&mut self) {
        let leaked = self.approximate_size();
        if leaked != 0 {
            warn!(leaked, "mpmc ring dropped with undrained elements");
        }
    }
}

// SAFETY: MpmcRing is Send because all fields are Send for T: Send.
unsafe impl<T: Send> Send for MpmcRing<T> {}

// SAFETY: MpmcRing is Sync because concurrent access is mediated by atomics:
// - Producers and consumers claim positions by CAS on tail/head
// - Per-slot sequence numbers give each claimed slot a single owner and
//   carry the Release/Acquire edge between its writer and reader
unsafe impl<T: Send> Sync for MpmcRing<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn test_single_thread_push_pop() {
        let ring: MpmcRing<u64> = MpmcRing::new(8).unwrap();
        assert!(ring.is_empty());
        assert!(!ring.is_full());

        for i in 0..8 {
            assert!(ring.try_push(i).is_ok());
        }

        for i in 0..8 {
            assert_eq!(ring.try_pop(), Some(i));
        }

        assert!(ring.is_empty());
        assert_eq!(ring.try_pop(), None);
    }

    #[test]
    fn test_queue_full() {
        let ring: MpmcRing<u64> = MpmcRing::new(4).unwrap();

        for i in 1..=4 {
            assert!(ring.try_push(i).is_ok());
        }
        assert!(ring.is_full());
        assert_eq!(ring.approximate_size(), 4);
        assert_eq!(ring.try_push(5), Err(5));

        assert_eq!(ring.try_pop(), Some(1));
        assert!(ring.try_push(5).is_ok());
        assert_eq!(ring.try_push(6), Err(6));
    }

    #[test]
    fn test_capacity_rounds_up() {
        assert_eq!(MpmcRing::<u8>::new(5).unwrap().capacity(), 8);
        assert_eq!(MpmcRing::<u8>::new(16).unwrap().capacity(), 16);
        assert_eq!(MpmcRing::<u8>::new(1).unwrap().capacity(), 2);
        assert_eq!(
            MpmcRing::<u8>::with_config(&RingConfig::default())
                .unwrap()
                .capacity(),
            1024
        );
    }

    #[test]
    fn test_sequence_laps() {
        let ring: MpmcRing<usize> = MpmcRing::new(2).unwrap();

        for lap in 0..5 {
            assert!(ring.try_push(lap).is_ok());
            assert!(ring.try_push(lap + 100).is_ok());
            assert_eq!(ring.try_pop(), Some(lap));
            assert_eq!(ring.try_pop(), Some(lap + 100));
        }

        // After 5 laps slot 0 has been released for position 10.
        assert_eq!(ring.buffer[0].seq.load(Ordering::Relaxed), 10);
        assert_eq!(ring.buffer[1].seq.load(Ordering::Relaxed), 11);
    }

    #[test]
    fn test_emplace_not_run_when_full() {
        let ring: MpmcRing<String> = MpmcRing::new(2).unwrap();
        let ran = AtomicBool::new(false);

        assert!(ring.try_push("a".into()).is_ok());
        assert!(ring.try_push("b".into()).is_ok());
        let rejected = ring.try_emplace(|| {
            ran.store(true, Ordering::Relaxed);
            "c".to_string()
        });

        assert!(rejected.is_err());
        assert!(!ran.load(Ordering::Relaxed));
    }

    #[test]
    fn test_batch_interfaces() {
        let ring: MpmcRing<i32> = MpmcRing::new(16).unwrap();
        let src: Vec<i32> = (0..8).collect();

        assert_eq!(ring.push_batch(&src), 8);

        let mut dst = Vec::new();
        assert_eq!(ring.pop_batch(&mut dst, 8), 8);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_batch_partial_when_full() {
        let ring: MpmcRing<i32> = MpmcRing::new(4).unwrap();
        let src: Vec<i32> = (0..6).collect();

        assert_eq!(ring.push_batch(&src), 4);

        let mut dst = Vec::new();
        assert_eq!(ring.pop_batch(&mut dst, 10), 4);
        assert_eq!(dst, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_multiple_producers() {
        let ring: Arc<MpmcRing<u64>> = Arc::new(MpmcRing::new(64).unwrap());
        let num_producers = 4;
        let items_per_producer = 10;

        let mut handles = vec![];

        for p in 0..num_producers {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                for i in 0..items_per_producer {
                    let value = (p * 100 + i) as u64;
                    while ring.try_push(value).is_err() {
                        thread::yield_now();
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let mut items = vec![];
        while let Some(item) = ring.try_pop() {
            items.push(item);
        }

        assert_eq!(items.len(), num_producers * items_per_producer);
        for p in 0..num_producers {
            for i in 0..items_per_producer {
                let expected = (p * 100 + i) as u64;
                assert!(items.contains(&expected), "Missing value {expected}");
            }
        }
    }

    #[test]
    fn test_multiple_consumers() {
        let ring: Arc<MpmcRing<u64>> = Arc::new(MpmcRing::new(1024).unwrap());
        for i in 0..1000 {
            ring.try_push(i).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    let mut local = Vec::new();
                    while let Some(item) = ring.try_pop() {
                        local.push(item);
                    }
                    local
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for item in h.join().unwrap() {
                assert!(seen.insert(item), "duplicate value {item}");
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_per_producer_order_preserved() {
        let ring: Arc<MpmcRing<(usize, u64)>> = Arc::new(MpmcRing::new(8).unwrap());
        let per_producer = 5_000u64;

        let producers: Vec<_> = (0..2)
            .map(|p| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        while ring.try_push((p, i)).is_err() {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let mut next = [0u64; 2];
        while next.iter().any(|&n| n < per_producer) {
            if let Some((p, i)) = ring.try_pop() {
                assert_eq!(i, next[p], "producer {p} reordered");
                next[p] += 1;
            } else {
                thread::yield_now();
            }
        }

        for h in producers {
            h.join().unwrap();
        }
    }
}
