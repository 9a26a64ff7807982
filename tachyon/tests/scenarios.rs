//! End-to-end scenarios for the queues and the spinlock.
//!
//! # Running with tracing
//!
//! ```bash
//! RUST_LOG=tachyon=debug cargo test --features tracing --test scenarios -- --nocapture
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;

use tachyon::sync::spsc;
use tachyon::{MpmcRing, RawSpinlock, Spinlock};

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        tachyon::init_tracing();
    });
}

/// Requesting 8 slots leaves 7 usable; the 8th push is refused.
#[test]
fn spsc_capacity_eight_holds_seven() {
    init_test_tracing();
    let (producer, consumer) = spsc::channel::<u32>(8).unwrap();
    assert_eq!(producer.capacity(), 7);

    for i in 0..7 {
        assert!(producer.try_push(i).is_ok(), "push {i} should succeed");
    }
    assert_eq!(producer.try_push(7), Err(7));

    for i in 0..7 {
        assert_eq!(consumer.try_pop(), Some(i));
    }
    assert!(consumer.is_empty());
    assert_eq!(consumer.try_pop(), None);
}

/// Four producers push 1000 tagged values each through a 16-slot ring while
/// four consumers drain it; every value arrives exactly once.
#[test]
fn mpmc_four_by_four_no_loss_no_duplicates() {
    init_test_tracing();
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 1000;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let ring = Arc::new(MpmcRing::<usize>::new(16).unwrap());
    assert_eq!(ring.capacity(), 16);

    let start = Arc::new(AtomicBool::new(false));
    let consumed = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let ring = Arc::clone(&ring);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                while !start.load(Ordering::Acquire) {
                    thread::yield_now();
                }
                for i in 0..PER_PRODUCER {
                    let value = p * PER_PRODUCER + i;
                    while ring.try_push(value).is_err() {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let ring = Arc::clone(&ring);
            let start = Arc::clone(&start);
            let consumed = Arc::clone(&consumed);
            thread::spawn(move || {
                while !start.load(Ordering::Acquire) {
                    thread::yield_now();
                }
                let mut local = Vec::new();
                while consumed.load(Ordering::Relaxed) < TOTAL {
                    if let Some(value) = ring.try_pop() {
                        local.push(value);
                        consumed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        thread::yield_now();
                    }
                }
                local
            })
        })
        .collect();

    start.store(true, Ordering::Release);

    for h in producers {
        h.join().unwrap();
    }

    let mut seen = HashSet::with_capacity(TOTAL);
    for h in consumers {
        for value in h.join().unwrap() {
            assert!(seen.insert(value), "value {value} consumed twice");
        }
    }

    assert_eq!(seen.len(), TOTAL);
    assert!((0..TOTAL).all(|v| seen.contains(&v)));
    assert!(ring.is_empty());
}

/// Two threads increment a plain counter 1000 times each under the lock.
#[test]
fn spinlock_two_threads_count_to_two_thousand() {
    init_test_tracing();
    let counter = Arc::new(Spinlock::new(0u64));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..1000 {
                    *counter.lock() += 1;
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*counter.lock(), 2000);
}

/// The raw lock also protects data it does not own.
#[test]
fn raw_spinlock_guards_external_state() {
    struct Shared {
        lock: RawSpinlock,
        log: std::cell::UnsafeCell<Vec<(usize, usize)>>,
    }
    // SAFETY: `log` is only accessed while `lock` is held.
    unsafe impl Sync for Shared {}

    const THREADS: usize = 8;
    const ITERS: usize = 500;

    let shared = Arc::new(Shared {
        lock: RawSpinlock::new(),
        log: std::cell::UnsafeCell::new(Vec::new()),
    });

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for i in 0..ITERS {
                    shared.lock.lock();
                    unsafe { (*shared.log.get()).push((t, i)) };
                    unsafe { shared.lock.unlock() };
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let log = unsafe { &*shared.log.get() };
    assert_eq!(log.len(), THREADS * ITERS);
    for t in 0..THREADS {
        let mine: Vec<_> = log
            .iter()
            .filter(|(owner, _)| *owner == t)
            .map(|&(_, i)| i)
            .collect();
        assert!(mine.iter().copied().eq(0..ITERS));
    }
}

/// Cross-thread SPSC hand-off preserves order under constant full/empty
/// transitions on a tiny ring.
#[test]
fn spsc_fifo_across_threads_tiny_ring() {
    init_test_tracing();
    let (producer, consumer) = spsc::channel::<u64>(2).unwrap();
    let count = 20_000u64;

    let handle = thread::spawn(move || {
        for i in 0..count {
            let mut item = i;
            loop {
                match producer.try_push(item) {
                    Ok(()) => break,
                    Err(back) => {
                        item = back;
                        thread::yield_now();
                    }
                }
            }
        }
    });

    let mut expected = 0;
    while expected < count {
        if let Some(value) = consumer.try_pop() {
            assert_eq!(value, expected);
            expected += 1;
        } else {
            thread::yield_now();
        }
    }
    handle.join().unwrap();
}

/// Each element's payload is fully visible to the consumer that pops it.
#[test]
fn mpmc_publishes_whole_payload() {
    let ring = Arc::new(MpmcRing::<[u64; 8]>::new(32).unwrap());
    let per_producer = 5_000u64;

    let producers: Vec<_> = (0..2)
        .map(|p| {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..per_producer {
                    let tag = p * per_producer + i;
                    while ring.try_emplace(|| [tag; 8]).is_err() {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let mut received = 0;
    while received < 2 * per_producer {
        if let Some(payload) = ring.try_pop() {
            assert!(payload.iter().all(|&w| w == payload[0]), "torn payload {payload:?}");
            received += 1;
        } else {
            thread::yield_now();
        }
    }

    for h in producers {
        h.join().unwrap();
    }
}
