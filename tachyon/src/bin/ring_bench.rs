//! Queue and spinlock throughput / latency benchmark.
//!
//! Usage:
//!     cargo run --release --features bench --bin ring_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0          Pin producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2          Pin consumer to CPU 2 (default: 2)
//!     BENCH_CAPACITY=65536    Requested ring capacity (default: 65536)
//!     BENCH_ITERATIONS=N      Operations per run (default: 2^24)
//!     BENCH_THREADS=4         Producers and consumers each for MPMC (default: 4)

use std::env;
use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use minstant::Instant;

use tachyon::sync::spsc;
use tachyon::{MpmcRing, Spinlock};

type Payload = u64;

struct Settings {
    producer_cpu: Option<usize>,
    consumer_cpu: Option<usize>,
    capacity: usize,
    iterations: usize,
    threads: usize,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    fn from_env() -> Self {
        Self {
            producer_cpu: Some(env_or("PRODUCER_CPU", 0)),
            consumer_cpu: Some(env_or("CONSUMER_CPU", 2)),
            capacity: env_or("BENCH_CAPACITY", 1 << 16),
            iterations: env_or("BENCH_ITERATIONS", 1 << 24),
            threads: env_or("BENCH_THREADS", 4).max(1),
        }
    }
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn ops_per_ms(ops: usize, start: Instant) -> u128 {
    let nanos = start.elapsed().as_nanos().max(1);
    ops as u128 * 1_000_000 / nanos
}

/// Push then pop on one thread: the uncontended cost of the cursor protocol.
fn bench_spsc_single_thread(settings: &Settings) {
    let (producer, consumer) = spsc::channel::<Payload>(settings.capacity).unwrap();
    pin_to_cpu(settings.producer_cpu);

    let start = Instant::now();
    for i in 0..settings.iterations as Payload {
        while producer.try_push(i).is_err() {}
        while consumer.try_pop().is_none() {}
    }
    println!("  spsc push+pop:      {} ops/ms", ops_per_ms(settings.iterations, start));
}

fn bench_spsc_throughput(settings: &Settings) {
    let (producer, consumer) = spsc::channel::<Payload>(settings.capacity).unwrap();
    let iterations = settings.iterations;
    let consumer_cpu = settings.consumer_cpu;

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let consumer_thread = thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        for expected in 0..iterations as Payload {
            loop {
                if let Some(value) = consumer.try_pop() {
                    if value != expected {
                        panic!("Data corruption: expected {}, got {}", expected, value);
                    }
                    break;
                }
                hint::spin_loop();
            }
        }
    });

    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }
    pin_to_cpu(settings.producer_cpu);

    let start = Instant::now();
    for i in 0..iterations as Payload {
        while producer.try_push(i).is_err() {
            hint::spin_loop();
        }
    }
    consumer_thread.join().unwrap();
    println!("  spsc throughput:    {} ops/ms", ops_per_ms(iterations, start));
}

fn bench_spsc_batch_throughput(settings: &Settings) {
    const BATCH: usize = 64;

    let (producer, consumer) = spsc::channel::<Payload>(settings.capacity).unwrap();
    let iterations = settings.iterations;
    let consumer_cpu = settings.consumer_cpu;

    let consumer_thread = thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        let mut out = Vec::with_capacity(BATCH);
        let mut received = 0;
        while received < iterations {
            out.clear();
            let popped = consumer.pop_batch(&mut out, BATCH);
            if popped == 0 {
                hint::spin_loop();
            }
            received += popped;
        }
    });

    pin_to_cpu(settings.producer_cpu);

    let start = Instant::now();
    let mut items = 0..iterations as Payload;
    let mut pushed = 0;
    while pushed < iterations {
        let n = producer.push_iter(&mut items.by_ref().take(BATCH));
        pushed += n;
        if n == 0 {
            hint::spin_loop();
        }
    }
    consumer_thread.join().unwrap();
    println!("  spsc batch x{BATCH}:    {} ops/ms", ops_per_ms(iterations, start));
}

fn bench_spsc_rtt(settings: &Settings) {
    let (q1_producer, q1_consumer) = spsc::channel::<Payload>(settings.capacity).unwrap();
    let (q2_producer, q2_consumer) = spsc::channel::<Payload>(settings.capacity).unwrap();
    let iterations = settings.iterations;
    let consumer_cpu = settings.consumer_cpu;

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let responder = thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        for _ in 0..iterations {
            loop {
                if let Some(value) = q1_consumer.try_pop() {
                    while q2_producer.try_push(value).is_err() {
                        hint::spin_loop();
                    }
                    break;
                }
                hint::spin_loop();
            }
        }
    });

    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }
    pin_to_cpu(settings.producer_cpu);

    let start = Instant::now();
    for i in 0..iterations as Payload {
        while q1_producer.try_push(i).is_err() {
            hint::spin_loop();
        }
        while q2_consumer.try_pop().is_none() {
            hint::spin_loop();
        }
    }
    let elapsed = start.elapsed();
    responder.join().unwrap();

    let rtt_ns = elapsed.as_nanos() / iterations.max(1) as u128;
    println!("  spsc rtt:           {} ns", rtt_ns);
}

fn bench_mpmc_throughput(settings: &Settings) {
    let ring = Arc::new(MpmcRing::<Payload>::new(settings.capacity).unwrap());
    let threads = settings.threads;
    let per_producer = settings.iterations / threads;
    let total = per_producer * threads;

    let start = Instant::now();
    let producers: Vec<_> = (0..threads)
        .map(|_| {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..per_producer as Payload {
                    while ring.try_push(i).is_err() {
                        hint::spin_loop();
                    }
                }
            })
        })
        .collect();
    let consumers: Vec<_> = (0..threads)
        .map(|_| {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for _ in 0..per_producer {
                    while ring.try_pop().is_none() {
                        hint::spin_loop();
                    }
                }
            })
        })
        .collect();

    for handle in producers.into_iter().chain(consumers) {
        handle.join().unwrap();
    }
    println!(
        "  mpmc {threads}x{threads}:          {} ops/ms",
        ops_per_ms(total, start)
    );
}

fn bench_spinlock(settings: &Settings) {
    let counter = Arc::new(Spinlock::new(0u64));
    let threads = settings.threads;
    let per_thread = settings.iterations / threads / 16;

    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..per_thread {
                    *counter.lock() += 1;
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = per_thread * threads;
    assert_eq!(*counter.lock(), total as u64);
    println!(
        "  spinlock x{threads}:        {} lock/ms",
        ops_per_ms(total, start)
    );
}

fn main() {
    tachyon::init_tracing();
    let settings = Settings::from_env();

    println!(
        "tachyon (capacity={}, iters={}, threads={}):",
        settings.capacity, settings.iterations, settings.threads
    );
    bench_spsc_single_thread(&settings);
    bench_spsc_throughput(&settings);
    bench_spsc_batch_throughput(&settings);
    bench_spsc_rtt(&settings);
    bench_mpmc_throughput(&settings);
    bench_spinlock(&settings);
}
