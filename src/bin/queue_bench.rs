//! Blocking task queue throughput benchmark.
//!
//! Usage:
//!     cargo run --release --bin queue_bench
//!
//! Environment variables:
//!     PRODUCERS=2    Number of producer threads (default: 2)
//!     CONSUMERS=2    Number of consumer threads (default: 2)
//!     ITEMS=1048576  Items per producer (default: 1 << 20)
//!     CAPACITY=1024  Queue capacity, 0 = unbounded (default: 1024)
//!     PIN_CPUS=1     Pin worker threads to distinct cores

use std::env;
use std::thread;
use std::time::Instant;

use core_affinity::CoreId;
use hopper::TaskQueue;

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn pin_to_cpu(core: Option<CoreId>) {
    if let Some(id) = core {
        core_affinity::set_for_current(id);
    }
}

fn main() {
    hopper::init_tracing();

    let producers = env_usize("PRODUCERS", 2);
    let consumers = env_usize("CONSUMERS", 2);
    let items = env_usize("ITEMS", 1 << 20);
    let capacity = env_usize("CAPACITY", 1024);
    let pin = env::var("PIN_CPUS").is_ok();

    let cores = if pin {
        core_affinity::get_core_ids().unwrap_or_default()
    } else {
        Vec::new()
    };
    let core_for = |slot: usize| -> Option<CoreId> {
        if cores.is_empty() {
            None
        } else {
            Some(cores[slot % cores.len()])
        }
    };

    let queue: TaskQueue<u64> = TaskQueue::new(capacity);
    let total = producers * items;

    println!(
        "hopper TaskQueue (capacity={capacity}, producers={producers}, \
         consumers={consumers}, items/producer={items}):"
    );

    let start = Instant::now();

    let mut producer_handles = Vec::with_capacity(producers);
    for p in 0..producers {
        let queue = queue.clone();
        let core = core_for(p);
        producer_handles.push(thread::spawn(move || {
            pin_to_cpu(core);
            for i in 0..items {
                queue.put((p * items + i) as u64);
            }
        }));
    }

    // Split the total evenly; the first `total % consumers` threads take one extra.
    let share = total / consumers;
    let extra = total % consumers;
    let mut consumer_handles = Vec::with_capacity(consumers);
    for c in 0..consumers {
        let queue = queue.clone();
        let core = core_for(producers + c);
        let n = share + usize::from(c < extra);
        consumer_handles.push(thread::spawn(move || {
            pin_to_cpu(core);
            let mut sum = 0u64;
            for _ in 0..n {
                sum = sum.wrapping_add(queue.get());
                queue.task_done().expect("one task_done per get");
            }
            sum
        }));
    }

    for h in producer_handles {
        h.join().expect("producer thread panicked");
    }
    queue.join();

    let mut checksum = 0u64;
    for h in consumer_handles {
        checksum = checksum.wrapping_add(h.join().expect("consumer thread panicked"));
    }

    let elapsed = start.elapsed();
    let ops_per_ms = total as u128 * 1_000_000 / elapsed.as_nanos();
    println!("{total} items in {elapsed:?} ({ops_per_ms} ops/ms, checksum {checksum:x})");
}
