//! Throughput of the blocking queues under contention

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use weft_rs::queue::{BoundedQueue, PriorityQueue};

const ITEMS: u64 = 10_000;

fn bounded_round_trip(producers: usize, capacity: usize) -> u64 {
    let queue = Arc::new(BoundedQueue::new(capacity));
    let per_producer = ITEMS / producers as u64;

    let handles: Vec<_> = (0..producers)
        .map(|_| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..per_producer {
                    queue.produce(i);
                }
            })
        })
        .collect();

    let mut sum = 0;
    for _ in 0..per_producer * producers as u64 {
        sum += queue.consume();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    sum
}

fn priority_round_trip(producers: usize, capacity: usize) -> u64 {
    let queue = Arc::new(PriorityQueue::new(capacity));
    let per_producer = ITEMS / producers as u64;

    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..per_producer {
                    queue.produce((i as u32 + p as u32) % 5, i);
                }
            })
        })
        .collect();

    let mut sum = 0;
    for _ in 0..per_producer * producers as u64 {
        sum += queue.consume();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    sum
}

fn bench_bounded(c: &mut Criterion) {
    let mut group = c.benchmark_group("bounded_queue");
    group.throughput(Throughput::Elements(ITEMS));

    for producers in [1, 2, 4].iter() {
        group.bench_with_input(BenchmarkId::new("producers", producers), producers, |b, &producers| {
            b.iter(|| bounded_round_trip(black_box(producers), 256))
        });
    }

    group.finish();
}

fn bench_priority(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue");
    group.throughput(Throughput::Elements(ITEMS));

    for producers in [1, 2, 4].iter() {
        group.bench_with_input(BenchmarkId::new("producers", producers), producers, |b, &producers| {
            b.iter(|| priority_round_trip(black_box(producers), 256))
        });
    }

    group.bench_function("produce_batch", |b| {
        let queue = PriorityQueue::new(ITEMS as usize);
        b.iter(|| {
            queue.produce_batch(2, ITEMS as usize, 8, |i| i);
            while let Some(value) = queue.try_consume() {
                black_box(value);
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_bounded, bench_priority);
criterion_main!(benches);
