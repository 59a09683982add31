//! Benchmarks for the MPMC ring queue
//!
//! Target: <50ns per push/pull pair uncontended

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rt_gateway::infrastructure::RingQueue;
use std::sync::Arc;
use std::thread;

fn bench_push_pull(c: &mut Criterion) {
    let queue = RingQueue::with_capacity(1024);

    c.bench_function("ring_queue_push_pull", |b| {
        b.iter(|| {
            let _ = queue.push(black_box(42u64));
            black_box(queue.pull())
        })
    });
}

fn bench_batch(c: &mut Criterion) {
    let queue = RingQueue::with_capacity(1024);
    let mut items = Vec::with_capacity(64);
    let mut out = Vec::with_capacity(64);

    let mut group = c.benchmark_group("ring_queue_batch");
    group.throughput(Throughput::Elements(64));
    group.bench_function("push_many_pull_many_64", |b| {
        b.iter(|| {
            items.extend(0..64u64);
            queue.push_many(&mut items);
            queue.pull_many(&mut out, 64);
            out.clear();
        })
    });
    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    const PER_THREAD: u64 = 10_000;

    c.bench_function("ring_queue_2p2c", |b| {
        b.iter(|| {
            let queue = Arc::new(RingQueue::with_capacity(256));
            let producers: Vec<_> = (0..2)
                .map(|_| {
                    let q = Arc::clone(&queue);
                    thread::spawn(move || {
                        for i in 0..PER_THREAD {
                            while q.push(i).is_err() {
                                std::hint::spin_loop();
                            }
                        }
                    })
                })
                .collect();
            let consumers: Vec<_> = (0..2)
                .map(|_| {
                    let q = Arc::clone(&queue);
                    thread::spawn(move || {
                        let mut got = 0;
                        while got < PER_THREAD {
                            if q.pull().is_some() {
                                got += 1;
                            } else {
                                std::hint::spin_loop();
                            }
                        }
                    })
                })
                .collect();
            for h in producers.into_iter().chain(consumers) {
                h.join().unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_push_pull, bench_batch, bench_contended);
criterion_main!(benches);
