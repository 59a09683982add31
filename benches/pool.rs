//! Benchmarks for the record pool

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rt_gateway::infrastructure::BufferPool;

fn bench_alloc_release(c: &mut Criterion) {
    let pool = BufferPool::new(1024, 64);

    c.bench_function("pool_alloc_release", |b| {
        b.iter(|| black_box(pool.alloc()))
    });
}

fn bench_clone_record(c: &mut Criterion) {
    let pool = BufferPool::new(1024, 64);
    let mut src = pool.alloc().unwrap();
    src.get_mut().unwrap().set_len(64);

    c.bench_function("pool_clone_record_64", |b| {
        b.iter(|| black_box(pool.clone_record(&src)))
    });
}

fn bench_share(c: &mut Criterion) {
    let pool = BufferPool::new(1024, 64);
    let smps: Vec<_> = (0..16).filter_map(|_| pool.alloc()).collect();

    c.bench_function("pool_get_put_many_16", |b| {
        b.iter(|| {
            let mut refs = BufferPool::get_many(&smps);
            BufferPool::put_many(&mut refs);
        })
    });
}

criterion_group!(benches, bench_alloc_release, bench_clone_record, bench_share);
criterion_main!(benches);
