//! Throughput benchmark using criterion.
//!
//! Measures task throughput for flat batches split into per-worker buckets.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use taskloom::{FiberContext, TaskDesc, TaskGroup, TaskScheduler};

const TASK_COUNT: usize = 4096;
const BUCKET_SIZE: usize = 256;

fn tiny_task(_context: &FiberContext, user_data: *mut ()) {
    let counter = unsafe { &*(user_data as *const AtomicUsize) };
    counter.fetch_add(1, Ordering::Relaxed);
}

fn bench_flat_batches(c: &mut Criterion) {
    let num_threads = num_cpus::get();
    let scheduler = TaskScheduler::with_worker_count(num_threads);
    let counter = AtomicUsize::new(0);
    let group = TaskGroup::new(0);

    // Warmup
    let warmup = TaskDesc::new(tiny_task, &counter as *const AtomicUsize as *mut ());
    scheduler.run_tasks(group, &[&[warmup]]);
    assert!(scheduler.wait_group(group, Duration::from_secs(10)));

    let mut bench_group = c.benchmark_group("throughput");
    bench_group.throughput(Throughput::Elements(TASK_COUNT as u64));
    bench_group.sample_size(10);

    bench_group.bench_function(BenchmarkId::new("flat_batch", num_threads), |b| {
        b.iter(|| {
            let desc = TaskDesc::new(tiny_task, &counter as *const AtomicUsize as *mut ());
            let tasks = vec![desc; TASK_COUNT];
            let buckets: Vec<&[TaskDesc]> = tasks.chunks(BUCKET_SIZE).collect();
            scheduler.run_tasks(group, &buckets);
            assert!(scheduler.wait_group(group, Duration::from_secs(60)));
        })
    });
    bench_group.finish();
}

criterion_group!(benches, bench_flat_batches);
criterion_main!(benches);
