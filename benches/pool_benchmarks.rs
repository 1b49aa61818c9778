use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use elastic_pool::{Config, ThreadPool};

fn bench_submit_wait(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_wait");
    for size in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let pool = ThreadPool::with_config(Config::cpu_bound()).unwrap();
            b.iter(|| {
                let handles: Vec<_> = (0..size)
                    .map(|i| pool.submit(move || black_box(i) * 2).unwrap())
                    .collect();
                for handle in handles {
                    handle.wait().unwrap();
                }
            });
            pool.close();
        });
    }
    group.finish();
}

fn bench_worker_local_fanout(c: &mut Criterion) {
    c.bench_function("worker_local_fanout_1000", |b| {
        let pool = ThreadPool::with_config(Config::cpu_bound()).unwrap();
        b.iter(|| {
            // корневая задача раздаёт подзадачи из потока воркера,
            // они идут через локальную очередь в обход глобальной
            let pool_inner = pool.clone();
            let root = pool
                .submit(move || {
                    let handles: Vec<_> = (0..1_000)
                        .map(|i| pool_inner.submit(move || black_box(i) + 1).unwrap())
                        .collect();
                    handles
                })
                .unwrap();
            for handle in root.wait().unwrap() {
                handle.wait().unwrap();
            }
        });
        pool.close();
    });
}

fn bench_caller_runs_saturated(c: &mut Criterion) {
    c.bench_function("tiny_pool_backpressure", |b| {
        let pool = ThreadPool::with_config(Config {
            core_size: 1,
            max_size: 1,
            max_queue_depth: 4,
            keep_alive_seconds: 30,
        })
        .unwrap();
        b.iter(|| {
            let handles: Vec<_> = (0..256)
                .map(|i| pool.submit(move || black_box(i)).unwrap())
                .collect();
            for handle in handles {
                handle.wait().unwrap();
            }
        });
        pool.close();
    });
}

criterion_group!(
    benches,
    bench_submit_wait,
    bench_worker_local_fanout,
    bench_caller_runs_saturated
);
criterion_main!(benches);
