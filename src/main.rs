use elastic_pool::{Config, ThreadPool};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Instant;

fn main() {
    let now = Instant::now();
    let pool = ThreadPool::with_config(Config::io_bound()).expect("pool start failed");
    let counter = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..100_000)
        .map(|i| {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
                i * 2
            })
            .expect("submit failed")
        })
        .collect();

    for handle in handles {
        let _ = handle.wait();
    }
    pool.wait_for_completion();

    let metrics = pool.metrics();
    println!("executed: {}", counter.load(Ordering::Relaxed));
    println!("workers: {}", metrics.worker_count());
    println!("elapsed: {:?}", now.elapsed());

    pool.close();
}
