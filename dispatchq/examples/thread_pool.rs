//! Fan CPU work out over a fixed pool and read the results behind a
//! barrier.

use dispatchq::PoolQueue;
use parking_lot::Mutex;
use std::sync::Arc;

fn main() {
    let pool = PoolQueue::with_default_threads("crunch");
    println!("pool running {} workers", pool.worker_count());

    let results = Arc::new(Mutex::new(Vec::new()));
    for n in 0..16u64 {
        let results = Arc::clone(&results);
        pool.spawn(move || {
            let sum: u64 = (0..1_000_000u64).map(|i| (i ^ n) % 7).sum();
            results.lock().push((n, sum));
        });
    }

    // The barrier waits for all sixteen chunks; no task runs next to it.
    pool.sync(|| {
        let results = results.lock();
        println!("{} chunks done", results.len());
        for (n, sum) in results.iter() {
            println!("  chunk {n}: {sum}");
        }
    });

    pool.teardown();
}
