//! Serial queue basics: ordered background work, a blocking sync call,
//! and a delayed task that gets cancelled before it fires.

use dispatchq::{QosClass, SerialQueue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let queue = SerialQueue::new("demo", QosClass::Normal);
    let counter = Arc::new(AtomicUsize::new(0));

    for n in 1..=3 {
        let counter = Arc::clone(&counter);
        queue.spawn(move || {
            println!("task {n} on {:?}", thread::current().name());
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    // Blocks until the three tasks above have finished.
    queue.sync(|| println!("queue drained, nothing else is running"));

    let id = queue.spawn_after(|| println!("this never prints"), Duration::from_secs(1));
    queue.cancel(id);

    queue.flush_and_teardown();
    println!("ran {} tasks", counter.load(Ordering::SeqCst));
}
