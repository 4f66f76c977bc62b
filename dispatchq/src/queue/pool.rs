use crate::queue::context::{self, PoolContextGuard};
use crate::queue::{default_worker_threads, QosClass};
use crate::store::{StoreListener, TaskStore};
use crate::task::TaskId;
use crate::utils;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Periodic worker wake-up; bounds shutdown latency when the store is
/// quiet.
const WORKER_WAKE_INTERVAL: Duration = Duration::from_secs(1);

/// A queue fanning tasks out over a fixed set of worker threads sharing
/// one store.
///
/// Tasks are popped in the same `(ready_at, id)` order a serial queue
/// uses, but completion order across workers is unspecified. The store's
/// concurrency ceiling is pinned to the worker count so that
/// [`sync`](PoolQueue::sync) barriers keep their exclusive meaning.
///
/// # Examples
///
/// ```
/// use dispatchq::PoolQueue;
///
/// let pool = PoolQueue::new("crunch", 4);
/// for n in 0..8 {
///     pool.spawn(move || { let _ = n * n; });
/// }
/// pool.sync(|| println!("everything before this has finished"));
/// pool.teardown();
/// ```
pub struct PoolQueue {
    store: Arc<TaskStore>,
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Cleared on teardown so quiet workers exit at their next wake-up.
    running: Arc<AtomicBool>,

    name: String,
    threads: usize,
}

impl PoolQueue {
    /// Creates a pool with `threads` eagerly spawned workers.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is zero.
    pub fn new(name: impl Into<String>, threads: usize) -> Arc<Self> {
        Self::new_with(name, threads, QosClass::Normal)
    }

    /// Sizes the pool to the machine's available parallelism, falling back
    /// to four workers when it cannot be determined.
    pub fn with_default_threads(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, default_worker_threads())
    }

    pub(crate) fn new_with(name: impl Into<String>, threads: usize, qos: QosClass) -> Arc<Self> {
        assert!(threads > 0, "worker count cannot be 0");
        let name = name.into();

        let store = Arc::new(TaskStore::new());
        store.set_ceiling(threads);

        let queue = Arc::new(PoolQueue {
            store,
            workers: Mutex::new(Vec::with_capacity(threads)),
            running: Arc::new(AtomicBool::new(true)),
            name,
            threads,
        });

        tracing::debug!(queue = %queue.name, threads, "pool queue created");

        let addr = context::queue_addr(&*queue);
        let mut workers = queue.workers.lock();
        for i in 0..threads {
            let store = Arc::clone(&queue.store);
            let running = Arc::clone(&queue.running);
            let name = format!("{}-{}", queue.name, i);

            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_main(addr, name, qos, store, running))
                .expect("failed to spawn worker thread");

            workers.push(handle);
        }
        drop(workers);

        queue
    }

    /// Submits `job` to run on the next free worker. Dropped silently if
    /// the queue is torn down.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        self.store.submit(Box::new(job), Instant::now());
    }

    /// Submits `job` to run no earlier than `delay` from now. Returns a
    /// handle for [`cancel`](Self::cancel), or [`TaskId::NULL`] if the
    /// queue is torn down.
    pub fn spawn_after(&self, job: impl FnOnce() + Send + 'static, delay: Duration) -> TaskId {
        self.store.submit_after(Box::new(job), delay).id
    }

    /// Runs `job` in isolation — after every running task finishes and
    /// before any later task starts — blocking the caller until it
    /// returns.
    ///
    /// When called from one of this pool's own workers the callable runs
    /// inline instead, with no exclusion: waiting for the running count to
    /// reach zero would deadlock on the caller's own slot, and tasks on
    /// other workers may still be executing. Schedule the barrier from
    /// outside the pool when true exclusion is required.
    pub fn sync(&self, job: impl FnOnce()) {
        if self.is_current() {
            job();
            return;
        }
        self.store.barrier(job);
    }

    /// Alias of [`sync`](Self::sync) for symmetry with
    /// [`SerialQueue::safe_sync`](crate::SerialQueue::safe_sync); the
    /// on-worker short-circuit is already built into `sync` here.
    pub fn safe_sync(&self, job: impl FnOnce()) {
        self.sync(job);
    }

    /// Cancels a pending task. Unknown, running and completed ids are
    /// silent no-ops.
    pub fn cancel(&self, id: TaskId) {
        self.store.cancel(id);
    }

    /// True iff the calling thread is one of this pool's workers.
    pub fn is_current(&self) -> bool {
        context::current_pool() == context::queue_addr(self)
    }

    pub fn is_disposed(&self) -> bool {
        self.store.is_disposed()
    }

    pub fn worker_count(&self) -> usize {
        self.threads
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn StoreListener>>) {
        self.store.set_listener(listener);
    }

    pub fn listener(&self) -> Option<Arc<dyn StoreListener>> {
        self.store.listener()
    }

    /// Stops the workers and discards pending tasks; tasks already
    /// executing finish first. Safe to call from one of the pool's own
    /// workers: that worker's thread is left to unwind on its own instead
    /// of being joined. Idempotent.
    pub fn teardown(&self) {
        self.running.store(false, Ordering::Release);
        self.store.dispose();

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                // Joining our own thread would deadlock; the loop exits on
                // its own now that the store is disposed.
                drop(handle);
            } else {
                let _ = handle.join();
            }
        }
    }

    /// Waits for everything already queued to finish, then tears down.
    /// Safe to call from a worker: the teardown then runs inline.
    pub fn flush_and_teardown(&self) {
        self.safe_sync(|| self.teardown());
    }
}

impl Drop for PoolQueue {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn worker_main(
    queue_addr: usize,
    name: String,
    qos: QosClass,
    store: Arc<TaskStore>,
    running: Arc<AtomicBool>,
) {
    let _ctx = PoolContextGuard::enter(queue_addr);
    utils::thread::set_current_thread_name(&name);
    utils::thread::apply_qos_class(qos);
    tracing::trace!("pool worker started");

    while running.load(Ordering::Acquire) {
        store.step(Instant::now() + WORKER_WAKE_INTERVAL);
    }

    tracing::trace!("pool worker exiting");
}
