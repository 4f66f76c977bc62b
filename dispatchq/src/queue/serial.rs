use crate::queue::context::{self, SerialContextGuard};
use crate::queue::QosClass;
use crate::store::{StoreListener, TaskStore};
use crate::task::TaskId;
use crate::utils;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long a parked worker sleeps before re-checking for disposal.
/// Effectively unbounded: submissions and disposal broadcast the condvar.
const WORKER_PARK: Duration = Duration::from_secs(100_000);

/// A queue backed by at most one worker thread, running tasks strictly in
/// `(ready_at, id)` order — submission order, for undelayed work.
///
/// The worker spawns lazily on the first submission and carries the
/// queue's name and [`QosClass`]. Teardown is idempotent and safe to call
/// from the worker itself.
///
/// # Examples
///
/// ```
/// use dispatchq::{QosClass, SerialQueue};
///
/// let queue = SerialQueue::new("worker", QosClass::Normal);
/// queue.spawn(|| println!("runs in the background"));
/// queue.sync(|| println!("runs after everything before it"));
/// queue.flush_and_teardown();
/// ```
pub struct SerialQueue {
    store: Arc<TaskStore>,
    worker: Mutex<Option<JoinHandle<()>>>,
    name: String,
    qos: QosClass,

    /// When set, `sync` hands the callable to the worker thread instead of
    /// running it on the calling thread.
    sync_on_worker: AtomicBool,

    /// Shared with sync callables so the flag survives moves into
    /// worker-bound closures.
    running_sync: Arc<AtomicBool>,
}

impl SerialQueue {
    pub fn new(name: impl Into<String>, qos: QosClass) -> Arc<Self> {
        let name = name.into();
        tracing::debug!(queue = %name, ?qos, "serial queue created");

        Arc::new(SerialQueue {
            store: Arc::new(TaskStore::new()),
            worker: Mutex::new(None),
            name,
            qos,
            sync_on_worker: AtomicBool::new(false),
            running_sync: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Submits `job` to run as soon as the worker gets to it. Dropped
    /// silently if the queue is torn down.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        let submitted = self.store.submit(Box::new(job), Instant::now());
        if submitted.is_first {
            self.start_worker();
        }
    }

    /// Submits `job` to run no earlier than `delay` from now. Returns a
    /// handle for [`cancel`](Self::cancel), or [`TaskId::NULL`] if the
    /// queue is torn down.
    pub fn spawn_after(&self, job: impl FnOnce() + Send + 'static, delay: Duration) -> TaskId {
        let submitted = self.store.submit_after(Box::new(job), delay);
        if submitted.is_first {
            self.start_worker();
        }
        submitted.id
    }

    /// Runs `job` after every previously submitted task has finished and
    /// blocks until it returns; nothing else runs in the meantime.
    ///
    /// By default the callable executes on the calling thread once the
    /// queue drains, with the thread temporarily marked as belonging to
    /// this queue. [`set_sync_on_worker`](Self::set_sync_on_worker) routes
    /// it through the worker thread instead.
    ///
    /// Calling this from the queue's own worker deadlocks — the waiter
    /// needs the running count to reach zero and its own task holds a
    /// slot. Use [`safe_sync`](Self::safe_sync) when the calling thread
    /// may already belong to this queue.
    pub fn sync(&self, job: impl FnOnce() + Send + 'static) {
        if self.sync_on_worker.load(Ordering::Acquire) {
            self.sync_on_worker_thread(job);
            return;
        }

        let addr = context::queue_addr(self);
        let running_sync = &self.running_sync;
        self.store.barrier(|| {
            let _ctx = SerialContextGuard::enter(addr);
            running_sync.store(true, Ordering::Release);
            job();
            running_sync.store(false, Ordering::Release);
        });
    }

    /// Serializes `job` through the worker thread and blocks on a
    /// completion channel. A panic inside the callable is captured and
    /// re-raised here, on the waiting caller.
    fn sync_on_worker_thread(&self, job: impl FnOnce() + Send + 'static) {
        let (tx, rx) = mpsc::channel();
        let running_sync = Arc::clone(&self.running_sync);

        self.spawn(move || {
            running_sync.store(true, Ordering::Release);
            let result = panic::catch_unwind(AssertUnwindSafe(job));
            running_sync.store(false, Ordering::Release);
            let _ = tx.send(result);
        });

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(payload)) => panic::resume_unwind(payload),
            // The queue was torn down before the task ran.
            Err(mpsc::RecvError) => {}
        }
    }

    /// Like [`sync`](Self::sync), but runs `job` immediately when the
    /// calling thread already belongs to this queue, avoiding the
    /// self-deadlock.
    pub fn safe_sync(&self, job: impl FnOnce() + Send + 'static) {
        if self.is_current() {
            job();
        } else {
            self.sync(job);
        }
    }

    /// Cancels a pending task. Unknown, running and completed ids are
    /// silent no-ops.
    pub fn cancel(&self, id: TaskId) {
        self.store.cancel(id);
    }

    /// True iff the calling thread belongs to this queue — its worker, or
    /// a thread currently inside one of its `sync` callables.
    pub fn is_current(&self) -> bool {
        context::current_serial() == context::queue_addr(self)
    }

    /// True while a `sync` callable is executing.
    pub fn is_running_sync(&self) -> bool {
        self.running_sync.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.store.is_disposed()
    }

    /// Whether the lazy worker has been spawned.
    pub fn has_worker(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// When enabled, `sync` callables always run on the worker thread
    /// rather than on the calling thread.
    pub fn set_sync_on_worker(&self, enabled: bool) {
        self.sync_on_worker.store(enabled, Ordering::Release);
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn StoreListener>>) {
        self.store.set_listener(listener);
    }

    pub fn listener(&self) -> Option<Arc<dyn StoreListener>> {
        self.store.listener()
    }

    /// Stops accepting work, discards pending tasks and stops the worker.
    /// A task already executing finishes first. When called from the
    /// worker itself the thread is left to unwind on its own instead of
    /// being joined. Idempotent.
    pub fn teardown(&self) {
        self.store.dispose();
        self.teardown_worker();
    }

    /// Waits for everything already queued to finish, then tears down.
    /// Safe to call from the worker: the teardown then runs inline.
    pub fn flush_and_teardown(&self) {
        let addr = context::queue_addr(self);
        if context::current_serial() == addr {
            self.teardown();
            return;
        }

        // The mirror of `sync` minus its `'static` bound: the callable
        // borrows `self` and runs here, on the calling thread.
        let running_sync = &self.running_sync;
        self.store.barrier(|| {
            let _ctx = SerialContextGuard::enter(addr);
            running_sync.store(true, Ordering::Release);
            self.teardown();
            running_sync.store(false, Ordering::Release);
        });
    }

    fn start_worker(&self) {
        let mut worker = self.worker.lock();
        debug_assert!(worker.is_none(), "serial worker already started");

        let store = Arc::clone(&self.store);
        let addr = context::queue_addr(self);
        let name = self.name.clone();
        let qos = self.qos;

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker_main(addr, name, qos, store))
            .expect("failed to spawn worker thread");

        *worker = Some(handle);
    }

    fn teardown_worker(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if self.is_current() {
                // Joining our own thread would deadlock; the loop exits on
                // its own now that the store is disposed.
                drop(handle);
            } else {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn worker_main(queue_addr: usize, name: String, qos: QosClass, store: Arc<TaskStore>) {
    let _ctx = SerialContextGuard::enter(queue_addr);
    utils::thread::set_current_thread_name(&name);
    utils::thread::apply_qos_class(qos);
    tracing::trace!("serial worker started");

    while !store.is_disposed() {
        store.step(Instant::now() + WORKER_PARK);
    }

    tracing::trace!("serial worker exiting");
}
