//! The two executor shapes layered on the task store, plus the
//! process-wide main-queue slot and per-thread ownership context.

mod builder;
pub(crate) mod context;
pub mod pool;
pub mod serial;


pub use builder::Builder;
pub use pool::PoolQueue;
pub use serial::SerialQueue;

use crate::store::StoreListener;
use crate::task::TaskId;
use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

/// Advisory priority for a queue's worker threads.
///
/// The mapping onto the OS scheduler is best-effort and may be a no-op;
/// see `utils::thread`. Classes are ordered, `Lowest < Max`.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub enum QosClass {
    /// Background work nobody is waiting on.
    Lowest,
    Low,
    #[default]
    Normal,
    /// Work a user interaction is waiting on.
    High,
    Max,
}

/// Worker count used when none is configured.
pub(crate) fn default_worker_threads() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

/// Clonable reference to a queue of either shape, forwarding the shared
/// surface. This is what the process-wide main slot stores.
#[derive(Clone)]
pub enum Handle {
    Serial(Arc<SerialQueue>),
    Pool(Arc<PoolQueue>),
}

impl Handle {
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        match self {
            Handle::Serial(q) => q.spawn(job),
            Handle::Pool(q) => q.spawn(job),
        }
    }

    pub fn spawn_after(&self, job: impl FnOnce() + Send + 'static, delay: Duration) -> TaskId {
        match self {
            Handle::Serial(q) => q.spawn_after(job, delay),
            Handle::Pool(q) => q.spawn_after(job, delay),
        }
    }

    pub fn sync(&self, job: impl FnOnce() + Send + 'static) {
        match self {
            Handle::Serial(q) => q.sync(job),
            Handle::Pool(q) => q.sync(job),
        }
    }

    pub fn safe_sync(&self, job: impl FnOnce() + Send + 'static) {
        match self {
            Handle::Serial(q) => q.safe_sync(job),
            Handle::Pool(q) => q.safe_sync(job),
        }
    }

    pub fn cancel(&self, id: TaskId) {
        match self {
            Handle::Serial(q) => q.cancel(id),
            Handle::Pool(q) => q.cancel(id),
        }
    }

    pub fn is_current(&self) -> bool {
        match self {
            Handle::Serial(q) => q.is_current(),
            Handle::Pool(q) => q.is_current(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        match self {
            Handle::Serial(q) => q.is_disposed(),
            Handle::Pool(q) => q.is_disposed(),
        }
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn StoreListener>>) {
        match self {
            Handle::Serial(q) => q.set_listener(listener),
            Handle::Pool(q) => q.set_listener(listener),
        }
    }

    pub fn teardown(&self) {
        match self {
            Handle::Serial(q) => q.teardown(),
            Handle::Pool(q) => q.teardown(),
        }
    }

    pub fn flush_and_teardown(&self) {
        match self {
            Handle::Serial(q) => q.flush_and_teardown(),
            Handle::Pool(q) => q.flush_and_teardown(),
        }
    }
}

static MAIN: OnceLock<Handle> = OnceLock::new();

/// Installs the process-wide main queue. The slot is write-once: the first
/// call wins and later calls hand the rejected handle back.
pub fn set_main(handle: Handle) -> Result<(), Handle> {
    MAIN.set(handle)
}

/// The process-wide main queue, if one was installed.
pub fn main_queue() -> Option<&'static Handle> {
    MAIN.get()
}
