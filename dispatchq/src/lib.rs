//! In-process task dispatcher: named queues with ordering, delay,
//! cancellation and bounded-concurrency guarantees.
//!
//! Work is submitted as parameterless callables to either a
//! [`SerialQueue`] (one lazily started worker, FIFO) or a [`PoolQueue`]
//! (a fixed set of workers sharing one store). Both are thin shells over
//! the [`TaskStore`], the single component that locks and waits: a
//! time-ordered, cancellable task list with a concurrency ceiling, a
//! barrier primitive and edge-triggered emptiness callbacks.
//!
//! ```
//! use dispatchq::{QosClass, SerialQueue};
//! use std::time::Duration;
//!
//! let queue = SerialQueue::new("background", QosClass::Low);
//!
//! queue.spawn(|| println!("first"));
//! queue.spawn(|| println!("second"));
//!
//! let id = queue.spawn_after(|| println!("never happens"), Duration::from_secs(60));
//! queue.cancel(id);
//!
//! // Blocks until both printed tasks have run, then stops the worker.
//! queue.flush_and_teardown();
//! ```

pub mod queue;
pub mod store;
pub mod task;

pub mod utils;

pub use queue::{main_queue, set_main, Builder, Handle, PoolQueue, QosClass, SerialQueue};
pub use store::{StoreListener, Submitted, TaskStore};
pub use task::{Job, TaskId};
