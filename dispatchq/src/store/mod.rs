//! The task store: the one component in this crate that locks and waits.
//!
//! A [`TaskStore`] holds a time-ordered list of pending tasks behind a
//! single mutex and condition variable. Executors layer worker threads on
//! top of [`step`](TaskStore::step); everything else — submission,
//! cancellation, barriers, the concurrency ceiling, listener edges — goes
//! through the same lock.

mod listener;
pub use listener::StoreListener;

#[cfg(test)]
mod tests;

use crate::task::{Job, Task, TaskId};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a submission.
///
/// `is_first` is a one-shot edge: it is `true` for exactly the first
/// successful submission in the store's lifetime, which is what a lazy
/// executor keys its worker spawn off. It is independent of the emptiness
/// edges the listener sees.
#[derive(Debug, Clone, Copy, Default)]
pub struct Submitted {
    /// Assigned id (>= 1), or [`TaskId::NULL`] if the store was disposed.
    pub id: TaskId,

    /// Whether this was the very first submission ever accepted.
    pub is_first: bool,
}

struct State {
    /// Pending tasks, sorted ascending by `(ready_at, id)`. Barrier
    /// markers live in-band in the same list.
    tasks: VecDeque<Task>,

    /// Last assigned id; incremented before assignment so ids start at 1.
    next_id: i64,

    /// True until the first successful submission.
    first: bool,

    /// Tracks the listener's view of emptiness. Cleared by submissions,
    /// set again only by `step` finding the list drained.
    empty: bool,

    /// Tasks currently executing, barriers included.
    running: usize,

    /// Maximum simultaneous running tasks.
    ceiling: usize,

    listener: Option<Arc<dyn StoreListener>>,
}

impl State {
    /// Inserts a task at its sorted position and returns the assigned id.
    ///
    /// Insertion is stable for equal `ready_at` values because the fresh id
    /// is strictly greater than every id already in the list.
    fn insert(&mut self, job: Option<Job>, ready_at: Instant, is_barrier: bool) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);

        let at = self
            .tasks
            .partition_point(|t| (t.ready_at, t.id) <= (ready_at, id));
        self.tasks
            .insert(at, Task::new(id, job, ready_at, is_barrier));

        id
    }

    /// Removes the entry with `id`, handing its job back to the caller so
    /// it can be dropped once the lock is gone.
    fn remove(&mut self, id: TaskId) -> Option<Job> {
        let at = self.tasks.iter().position(|t| t.id == id)?;
        self.tasks.remove(at).and_then(|mut t| t.job.take())
    }
}

/// Thread-safe, time-ordered, cancellable task container with a
/// configurable concurrency ceiling and a barrier primitive.
///
/// The store never creates threads. Callers drive it: workers loop on
/// [`step`](TaskStore::step), tests and teardown paths drain it with
/// [`flush`](TaskStore::flush). The condition variable is broadcast on
/// every state change because waiters block on distinct predicates
/// (capacity, head-of-line, readiness, barrier turn).
pub struct TaskStore {
    disposed: AtomicBool,
    state: Mutex<State>,
    condvar: Condvar,
}

impl TaskStore {
    pub fn new() -> Self {
        TaskStore {
            disposed: AtomicBool::new(false),
            state: Mutex::new(State {
                tasks: VecDeque::new(),
                next_id: 0,
                first: true,
                empty: true,
                running: 0,
                ceiling: 1,
                listener: None,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Inserts `job` to become eligible at the absolute instant `when`.
    ///
    /// Returns the assigned id and the first-submission edge; a disposed
    /// store drops the job and returns the defaults ([`TaskId::NULL`],
    /// `false`).
    pub fn submit(&self, job: Job, when: Instant) -> Submitted {
        if self.is_disposed() {
            return Submitted::default();
        }

        let submitted = {
            let mut state = self.state.lock();

            let id = state.insert(Some(job), when, false);
            let is_first = state.first;
            state.first = false;

            if state.empty {
                state.empty = false;
                if let Some(listener) = state.listener.clone() {
                    // Enter edge; runs on the submitting thread, lock held.
                    listener.on_non_empty();
                }
            }

            Submitted { id, is_first }
        };

        self.condvar.notify_all();
        submitted
    }

    /// Inserts `job` to become eligible `delay` from now.
    pub fn submit_after(&self, job: Job, delay: Duration) -> Submitted {
        self.submit(job, Instant::now() + delay)
    }

    /// Removes a pending task. Unknown, running and completed ids are
    /// silent no-ops, and no listener edge fires even if the store drains.
    pub fn cancel(&self, id: TaskId) {
        {
            // The extracted job outlives the lock guard: its drop may run
            // arbitrary user code, including re-entering this store.
            let _job = self.state.lock().remove(id);
        }
        self.condvar.notify_all();
    }

    /// Runs `job` in isolation: every task running at the time of the call
    /// finishes first, nothing else starts while `job` runs, and tasks
    /// submitted afterwards stay queued behind it.
    ///
    /// The callable executes on the calling thread once the store's head
    /// reaches the in-band marker with nothing running. If the store is
    /// disposed while waiting, the marker is discarded with the rest of the
    /// list and the callable never runs.
    pub fn barrier(&self, job: impl FnOnce()) {
        let ready_at = Instant::now();

        let mut state = self.state.lock();
        let id = state.insert(None, ready_at, true);

        while !state.tasks.is_empty() {
            let at_head = state.tasks.front().map_or(false, |t| t.id == id);
            if state.running != 0 || !at_head {
                self.condvar.wait(&mut state);
                continue;
            }

            state.running += 1;
            drop(state);

            job();

            let mut state = self.state.lock();
            state.remove(id);
            state.running -= 1;
            drop(state);

            self.condvar.notify_all();
            return;
        }
        // Disposal cleared the list out from under the marker.
    }

    /// Pops and runs the earliest runnable task, waiting until `deadline`
    /// for one to become runnable.
    ///
    /// Returns `true` iff a task executed; `false` on timeout or once the
    /// store is disposed. Barrier markers are never popped here — they are
    /// claimed by the thread waiting in [`barrier`](Self::barrier).
    pub fn step(&self, deadline: Instant) -> bool {
        let job = match self.next_job(deadline) {
            Some(job) => job,
            None => return false,
        };

        job();

        // The job and everything it captured are gone by the time we take
        // the lock back to give up the running slot.
        self.state.lock().running -= 1;
        self.condvar.notify_all();
        true
    }

    fn next_job(&self, deadline: Instant) -> Option<Job> {
        let mut state = self.state.lock();
        let mut runnable = false;

        while !self.is_disposed() {
            if state.tasks.is_empty() {
                if !state.empty {
                    state.empty = true;
                    if let Some(listener) = state.listener.clone() {
                        // Exit edge; runs on the stepping thread, lock held.
                        listener.on_empty();
                    }
                }
                if self.condvar.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
                continue;
            }

            if state.running >= state.ceiling {
                if self.condvar.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
                continue;
            }

            let (head_is_barrier, ready_at) = {
                let head = &state.tasks[0];
                (head.is_barrier, head.ready_at)
            };

            if head_is_barrier {
                if self.condvar.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
                continue;
            }
            if ready_at > Instant::now() {
                let wait_until = deadline.min(ready_at);
                let timed_out = self.condvar.wait_until(&mut state, wait_until).timed_out();
                // Only a miss of the caller's deadline ends the wait; the
                // head coming due just re-evaluates.
                if wait_until == deadline && timed_out {
                    break;
                }
                continue;
            }

            runnable = true;
            break;
        }

        if self.is_disposed() || !runnable {
            return None;
        }

        let mut task = state
            .tasks
            .pop_front()
            .expect("runnable head vanished while the lock was held");
        state.running += 1;
        Some(task.job.take().expect("non-barrier task carries a job"))
    }

    /// Drains the store on the calling thread, running every task that is
    /// ready when the drain reaches it. Returns the number of tasks run.
    ///
    /// This does not wait for delayed tasks: the drain stops at the first
    /// task that is still in the future.
    pub fn flush(&self) -> usize {
        let mut ran = 0;
        while self.step(Instant::now()) {
            ran += 1;
        }
        ran
    }

    /// Like [`flush`](Self::flush), but only runs tasks that were already
    /// ready when the call was made.
    pub fn flush_up_to_now(&self) -> usize {
        let deadline = Instant::now();
        let mut ran = 0;
        while self.step(deadline) {
            ran += 1;
        }
        ran
    }

    /// Rejects further submissions, discards pending tasks and releases
    /// every waiter. Tasks already executing finish normally. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::debug!("task store disposed");

        {
            // Discarded jobs drop outside the lock; their captures may run
            // arbitrary code on the way out.
            let _discarded = {
                let mut state = self.state.lock();
                mem::take(&mut state.tasks)
            };
        }
        self.condvar.notify_all();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Sets the maximum number of simultaneously running tasks.
    pub fn set_ceiling(&self, ceiling: usize) {
        {
            let mut state = self.state.lock();
            if state.ceiling == ceiling {
                return;
            }
            state.ceiling = ceiling;
        }
        // A raised ceiling may admit workers parked on capacity.
        self.condvar.notify_all();
    }

    /// Replaces the listener; `None` clears it.
    pub fn set_listener(&self, listener: Option<Arc<dyn StoreListener>>) {
        self.state.lock().listener = listener;
    }

    pub fn listener(&self) -> Option<Arc<dyn StoreListener>> {
        self.state.lock().listener.clone()
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskStore {
    fn drop(&mut self) {
        self.dispose();
    }
}
