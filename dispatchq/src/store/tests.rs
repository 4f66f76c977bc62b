use super::*;
use crate::task::TaskId;
use rstest::rstest;
use static_assertions::assert_impl_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

assert_impl_all!(TaskStore: Send, Sync, Default);
assert_impl_all!(Submitted: Send, Sync, Clone, Copy);

fn noop() -> Job {
    Box::new(|| {})
}

#[test]
fn test_ids_start_at_one_and_increase() {
    let store = TaskStore::new();

    let a = store.submit(noop(), Instant::now());
    let b = store.submit(noop(), Instant::now());

    assert_eq!(a.id.as_i64(), 1);
    assert!(a.is_first);
    assert_eq!(b.id.as_i64(), 2);
    assert!(!b.is_first);
}

#[test]
fn test_submission_after_disposal_is_dropped() {
    let store = TaskStore::new();
    store.dispose();

    let s = store.submit(noop(), Instant::now());
    assert!(s.id.is_null());
    assert!(!s.is_first);
}

#[test]
fn test_flush_runs_in_submission_order() {
    let store = TaskStore::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for n in 1..=5 {
        let order = Arc::clone(&order);
        store.submit(Box::new(move || order.lock().push(n)), Instant::now());
    }

    assert_eq!(store.flush(), 5);
    assert_eq!(*order.lock(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_tasks_sort_by_ready_time_before_id() {
    let store = TaskStore::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let push = |tag: &'static str| {
        let order = Arc::clone(&order);
        Box::new(move || order.lock().push(tag)) as Job
    };

    // Submitted first but due last.
    store.submit(push("late"), Instant::now() + Duration::from_millis(50));
    store.submit(push("a"), Instant::now());
    store.submit(push("b"), Instant::now());

    thread::sleep(Duration::from_millis(80));
    assert_eq!(store.flush_up_to_now(), 3);
    assert_eq!(*order.lock(), vec!["a", "b", "late"]);
}

#[test]
fn test_flush_up_to_now_skips_future_tasks() {
    let store = TaskStore::new();
    let ran = Arc::new(AtomicBool::new(false));

    store.submit(noop(), Instant::now());
    store.submit(noop(), Instant::now());
    let flag = Arc::clone(&ran);
    store.submit(
        Box::new(move || flag.store(true, Ordering::SeqCst)),
        Instant::now() + Duration::from_secs(3600),
    );

    assert_eq!(store.flush_up_to_now(), 2);
    // The drain stops at the first future task rather than waiting for it.
    assert_eq!(store.flush(), 0);
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn test_step_times_out_on_empty_store() {
    let store = TaskStore::new();

    let start = Instant::now();
    assert!(!store.step(Instant::now() + Duration::from_millis(50)));
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn test_step_waits_for_head_to_come_due() {
    let store = TaskStore::new();
    let ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&ran);
    let submitted_at = Instant::now();
    store.submit_after(
        Box::new(move || flag.store(true, Ordering::SeqCst)),
        Duration::from_millis(100),
    );

    // A deadline in the past cannot admit a future task.
    assert!(!store.step(Instant::now()));
    assert!(!ran.load(Ordering::SeqCst));

    assert!(store.step(Instant::now() + Duration::from_secs(5)));
    assert!(submitted_at.elapsed() >= Duration::from_millis(100));
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn test_cancel_prevents_execution() {
    let store = TaskStore::new();
    let ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&ran);
    let s = store.submit_after(
        Box::new(move || flag.store(true, Ordering::SeqCst)),
        Duration::from_millis(50),
    );
    assert!(s.id.as_i64() >= 1);

    store.cancel(s.id);
    thread::sleep(Duration::from_millis(80));

    assert_eq!(store.flush_up_to_now(), 0);
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn test_cancel_of_unknown_or_completed_id_is_noop() {
    let store = TaskStore::new();

    store.cancel(TaskId(999));

    let s = store.submit(noop(), Instant::now());
    assert_eq!(store.flush(), 1);

    store.cancel(s.id);
    assert_eq!(store.flush(), 0);
}

#[test]
fn test_cancel_from_inside_a_running_task_is_noop() {
    let store = Arc::new(TaskStore::new());
    let own_id = Arc::new(Mutex::new(TaskId::NULL));

    let inner_store = Arc::clone(&store);
    let inner_id = Arc::clone(&own_id);
    let s = store.submit(
        Box::new(move || inner_store.cancel(*inner_id.lock())),
        Instant::now(),
    );
    *own_id.lock() = s.id;

    // The task cancels itself mid-run; it was already popped, so this must
    // neither deadlock nor have any effect.
    assert_eq!(store.flush(), 1);
}

/// Re-enters the store from its drop glue. Deadlocks if a job is ever
/// dropped while the store lock is held.
struct ReentrantOnDrop {
    store: Arc<TaskStore>,
}

impl Drop for ReentrantOnDrop {
    fn drop(&mut self) {
        self.store.cancel(TaskId(9999));
    }
}

#[test]
fn test_cancelled_job_drops_outside_the_lock() {
    let store = Arc::new(TaskStore::new());

    let guard = ReentrantOnDrop {
        store: Arc::clone(&store),
    };
    let s = store.submit(
        Box::new(move || {
            let _keep = &guard;
        }),
        Instant::now(),
    );

    store.cancel(s.id);
}

#[test]
fn test_discarded_jobs_drop_outside_the_lock_on_disposal() {
    let store = Arc::new(TaskStore::new());

    let guard = ReentrantOnDrop {
        store: Arc::clone(&store),
    };
    store.submit(
        Box::new(move || {
            let _keep = &guard;
        }),
        Instant::now(),
    );

    store.dispose();
}

#[rstest]
#[case::serial(1)]
#[case::two(2)]
#[case::three(3)]
fn test_ceiling_bounds_concurrency(#[case] ceiling: usize) {
    const TASKS: usize = 8;

    let store = Arc::new(TaskStore::new());
    store.set_ceiling(ceiling);

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..TASKS {
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        let done = Arc::clone(&done);
        store.submit(
            Box::new(move || {
                let c = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(c, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                current.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            }),
            Instant::now(),
        );
    }

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while done.load(Ordering::SeqCst) < TASKS {
                    store.step(Instant::now() + Duration::from_millis(50));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(done.load(Ordering::SeqCst), TASKS);
    assert!(peak.load(Ordering::SeqCst) <= ceiling);
}

#[test]
fn test_raising_the_ceiling_wakes_blocked_workers() {
    let store = Arc::new(TaskStore::new());

    store.submit(
        Box::new(|| thread::sleep(Duration::from_millis(500))),
        Instant::now(),
    );
    let (tx, rx) = mpsc::channel();
    store.submit(
        Box::new(move || {
            let _ = tx.send(());
        }),
        Instant::now(),
    );

    let spawn_worker = |store: &Arc<TaskStore>| {
        let store = Arc::clone(store);
        thread::spawn(move || {
            store.step(Instant::now() + Duration::from_secs(2));
        })
    };

    let a = spawn_worker(&store);
    thread::sleep(Duration::from_millis(50));
    // The second worker parks on capacity: one task running, ceiling 1.
    let b = spawn_worker(&store);
    thread::sleep(Duration::from_millis(50));

    store.set_ceiling(2);

    // The second task runs well before the sleeper finishes; if the
    // ceiling change failed to broadcast, nothing happens until then.
    assert!(rx.recv_timeout(Duration::from_millis(250)).is_ok());

    a.join().unwrap();
    b.join().unwrap();
}

#[test]
fn test_barrier_runs_in_isolation() {
    const TASKS: usize = 6;

    let store = Arc::new(TaskStore::new());
    store.set_ceiling(4);

    let current = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..TASKS {
        let current = Arc::clone(&current);
        let done = Arc::clone(&done);
        store.submit(
            Box::new(move || {
                current.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                current.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            }),
            Instant::now(),
        );
    }

    let stop = Arc::new(AtomicBool::new(false));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    store.step(Instant::now() + Duration::from_millis(50));
                }
            })
        })
        .collect();

    let barrier_ran = Arc::new(AtomicBool::new(false));
    {
        let current = Arc::clone(&current);
        let done = Arc::clone(&done);
        let barrier_ran = Arc::clone(&barrier_ran);
        store.barrier(move || {
            // Everything submitted before the barrier has fully finished.
            assert_eq!(current.load(Ordering::SeqCst), 0);
            assert_eq!(done.load(Ordering::SeqCst), TASKS);
            barrier_ran.store(true, Ordering::SeqCst);
        });
    }
    assert!(barrier_ran.load(Ordering::SeqCst));

    stop.store(true, Ordering::SeqCst);
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_barrier_on_idle_store_runs_immediately() {
    let store = TaskStore::new();
    let ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&ran);
    store.barrier(move || flag.store(true, Ordering::SeqCst));

    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn test_barrier_is_abandoned_when_store_is_disposed() {
    let store = Arc::new(TaskStore::new());

    store.submit(
        Box::new(|| thread::sleep(Duration::from_millis(300))),
        Instant::now(),
    );

    let worker = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            store.step(Instant::now() + Duration::from_secs(2));
        })
    };
    thread::sleep(Duration::from_millis(50));

    let ran = Arc::new(AtomicBool::new(false));
    let waiter = {
        let store = Arc::clone(&store);
        let flag = Arc::clone(&ran);
        thread::spawn(move || {
            store.barrier(move || flag.store(true, Ordering::SeqCst));
        })
    };
    thread::sleep(Duration::from_millis(50));

    // Disposal discards the in-band marker with everything else, so the
    // waiter gives up without running its callable.
    store.dispose();

    waiter.join().unwrap();
    assert!(!ran.load(Ordering::SeqCst));

    worker.join().unwrap();
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<&'static str>>,
}

impl StoreListener for Recorder {
    fn on_empty(&self) {
        self.events.lock().push("empty");
    }

    fn on_non_empty(&self) {
        self.events.lock().push("non_empty");
    }
}

#[test]
fn test_listener_edges_alternate() {
    let store = TaskStore::new();
    let recorder = Arc::new(Recorder::default());
    store.set_listener(Some(Arc::clone(&recorder) as Arc<dyn StoreListener>));

    store.submit(noop(), Instant::now());
    store.flush();
    store.submit(noop(), Instant::now());
    store.flush();

    assert_eq!(
        *recorder.events.lock(),
        vec!["non_empty", "empty", "non_empty", "empty"]
    );
}

#[test]
fn test_cancel_does_not_emit_an_empty_edge() {
    let store = TaskStore::new();
    let recorder = Arc::new(Recorder::default());
    store.set_listener(Some(Arc::clone(&recorder) as Arc<dyn StoreListener>));

    let s = store.submit(noop(), Instant::now());
    store.cancel(s.id);
    assert_eq!(*recorder.events.lock(), vec!["non_empty"]);

    // The empty flag only resets on the step path, so the next submission
    // is silent too.
    store.submit(noop(), Instant::now());
    assert_eq!(*recorder.events.lock(), vec!["non_empty"]);

    store.flush();
    assert_eq!(*recorder.events.lock(), vec!["non_empty", "empty"]);
}

#[test]
fn test_replacing_the_listener_redirects_events() {
    let store = TaskStore::new();
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());

    store.set_listener(Some(Arc::clone(&first) as Arc<dyn StoreListener>));
    store.set_listener(Some(Arc::clone(&second) as Arc<dyn StoreListener>));
    assert!(store.listener().is_some());

    store.submit(noop(), Instant::now());

    assert!(first.events.lock().is_empty());
    assert_eq!(*second.events.lock(), vec!["non_empty"]);
}

#[test]
fn test_dispose_releases_waiters() {
    let store = Arc::new(TaskStore::new());

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let ran = store.step(Instant::now() + Duration::from_secs(10));
            let _ = tx.send(ran);
        })
    };

    thread::sleep(Duration::from_millis(50));
    store.dispose();

    assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(false));
    waiter.join().unwrap();
}

#[test]
fn test_dispose_is_idempotent() {
    let store = TaskStore::new();
    store.submit(noop(), Instant::now());

    store.dispose();
    store.dispose();

    assert!(store.is_disposed());
    assert!(store.submit(noop(), Instant::now()).id.is_null());
}
