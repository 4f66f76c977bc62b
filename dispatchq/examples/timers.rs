//! Delayed dispatch: a few timers on one queue, one cancelled before it
//! fires.

use dispatchq::{Builder, QosClass};
use std::thread;
use std::time::{Duration, Instant};

fn main() -> anyhow::Result<()> {
    let queue = Builder::new_serial()
        .name("timers")
        .qos(QosClass::Low)
        .try_build()?;

    let start = Instant::now();
    for ms in [50u64, 100, 150] {
        queue.spawn_after(
            move || println!("timer {ms}ms fired after {:?}", start.elapsed()),
            Duration::from_millis(ms),
        );
    }

    let id = queue.spawn_after(
        || println!("cancelled timer fired?!"),
        Duration::from_millis(120),
    );
    queue.cancel(id);

    thread::sleep(Duration::from_millis(250));
    queue.flush_and_teardown();
    Ok(())
}
