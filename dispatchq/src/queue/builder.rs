use crate::queue::{default_worker_threads, Handle, PoolQueue, QosClass, SerialQueue};
use anyhow::{anyhow, Result};

#[derive(Debug, Clone, Copy)]
enum Kind {
    Serial,
    Pool,
}

/// Configures and creates a queue of either shape.
///
/// # Examples
///
/// ```
/// use dispatchq::{Builder, QosClass};
///
/// let queue = Builder::new_pool()
///     .name("render")
///     .worker_threads(4)
///     .qos(QosClass::High)
///     .try_build()
///     .unwrap();
///
/// queue.spawn(|| { /* ... */ });
/// queue.flush_and_teardown();
/// ```
#[derive(Debug)]
pub struct Builder {
    kind: Kind,

    /// Queue name; worker threads inherit it.
    name: String,

    /// Advisory worker priority.
    qos: QosClass,

    /// Worker count for pool queues. Defaults to the machine's available
    /// parallelism. Serial queues always run exactly one worker.
    worker_threads: Option<usize>,
}

impl Builder {
    fn new(kind: Kind) -> Builder {
        Builder {
            kind,
            name: "dispatchq".into(),
            qos: QosClass::default(),
            worker_threads: None,
        }
    }

    /// Returns a builder for a single-worker FIFO queue.
    pub fn new_serial() -> Builder {
        Builder::new(Kind::Serial)
    }

    /// Returns a builder for a fixed-size worker pool.
    pub fn new_pool() -> Builder {
        Builder::new(Kind::Pool)
    }

    pub fn name(mut self, val: impl Into<String>) -> Self {
        self.name = val.into();
        self
    }

    pub fn qos(mut self, val: QosClass) -> Self {
        self.qos = val;
        self
    }

    /// Sets the worker count for a pool queue.
    ///
    /// # Panics
    ///
    /// Panics if 0 is passed as an argument.
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "worker threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    /// Validates the configuration and creates the queue. Pool workers are
    /// spawned eagerly; a serial queue's worker starts with its first
    /// submission.
    pub fn try_build(self) -> Result<Handle> {
        match self.kind {
            Kind::Serial => {
                if self.worker_threads.is_some_and(|n| n > 1) {
                    return Err(anyhow!("a serial queue runs exactly one worker"));
                }
                Ok(Handle::Serial(SerialQueue::new(self.name, self.qos)))
            }
            Kind::Pool => {
                let threads = self.worker_threads.unwrap_or_else(default_worker_threads);
                Ok(Handle::Pool(PoolQueue::new_with(self.name, threads, self.qos)))
            }
        }
    }
}
