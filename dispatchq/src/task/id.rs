use std::fmt;

/// An ID that uniquely identifies a task relative to all other tasks
/// submitted to the same [`TaskStore`](crate::store::TaskStore).
///
/// Valid ids start at 1 and grow monotonically with each submission; they
/// are never recycled. [`TaskId::NULL`] (zero) is the sentinel handed back
/// when a submission was dropped because its store was already disposed.
///
/// # Notes
///
/// - Ids order by submission: for two tasks on the same store, the one
///   submitted later compares greater.
/// - An id stays valid as a cancellation handle until the task starts
///   executing; cancelling afterwards is a silent no-op.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct TaskId(pub(crate) i64);

impl TaskId {
    /// The reserved "no task" sentinel.
    pub const NULL: TaskId = TaskId(0);

    /// Whether this is the [`NULL`](Self::NULL) sentinel.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sentinel() {
        assert!(TaskId::NULL.is_null());
        assert!(TaskId::default().is_null());
        assert!(!TaskId(1).is_null());
        assert_eq!(TaskId::NULL.as_i64(), 0);
    }

    #[test]
    fn test_ids_order_by_value() {
        assert!(TaskId(1) < TaskId(2));
        assert!(TaskId::NULL < TaskId(1));
        assert_eq!(format!("{}", TaskId(42)), "42");
    }
}
