/// Edge-triggered observer of a store's pending set.
///
/// [`on_non_empty`](StoreListener::on_non_empty) fires when a submission
/// lands in an empty store and runs on the submitting thread.
/// [`on_empty`](StoreListener::on_empty) fires when a stepping worker finds
/// the store drained and runs on that worker. Cancellation never fires an
/// edge, even when it removes the last pending task, so the next submission
/// after such a cancellation is silent too — the empty flag only resets on
/// the step path.
///
/// Both callbacks execute while the store lock is held. A listener must not
/// call back into the store it is registered on; any such re-entry
/// deadlocks.
pub trait StoreListener: Send + Sync {
    /// The pending set drained to empty.
    fn on_empty(&self);

    /// A task landed in an empty pending set.
    fn on_non_empty(&self);
}
