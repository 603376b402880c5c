//! Admission scheduler.
//!
//! Each engine is an [`AdmissionTarget`]. After every state change the engine
//! calls [`admit`], which walks the pending tasks in insertion order and starts
//! them while the engine has room. Admission is FIFO with no priorities.

mod budget;

pub use budget::ConcurrencyLimit;

use crate::task::TaskId;
use std::collections::HashSet;

/// Engine-side hooks the scheduler needs.
pub trait AdmissionTarget {
    /// Tasks currently holding a transfer slot.
    fn active_count(&self) -> usize;

    /// Maximum active tasks, `None` when the engine has no cap.
    fn concurrency_limit(&self) -> Option<usize>;

    /// Pending task ids in insertion order.
    fn pending_ids(&self) -> Vec<TaskId>;

    /// Try to start `id`. A start that cannot proceed leaves the task in some
    /// other status (e.g. `error`); the scheduler does not retry it.
    fn start(&mut self, id: &TaskId);
}

/// Start pending tasks until none remain or the engine is at its limit.
/// Returns how many starts were attempted.
pub fn admit<T: AdmissionTarget + ?Sized>(target: &mut T) -> usize {
    let mut tried = HashSet::new();
    loop {
        if let Some(limit) = target.concurrency_limit() {
            if target.active_count() >= limit {
                break;
            }
        }
        let next = target
            .pending_ids()
            .into_iter()
            .find(|id| !tried.contains(id));
        let Some(id) = next else {
            break;
        };
        tracing::debug!("admitting task {}", id);
        target.start(&id);
        tried.insert(id);
    }
    tried.len()
}
