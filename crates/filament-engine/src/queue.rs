//! Pending-update work-list
//!
//! The update loop both drains this queue and appends to it (dependents
//! get enqueued while their source is being processed). Two explicit
//! buffers keep drain and append separate: pops come from the active
//! buffer, pushes land in the next buffer, and the buffers swap when the
//! active one empties. Order stays first-enqueued, first-drained across
//! the swap, and a membership set prevents double-enqueueing an instance
//! that is already awaiting its turn.

use std::collections::{HashSet, VecDeque};

use crate::instance::InstanceId;

/// Double-buffered FIFO of instances awaiting an update turn
#[derive(Debug, Default)]
pub(crate) struct UpdateQueue {
    active: VecDeque<InstanceId>,
    next: VecDeque<InstanceId>,
    queued: HashSet<InstanceId>,
}

impl UpdateQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueue an instance unless it is already waiting
    ///
    /// Returns `true` if the instance was newly enqueued.
    pub(crate) fn enqueue(&mut self, id: InstanceId) -> bool {
        if !self.queued.insert(id) {
            return false;
        }
        self.next.push_back(id);
        true
    }

    /// Pop the earliest-enqueued instance
    pub(crate) fn pop(&mut self) -> Option<InstanceId> {
        if self.active.is_empty() {
            std::mem::swap(&mut self.active, &mut self.next);
        }
        let id = self.active.pop_front()?;
        self.queued.remove(&id);
        Some(id)
    }

    /// Number of instances awaiting a turn
    pub(crate) fn len(&self) -> usize {
        self.queued.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }
}
