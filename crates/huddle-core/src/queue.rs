//! Ordered queue of work items awaiting estimation.

use huddle_protocol::WorkItem;
use std::collections::VecDeque;

/// The session's work queue. The front item is the one being estimated.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    items: VecDeque<WorkItem>,
}

impl WorkQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue contents.
    pub fn load(&mut self, items: impl IntoIterator<Item = WorkItem>) {
        self.items = items.into_iter().collect();
    }

    /// The active item, if any.
    #[must_use]
    pub fn current(&self) -> Option<&WorkItem> {
        self.items.front()
    }

    /// Move the active item to the back.
    pub fn skip(&mut self) {
        if !self.items.is_empty() {
            self.items.rotate_left(1);
        }
    }

    /// Remove and return the active item.
    pub fn pop_front(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids in queue order.
    #[must_use]
    pub fn ids(&self) -> Vec<u64> {
        self.items.iter().map(|i| i.id).collect()
    }
}
