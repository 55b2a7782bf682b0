//! Per-tier task queue.

use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::task::TaskHandle;

/// Insertion-ordered queue of tasks for one tier.
///
/// The lock is only held for short bookkeeping; dispatch iterates a
/// [`TaskQueue::snapshot`] so actions may add or remove tasks while running.
#[derive(Default)]
pub struct TaskQueue {
    tasks: Mutex<Vec<TaskHandle>>,
}

impl TaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task.
    pub fn add(&self, task: TaskHandle) {
        debug!("Task {} ({}) queued", task.name(), task.id());
        self.tasks.lock().push(task);
    }

    /// Remove a task by ID. Returns `true` if it was queued.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|t| t.id() != id);
        before != tasks.len()
    }

    /// Point-in-time copy of the queued tasks, in insertion order.
    pub fn snapshot(&self) -> Vec<TaskHandle> {
        self.tasks.lock().clone()
    }

    /// Check if a task is still queued.
    pub fn contains(&self, id: Uuid) -> bool {
        self.tasks.lock().iter().any(|t| t.id() == id)
    }

    /// Earliest `next_run` among tasks that are not cancelled.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks
            .lock()
            .iter()
            .filter(|t| !t.is_cancelled())
            .map(|t| t.next_run())
            .min()
    }

    /// Drop cancelled tasks. Returns how many were removed.
    pub fn purge_cancelled(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|t| !t.is_cancelled());
        before - tasks.len()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Remove every task.
    pub fn clear(&self) {
        self.tasks.lock().clear();
    }
}

#[cfg(test)]
#[path = "task_queue_tests.rs"]
mod tests;
