//! Tier scheduler: one queue, one dedicated dispatch thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult, TaskResult};
use crate::task::{ScheduledTask, TaskHandle};
use crate::task_queue::TaskQueue;
use crate::tier::Tier;

/// Wake-up bookkeeping guarded by the scheduler's wake lock.
#[derive(Debug, Default)]
pub(crate) struct WakeState {
    /// Set by [`Scheduler::recheck`]; consumed by the dispatch thread.
    pub(crate) recheck: bool,
    /// Set once by [`Scheduler::stop`].
    pub(crate) stopping: bool,
}

/// Scheduler for a single tier.
///
/// The dispatch thread sleeps until the earliest `next_run` in the queue or
/// until [`Scheduler::recheck`] is called, then runs every due task from a
/// snapshot of the queue. Task failures are logged and never stop the loop.
pub struct Scheduler {
    pub(crate) tier: Tier,
    pub(crate) queue: TaskQueue,
    pub(crate) wake: Mutex<WakeState>,
    pub(crate) wake_cond: Condvar,
    pub(crate) dispatched: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler and spawn its dispatch thread.
    pub fn start(tier: Tier) -> SchedulerResult<Arc<Self>> {
        let scheduler = Arc::new(Self {
            tier,
            queue: TaskQueue::new(),
            wake: Mutex::new(WakeState::default()),
            wake_cond: Condvar::new(),
            dispatched: AtomicU64::new(0),
            thread: Mutex::new(None),
        });

        let worker = Arc::clone(&scheduler);
        let handle = thread::Builder::new()
            .name(tier.thread_name())
            .spawn(move || worker.run_loop())
            .map_err(|source| SchedulerError::ThreadSpawn { tier, source })?;
        *scheduler.thread.lock() = Some(handle);

        info!("{} scheduler started", tier);
        Ok(scheduler)
    }

    /// The tier this scheduler serves.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// The tier's task queue.
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Total number of task dispatches performed.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Check if the dispatch thread has not been asked to stop.
    pub fn is_running(&self) -> bool {
        !self.wake.lock().stopping
    }

    /// Queue an already-built task and wake the dispatch thread.
    pub fn add(&self, task: TaskHandle) -> TaskHandle {
        if !self.is_running() {
            warn!(
                "{} scheduler is stopped; task {} will not run",
                self.tier,
                task.name()
            );
            return task;
        }
        self.queue.add(Arc::clone(&task));
        self.recheck();
        task
    }

    /// Like [`Scheduler::add`], but reports a stopped scheduler as an error.
    pub fn try_add(&self, task: TaskHandle) -> SchedulerResult<TaskHandle> {
        if !self.is_running() {
            return Err(SchedulerError::Stopped(self.tier));
        }
        Ok(self.add(task))
    }

    /// Queue a job that runs once, as soon as the tier gets to it.
    ///
    /// Jobs queued this way on one tier run in the order they were queued.
    pub fn queue_once<F>(&self, name: impl Into<String>, job: F) -> TaskHandle
    where
        F: FnOnce(&TaskHandle) -> TaskResult + Send + 'static,
    {
        self.add(ScheduledTask::once(name, Duration::ZERO, job))
    }

    /// Queue a job that runs once after `delay`.
    pub fn queue_once_after<F>(&self, name: impl Into<String>, delay: Duration, job: F) -> TaskHandle
    where
        F: FnOnce(&TaskHandle) -> TaskResult + Send + 'static,
    {
        self.add(ScheduledTask::once(name, delay, job))
    }

    /// Queue a job that runs every `interval`, first after one interval.
    pub fn queue_repeat<F>(&self, name: impl Into<String>, interval: Duration, job: F) -> TaskHandle
    where
        F: FnMut(&TaskHandle) -> TaskResult + Send + 'static,
    {
        self.add(ScheduledTask::repeating(name, interval, job))
    }

    /// Cancel a task. It will never be dispatched again.
    ///
    /// Returns `true` if the task was still queued on this tier.
    pub fn cancel(&self, task: &TaskHandle) -> bool {
        task.cancel();
        let removed = self.queue.remove(task.id());
        if removed {
            debug!("Task {} cancelled on {} tier", task.name(), self.tier);
        }
        removed
    }

    /// Wake the dispatch thread so it re-evaluates due tasks and deadlines.
    ///
    /// Needed after changing a queued task's timing from outside its action.
    pub fn recheck(&self) {
        let mut wake = self.wake.lock();
        wake.recheck = true;
        self.wake_cond.notify_one();
    }

    /// Stop the dispatch thread.
    ///
    /// Waits for the thread to exit unless called from the thread itself.
    /// Queued tasks are discarded.
    pub fn stop(&self) {
        {
            let mut wake = self.wake.lock();
            if wake.stopping {
                return;
            }
            wake.stopping = true;
            self.wake_cond.notify_one();
        }

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                debug!("{} scheduler stopped from its own thread", self.tier);
            } else if handle.join().is_err() {
                warn!("{} scheduler thread exited abnormally", self.tier);
            }
        }

        self.queue.clear();
        info!("{} scheduler stopped", self.tier);
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
