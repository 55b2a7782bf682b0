//! Dispatch loop executed on each tier's thread.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, error, trace};

use crate::scheduler::Scheduler;
use crate::task::TaskHandle;

impl Scheduler {
    /// Thread body: dispatch due tasks, then sleep until the next deadline.
    pub(crate) fn run_loop(&self) {
        debug!("{} scheduler thread running", self.tier);

        loop {
            if self.wake.lock().stopping {
                break;
            }
            self.dispatch_due();
            if !self.wait_for_next() {
                break;
            }
        }

        debug!("{} scheduler thread exiting", self.tier);
    }

    /// Run every due task from a snapshot of the queue, in queue order.
    pub(crate) fn dispatch_due(&self) {
        for task in self.queue.snapshot() {
            if self.wake.lock().stopping {
                return;
            }

            // Cancellation or removal by an earlier action in this cycle.
            if task.is_cancelled() || !self.queue.contains(task.id()) {
                self.queue.remove(task.id());
                continue;
            }

            let now = Instant::now();
            if !task.is_due(now) {
                continue;
            }
            self.dispatch(&task, now);
        }
    }

    fn dispatch(&self, task: &TaskHandle, dispatched_at: Instant) {
        trace!("{} tier dispatching {} ({})", self.tier, task.name(), task.id());

        if let Err(e) = task.invoke() {
            error!(
                "Task {} ({}) failed on {} tier: {}",
                task.name(),
                task.id(),
                self.tier,
                e
            );
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        if task.is_repeating() && !task.is_cancelled() {
            task.advance(dispatched_at);
        } else {
            self.queue.remove(task.id());
        }
    }

    /// Block until a task may be due, a recheck arrives, or the tier stops.
    ///
    /// Returns `false` when the scheduler is stopping.
    fn wait_for_next(&self) -> bool {
        let mut wake = self.wake.lock();
        loop {
            if wake.stopping {
                return false;
            }
            if wake.recheck {
                wake.recheck = false;
                return true;
            }

            match self.queue.next_deadline() {
                Some(deadline) => {
                    if deadline <= Instant::now() {
                        return true;
                    }
                    if self.wake_cond.wait_until(&mut wake, deadline).timed_out() {
                        return true;
                    }
                }
                None => self.wake_cond.wait(&mut wake),
            }
        }
    }
}
