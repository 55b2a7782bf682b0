//! Expiry-driven rescheduling.
//!
//! An [`ExpiryWatch`] owns one repeating task per expiry list. The task's delay
//! always equals the time until the earliest pending record expires. When it
//! fires it hands every expired record to the list's callback, drops the
//! records whose callback succeeded, persists the list, and recomputes its own
//! delay from what remains.
//!
//! Code that adds a record from outside the task must call
//! [`ExpiryWatch::recalculate`]; otherwise the tier keeps sleeping on the old
//! deadline.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::TaskResult;
use crate::expiry::{self, ExpiryRecord};
use crate::expiry_list::ExpiryList;
use crate::scheduler::Scheduler;
use crate::task::TaskHandle;

/// Callback invoked for each expired record.
pub type ExpiryCallback = Box<dyn Fn(&ExpiryRecord) -> TaskResult + Send + Sync>;

/// Outcome of one expiry scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryScan {
    /// Expired records whose callback succeeded and which were removed.
    pub removed: usize,
    /// Expired records whose callback failed; they stay for a retry.
    pub failed: usize,
    /// Lines that did not parse.
    pub skipped: usize,
    /// Delay until the next scan.
    pub next_delay: Duration,
}

/// Watches one expiry list from a repeating task.
pub struct ExpiryWatch {
    list: Arc<ExpiryList>,
    scheduler: Arc<Scheduler>,
    callback: ExpiryCallback,
    task: Mutex<Option<TaskHandle>>,
}

impl ExpiryWatch {
    /// Create a watch. Nothing is scheduled until [`ExpiryWatch::start`].
    pub fn new<F>(list: Arc<ExpiryList>, scheduler: Arc<Scheduler>, callback: F) -> Arc<Self>
    where
        F: Fn(&ExpiryRecord) -> TaskResult + Send + Sync + 'static,
    {
        Arc::new(Self {
            list,
            scheduler,
            callback: Box::new(callback),
            task: Mutex::new(None),
        })
    }

    /// Queue the watch task with a delay computed from the current list.
    ///
    /// Calling this again replaces the previous task.
    pub fn start(self: &Arc<Self>) -> TaskHandle {
        let watch = Arc::clone(self);
        let name = format!("{}-expiry", self.list.name());

        let lines = self.list.lock();
        let delay = expiry::next_delay(lines.iter(), Utc::now());
        let task = self
            .scheduler
            .queue_repeat(name, delay, move |task| watch.fire(task));
        drop(lines);

        if let Some(previous) = self.task.lock().replace(Arc::clone(&task)) {
            self.scheduler.cancel(&previous);
        }
        info!(
            "Watching {} expiries on {} tier, next check in {:?}",
            self.list.name(),
            self.scheduler.tier(),
            delay
        );
        task
    }

    /// The list being watched.
    pub fn list(&self) -> &Arc<ExpiryList> {
        &self.list
    }

    /// The watch task, once started.
    pub fn task(&self) -> Option<TaskHandle> {
        self.task.lock().clone()
    }

    /// Recompute the watch delay from the list and wake the tier.
    ///
    /// Call after adding or removing records outside the watch task.
    pub fn recalculate(&self) {
        let Some(task) = self.task() else {
            return;
        };
        let delay = {
            let lines = self.list.lock();
            let delay = expiry::next_delay(lines.iter(), Utc::now());
            task.reschedule(delay);
            delay
        };
        self.scheduler.recheck();
        debug!("{} expiry rescheduled in {:?}", self.list.name(), delay);
    }

    /// Cancel the watch task.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            self.scheduler.cancel(&task);
        }
    }

    fn fire(&self, task: &TaskHandle) -> TaskResult {
        self.scan_with(Utc::now(), |delay| task.set_delay(delay));
        Ok(())
    }

    /// Run one scan at `now`.
    ///
    /// Callbacks run without the list lock held so they may touch the list.
    /// Removal, persistence and the delay computation then happen under a
    /// single hold of the lock.
    pub fn scan(&self, now: DateTime<Utc>) -> ExpiryScan {
        self.scan_with(now, |_| {})
    }

    /// Scan, then hand the new delay to `apply` while the list lock is still
    /// held, so a concurrent [`ExpiryWatch::recalculate`] lands after it.
    fn scan_with(&self, now: DateTime<Utc>, apply: impl FnOnce(Duration)) -> ExpiryScan {
        let snapshot = self.list.lines();
        let mut scan = ExpiryScan::default();
        let mut handled = Vec::new();

        for line in &snapshot {
            let record = match ExpiryRecord::parse(line) {
                Ok(record) => record,
                Err(e) => {
                    debug!("Skipping {} record {:?}: {}", self.list.name(), line, e);
                    scan.skipped += 1;
                    continue;
                }
            };
            if !record.is_expired(now) {
                continue;
            }

            match (self.callback)(&record) {
                Ok(()) => handled.push(line.clone()),
                Err(e) => {
                    warn!(
                        "Expiry of {} record for {} failed: {}",
                        self.list.name(),
                        record.subject,
                        e
                    );
                    scan.failed += 1;
                }
            }
        }

        let mut lines = self.list.lock();
        for line in &handled {
            if let Some(index) = lines.iter().position(|l| l == line) {
                lines.remove(index);
                scan.removed += 1;
            }
        }
        if scan.removed > 0 {
            if let Err(e) = self.list.save_locked(&lines) {
                warn!("Failed to save {} list: {}", self.list.name(), e);
            }
            info!("Expired {} {} record(s)", scan.removed, self.list.name());
        }
        scan.next_delay = expiry::next_delay(lines.iter(), now);
        apply(scan.next_delay);
        scan
    }
}

#[cfg(test)]
#[path = "expiry_watch_tests.rs"]
mod tests;
