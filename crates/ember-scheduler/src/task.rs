//! Scheduled task definitions.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{TaskError, TaskResult};

/// Shared handle to a scheduled task.
///
/// Handles are cheap to clone; any thread holding one may inspect, reschedule,
/// or cancel the task.
pub type TaskHandle = Arc<ScheduledTask>;

/// Fallback horizon used when `base + delay` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

type TaskAction = Box<dyn FnMut(&TaskHandle) -> TaskResult + Send>;

#[derive(Debug, Clone, Copy)]
struct TaskTiming {
    delay: Duration,
    next_run: Instant,
}

/// A task queued on one scheduler tier.
pub struct ScheduledTask {
    id: Uuid,
    name: String,
    repeating: bool,
    cancelled: AtomicBool,
    timing: Mutex<TaskTiming>,
    action: Mutex<TaskAction>,
    run_count: AtomicU64,
    failure_count: AtomicU64,
}

impl ScheduledTask {
    /// Create a task that runs once after `delay`.
    pub fn once<F>(name: impl Into<String>, delay: Duration, action: F) -> TaskHandle
    where
        F: FnOnce(&TaskHandle) -> TaskResult + Send + 'static,
    {
        let mut slot = Some(action);
        let action: TaskAction = Box::new(move |task| match slot.take() {
            Some(action) => action(task),
            None => Ok(()),
        });
        Self::build(name.into(), delay, false, action)
    }

    /// Create a task that first runs after `interval` and then every `delay`.
    ///
    /// The action may change its own delay through [`ScheduledTask::set_delay`];
    /// the new value is used when the scheduler computes the next run.
    pub fn repeating<F>(name: impl Into<String>, interval: Duration, action: F) -> TaskHandle
    where
        F: FnMut(&TaskHandle) -> TaskResult + Send + 'static,
    {
        Self::build(name.into(), interval, true, Box::new(action))
    }

    fn build(name: String, delay: Duration, repeating: bool, action: TaskAction) -> TaskHandle {
        Arc::new(Self {
            id: Uuid::new_v4(),
            name,
            repeating,
            cancelled: AtomicBool::new(false),
            timing: Mutex::new(TaskTiming {
                delay,
                next_run: deadline_after(Instant::now(), delay),
            }),
            action: Mutex::new(action),
            run_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        })
    }

    /// Unique task ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Human-readable task name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task runs again after each dispatch.
    pub fn is_repeating(&self) -> bool {
        self.repeating
    }

    /// Current delay between runs.
    pub fn delay(&self) -> Duration {
        self.timing.lock().delay
    }

    /// Change the delay used for the next reschedule.
    ///
    /// Does not move the pending `next_run`; see [`ScheduledTask::reschedule`].
    pub fn set_delay(&self, delay: Duration) {
        self.timing.lock().delay = delay;
    }

    /// Absolute time of the next intended run.
    pub fn next_run(&self) -> Instant {
        self.timing.lock().next_run
    }

    /// Move the next run to an absolute time.
    pub fn set_next_run(&self, next_run: Instant) {
        self.timing.lock().next_run = next_run;
    }

    /// Set the delay and move the next run to `now + delay`.
    ///
    /// A sleeping scheduler keeps its stale deadline until it is rechecked.
    pub fn reschedule(&self, delay: Duration) {
        let mut timing = self.timing.lock();
        timing.delay = delay;
        timing.next_run = deadline_after(Instant::now(), delay);
    }

    /// Mark the task cancelled. It will not be dispatched again.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if the task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Number of times the action has been invoked.
    pub fn run_count(&self) -> u64 {
        self.run_count.load(Ordering::Relaxed)
    }

    /// Number of invocations that returned an error or panicked.
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.timing.lock().next_run <= now
    }

    /// Invoke the action, turning a panic into a task error.
    pub(crate) fn invoke(self: &Arc<Self>) -> TaskResult {
        self.run_count.fetch_add(1, Ordering::Relaxed);

        let result = {
            let mut guard = self.action.lock();
            let action: &mut TaskAction = &mut guard;
            panic::catch_unwind(AssertUnwindSafe(|| action(self)))
                .unwrap_or_else(|payload| Err(panic_to_error(payload)))
        };

        if result.is_err() {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Compute the next run from the dispatch time and the post-action delay.
    pub(crate) fn advance(&self, dispatched_at: Instant) {
        let mut timing = self.timing.lock();
        timing.next_run = deadline_after(dispatched_at, timing.delay);
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let timing = *self.timing.lock();
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("repeating", &self.repeating)
            .field("cancelled", &self.is_cancelled())
            .field("delay", &timing.delay)
            .field("next_run", &timing.next_run)
            .finish()
    }
}

/// `base + delay`, clamped to a far-future instant on overflow.
pub(crate) fn deadline_after(base: Instant, delay: Duration) -> Instant {
    base.checked_add(delay)
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}

fn panic_to_error(payload: Box<dyn std::any::Any + Send>) -> TaskError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    format!("task panicked: {}", message).into()
}
