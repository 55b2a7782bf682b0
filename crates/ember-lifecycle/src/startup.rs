//! Ordered startup pipeline.
//!
//! Startup jobs are admitted to the Background tier in dependency order and
//! drained in FIFO order by its single thread. A failing job is logged and
//! the pipeline moves on; the last job marks setup as finished.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::context::ServerContext;
use crate::error::CollaboratorResult;

/// Name of the final job that marks setup finished.
pub const SETUP_FINISHED_JOB: &str = "setup-finished";

type StartupJob = Box<dyn FnOnce(&Arc<ServerContext>) -> CollaboratorResult + Send>;

/// Builder for the startup job list.
#[derive(Default)]
pub struct StartupPipeline {
    jobs: Vec<(String, StartupJob)>,
}

impl StartupPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job. Jobs run in the order they are added.
    pub fn job<F>(mut self, name: impl Into<String>, job: F) -> Self
    where
        F: FnOnce(&Arc<ServerContext>) -> CollaboratorResult + Send + 'static,
    {
        self.jobs.push((name.into(), Box::new(job)));
        self
    }

    /// Job names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.jobs.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Queue every job on the Background tier, followed by the job that marks
    /// setup finished.
    pub fn admit(self, ctx: &Arc<ServerContext>) -> Arc<StartupProgress> {
        let progress = Arc::new(StartupProgress::default());
        let background = ctx.schedulers().background();
        info!("Admitting {} startup job(s)", self.jobs.len());

        for (name, job) in self.jobs {
            let ctx = Arc::clone(ctx);
            let progress = Arc::clone(&progress);
            background.queue_once(name.clone(), move |_| {
                run_job(&ctx, &progress, name, job);
                Ok(())
            });
        }

        let ctx = Arc::clone(ctx);
        let finished = Arc::clone(&progress);
        background.queue_once(SETUP_FINISHED_JOB, move |_| {
            if !ctx.is_running() {
                debug!("Shutdown began during startup; setup not marked finished");
                return Ok(());
            }
            ctx.mark_setup_finished();
            finished.finished.store(true, Ordering::SeqCst);
            info!("Finished setting up server");
            Ok(())
        });

        progress
    }
}

fn run_job(ctx: &Arc<ServerContext>, progress: &StartupProgress, name: String, job: StartupJob) {
    if !ctx.is_running() {
        debug!("Skipping startup job {}: server is shutting down", name);
        progress.skipped.lock().push(name);
        return;
    }

    debug!("Running startup job {}", name);
    let result = panic::catch_unwind(AssertUnwindSafe(|| job(ctx)))
        .unwrap_or_else(|_| Err(format!("startup job {} panicked", name).into()));

    match result {
        Ok(()) => progress.completed.lock().push(name),
        Err(e) => {
            error!("Startup job {} failed: {}", name, e);
            progress.failed.lock().push((name, e.to_string()));
        }
    }
}

/// Progress of an admitted pipeline.
#[derive(Debug, Default)]
pub struct StartupProgress {
    completed: Mutex<Vec<String>>,
    failed: Mutex<Vec<(String, String)>>,
    skipped: Mutex<Vec<String>>,
    finished: AtomicBool,
}

impl StartupProgress {
    /// Jobs that completed, in run order.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    /// Jobs that failed, with their error.
    pub fn failed(&self) -> Vec<(String, String)> {
        self.failed.lock().clone()
    }

    /// Jobs skipped because shutdown began first.
    pub fn skipped(&self) -> Vec<String> {
        self.skipped.lock().clone()
    }

    /// Check if the final job ran and marked setup finished.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}
