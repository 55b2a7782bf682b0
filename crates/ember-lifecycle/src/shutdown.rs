//! Race-safe shutdown and restart.
//!
//! Shutdown can be requested at the same time by an operator command, a
//! fatal-error handler or an OS signal. The first request flips the lifecycle
//! state and starts a single shutdown worker thread; later requests receive a
//! handle to that same worker and observe the same report.
//!
//! The worker runs a fixed sequence of best-effort steps. A failing or
//! panicking step is logged and recorded, and the remaining steps still run.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::context::ServerContext;
use crate::error::{CollaboratorResult, LifecycleState};

/// Step names, in execution order.
pub mod steps {
    pub const SAY_BYE: &str = "say-bye";
    pub const CLOSE_LISTENER: &str = "close-listener";
    pub const DISCONNECT_SESSIONS: &str = "disconnect-sessions";
    pub const KICK_PENDING: &str = "kick-pending";
    pub const NOTIFY_SHUTDOWN: &str = "notify-shutdown";
    pub const UNLOAD_PLUGINS: &str = "unload-plugins";
    pub const SAVE_WORLDS: &str = "save-worlds";
    pub const FLUSH_LOGS: &str = "flush-logs";
    pub const TERMINATE: &str = "terminate";
}

/// Shown to players when the server goes down for an update.
pub const UPDATE_MESSAGE: &str = "Updating Server...";

/// Why the process is going down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownKind {
    /// Exit normally.
    Stop,
    /// Replace the process with a fresh one.
    Restart,
    /// A newer version is available; restart into it.
    Update,
}

impl ShutdownKind {
    /// Whether the process is replaced instead of exiting.
    pub fn restarts(&self) -> bool {
        !matches!(self, ShutdownKind::Stop)
    }

    /// Message players are disconnected with.
    ///
    /// Updates use a fixed message whatever the request reason was.
    pub fn disconnect_message<'a>(&self, reason: &'a str) -> &'a str {
        match self {
            ShutdownKind::Update => UPDATE_MESSAGE,
            _ => reason,
        }
    }

    /// Whether the farewell broadcast is sent. Updates go down silently.
    fn says_bye(&self) -> bool {
        !matches!(self, ShutdownKind::Update)
    }
}

impl std::fmt::Display for ShutdownKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownKind::Stop => write!(f, "stop"),
            ShutdownKind::Restart => write!(f, "restart"),
            ShutdownKind::Update => write!(f, "update"),
        }
    }
}

/// Broadcast when a shutdown begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownNotice {
    pub kind: ShutdownKind,
    pub reason: String,
}

/// Result of one shutdown step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: &'static str,
    pub error: Option<String>,
}

/// What the shutdown worker did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub kind: ShutdownKind,
    pub reason: String,
    pub steps: Vec<StepOutcome>,
    /// Whether the autoload list was rewritten.
    pub autoload_written: bool,
}

impl ShutdownReport {
    fn new(kind: ShutdownKind, reason: &str) -> Self {
        Self {
            kind,
            reason: reason.to_string(),
            steps: Vec::new(),
            autoload_written: false,
        }
    }

    /// Names of the steps that failed.
    pub fn failed_steps(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter(|s| s.error.is_some())
            .map(|s| s.step)
            .collect()
    }

    /// Names of every step that ran, in order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.step).collect()
    }

    /// Outcome of a step, if it ran.
    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == name)
    }
}

/// Handle to the single shutdown worker.
#[derive(Debug)]
pub struct ShutdownHandle {
    kind: ShutdownKind,
    reason: String,
    report: Mutex<Option<ShutdownReport>>,
    done: Condvar,
}

impl ShutdownHandle {
    fn new(kind: ShutdownKind, reason: String) -> Self {
        Self {
            kind,
            reason,
            report: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    /// Kind of the request that won the entry guard.
    pub fn kind(&self) -> ShutdownKind {
        self.kind
    }

    /// Reason of the request that won the entry guard.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Check if the worker has finished.
    pub fn is_complete(&self) -> bool {
        self.report.lock().is_some()
    }

    /// Block until the worker finishes.
    ///
    /// When the final step exits or replaces the process this never returns.
    pub fn wait(&self) -> ShutdownReport {
        let mut report = self.report.lock();
        loop {
            if let Some(report) = report.as_ref() {
                return report.clone();
            }
            self.done.wait(&mut report);
        }
    }

    /// Block until the worker finishes or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ShutdownReport> {
        let mut report = self.report.lock();
        if report.is_none() {
            self.done.wait_while_for(&mut report, |r| r.is_none(), timeout);
        }
        report.clone()
    }

    fn complete(&self, report: ShutdownReport) {
        *self.report.lock() = Some(report);
        self.done.notify_all();
    }
}

/// Entry guard for shutdown requests.
pub struct ShutdownCoordinator {
    active: Mutex<Option<Arc<ShutdownHandle>>>,
    notices: broadcast::Sender<ShutdownNotice>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(4);
        Self {
            active: Mutex::new(None),
            notices,
        }
    }

    /// The in-flight or finished shutdown, if any.
    pub fn handle(&self) -> Option<Arc<ShutdownHandle>> {
        self.active.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownNotice> {
        self.notices.subscribe()
    }

    pub(crate) fn begin(
        &self,
        ctx: &Arc<ServerContext>,
        kind: ShutdownKind,
        reason: String,
    ) -> Arc<ShutdownHandle> {
        let handle = {
            let mut active = self.active.lock();
            if let Some(existing) = active.as_ref() {
                info!(
                    "Shutdown ({}) already in progress; ignoring {} request",
                    existing.kind(),
                    kind
                );
                return Arc::clone(existing);
            }

            if let Err(e) = ctx
                .state
                .transition(LifecycleState::Running, LifecycleState::ShuttingDown)
            {
                warn!("Unexpected lifecycle state at shutdown: {}", e);
            }
            let handle = Arc::new(ShutdownHandle::new(kind, reason));
            *active = Some(Arc::clone(&handle));
            handle
        };

        let _ = self.notices.send(ShutdownNotice {
            kind,
            reason: handle.reason().to_string(),
        });

        let worker_ctx = Arc::clone(ctx);
        let worker_handle = Arc::clone(&handle);
        let spawned = thread::Builder::new()
            .name("ember-shutdown".to_string())
            .spawn(move || run_shutdown(&worker_ctx, &worker_handle));
        if let Err(e) = spawned {
            error!("Failed to spawn shutdown worker, shutting down inline: {}", e);
            run_shutdown(ctx, &handle);
        }
        handle
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn run_step<F>(report: &mut ShutdownReport, step: &'static str, f: F)
where
    F: FnOnce() -> CollaboratorResult,
{
    debug!("Shutdown step: {}", step);
    let result = panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|_| Err(format!("{} panicked", step).into()));

    let error = match result {
        Ok(()) => None,
        Err(e) => {
            error!("Shutdown step {} failed: {}", step, e);
            Some(e.to_string())
        }
    };
    report.steps.push(StepOutcome { step, error });
}

fn run_shutdown(ctx: &ServerContext, handle: &ShutdownHandle) {
    let kind = handle.kind();
    let reason = handle.reason();
    info!("Server shutting down ({}): {}", kind, reason);

    let mut report = ShutdownReport::new(kind, reason);
    let config = ctx.config();
    let message = kind.disconnect_message(reason);

    if config.say_bye && kind.says_bye() {
        run_step(&mut report, steps::SAY_BYE, || {
            ctx.sessions
                .broadcast(&format!("{} shutting down!", config.software_name));
            Ok(())
        });
    }

    run_step(&mut report, steps::CLOSE_LISTENER, || match ctx.take_listener() {
        Some(listener) => listener.close(),
        None => Ok(()),
    });

    run_step(&mut report, steps::DISCONNECT_SESSIONS, || {
        let mut failed = 0;
        for session in ctx.sessions.all_active() {
            if let Err(e) = ctx.sessions.disconnect(session, message) {
                warn!("Failed to disconnect session {}: {}", session, e);
                failed += 1;
            }
        }
        summarize(failed, "session(s) could not be disconnected")
    });

    run_step(&mut report, steps::KICK_PENDING, || {
        let packet = ctx.pending.encode_kick(message);
        let mut failed = 0;
        for connection in ctx.pending.all_pending() {
            if let Err(e) = ctx.pending.notify(connection, &packet) {
                debug!("Failed to kick pending connection {}: {}", connection, e);
                failed += 1;
            }
        }
        summarize(failed, "pending connection(s) could not be kicked")
    });

    run_step(&mut report, steps::NOTIFY_SHUTDOWN, || {
        let mut failed = 0;
        for observer in ctx.shutdown_observers() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                observer.on_shutting_down(kind, reason)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Shutdown observer failed: {}", e);
                    failed += 1;
                }
                Err(_) => {
                    warn!("Shutdown observer panicked");
                    failed += 1;
                }
            }
        }
        summarize(failed, "shutdown observer(s) failed")
    });

    run_step(&mut report, steps::UNLOAD_PLUGINS, || {
        let plugins = ctx.plugins.unload_all();
        summarize(plugins.failed.len(), "plugin(s) failed to unload")
    });

    let mut autoload_written = false;
    run_step(&mut report, steps::SAVE_WORLDS, || {
        save_worlds(ctx, &mut autoload_written)
    });
    report.autoload_written = autoload_written;

    run_step(&mut report, steps::FLUSH_LOGS, || {
        ctx.log_flusher.flush();
        Ok(())
    });

    if let Err(e) = ctx
        .state
        .transition(LifecycleState::ShuttingDown, LifecycleState::Stopped)
    {
        warn!("Unexpected lifecycle state at shutdown end: {}", e);
    }

    run_step(&mut report, steps::TERMINATE, || terminate(ctx, kind));
    handle.complete(report);
}

/// Save every changed world that keeps its changes and flush its change log,
/// then rewrite the autoload list if startup completed this run and the list
/// is not operator-locked. Unchanged worlds are still listed.
fn save_worlds(ctx: &ServerContext, autoload_written: &mut bool) -> CollaboratorResult {
    let mut failures = Vec::new();
    let mut autoload = Vec::new();

    for world in ctx.persistence.loaded_worlds() {
        if !world.save_changes {
            continue;
        }
        autoload.push(world.autoload_line());

        if !world.changed {
            debug!("World {} has no unsaved changes", world.name);
        } else if let Err(e) = ctx.persistence.save(&world) {
            warn!("Failed to save world {}: {}", world.name, e);
            failures.push(format!("{}: {}", world.name, e));
        }
        if let Err(e) = ctx.persistence.save_change_log(&world) {
            warn!("Failed to save change log of {}: {}", world.name, e);
            failures.push(format!("{} change log: {}", world.name, e));
        }
    }

    let config = ctx.config();
    if ctx.is_setup_finished() && !config.autoload_locked {
        write_autoload(&config.autoload_file, &autoload)?;
        *autoload_written = true;
        debug!("Wrote {} autoload entries", autoload.len());
    } else {
        debug!(
            "Autoload list left untouched (setup finished: {}, locked: {})",
            ctx.is_setup_finished(),
            config.autoload_locked
        );
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.join("; ").into())
    }
}

fn write_autoload(path: &Path, lines: &[String]) -> CollaboratorResult {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut contents = lines.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    fs::write(path, contents)?;
    Ok(())
}

fn terminate(ctx: &ServerContext, kind: ShutdownKind) -> CollaboratorResult {
    if !kind.restarts() {
        ctx.process.exit(0);
        return Ok(());
    }

    let (path, args) = ctx.config().restart_command()?;
    if let Err(e) = ctx.process.replace_process(&path, &args) {
        error!("Restart failed: {}", e);
        ctx.process.exit(1);
        return Err(e.into());
    }
    Ok(())
}

fn summarize(failed: usize, what: &str) -> CollaboratorResult {
    if failed == 0 {
        Ok(())
    } else {
        Err(format!("{} {}", failed, what).into())
    }
}

#[cfg(test)]
#[path = "shutdown_tests.rs"]
mod tests;
