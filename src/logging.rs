//! Console and rolling file logging.

use std::path::Path;

use ember_lifecycle::LogFlusher;
use parking_lot::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keeps the non-blocking file writer alive until shutdown flushes it.
pub(crate) struct LogGuard {
    guard: Mutex<Option<WorkerGuard>>,
}

impl LogFlusher for LogGuard {
    fn flush(&self) {
        // Dropping the guard drains the writer thread.
        drop(self.guard.lock().take());
    }
}

/// Initialize tracing with console and file output.
///
/// Log files are written to `log_dir` with daily rotation, 30 files kept.
pub(crate) fn init_tracing(log_dir: &Path) -> Result<LogGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("ember")
        .filename_suffix("log")
        .max_log_files(30)
        .build(log_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()?;

    Ok(LogGuard {
        guard: Mutex::new(Some(guard)),
    })
}
