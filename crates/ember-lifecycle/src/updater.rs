//! Periodic update check.
//!
//! A repeating Main-tier task asks an [`UpdateSource`] for the latest released
//! version. When a newer version exists it is logged and announced to players
//! once per version. Nothing is downloaded here; an operator applies the update
//! and requests a [`crate::ShutdownKind::Update`] shutdown.

use std::sync::Arc;

use ember_scheduler::TaskHandle;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::context::ServerContext;
use crate::error::CollaboratorResult;

/// Where the latest released version is published.
pub trait UpdateSource: Send + Sync {
    /// Latest released version string, e.g. `"1.4.2"`.
    fn latest_version(&self) -> CollaboratorResult<String>;
}

/// Compare dotted numeric versions. Non-numeric parts compare as zero.
pub fn is_newer(latest: &str, current: &str) -> bool {
    fn parts(version: &str) -> Vec<u64> {
        version
            .trim()
            .trim_start_matches('v')
            .split('.')
            .map(|p| p.trim().parse().unwrap_or(0))
            .collect()
    }

    let (latest, current) = (parts(latest), parts(current));
    let len = latest.len().max(current.len());
    for i in 0..len {
        let a = latest.get(i).copied().unwrap_or(0);
        let b = current.get(i).copied().unwrap_or(0);
        if a != b {
            return a > b;
        }
    }
    false
}

/// Checks for updates on a fixed interval.
pub struct UpdateChecker {
    current_version: String,
    source: Arc<dyn UpdateSource>,
    announced: Mutex<Option<String>>,
}

impl UpdateChecker {
    pub fn new(current_version: impl Into<String>, source: Arc<dyn UpdateSource>) -> Self {
        Self {
            current_version: current_version.into(),
            source,
            announced: Mutex::new(None),
        }
    }

    /// Ask the source once. Returns the newer version if there is one.
    pub fn check(&self) -> CollaboratorResult<Option<String>> {
        let latest = self.source.latest_version()?;
        if is_newer(&latest, &self.current_version) {
            Ok(Some(latest))
        } else {
            debug!("Up to date ({} >= {})", self.current_version, latest);
            Ok(None)
        }
    }

    /// Queue the repeating check on the Main tier.
    pub fn start(self, ctx: &Arc<ServerContext>) -> TaskHandle {
        let interval = ctx.config().update_check_interval();
        let weak = Arc::downgrade(ctx);

        info!("Update checks every {:?}", interval);
        ctx.schedulers()
            .main()
            .queue_repeat("update-check", interval, move |task| {
                // Re-arm first so a failed check still runs again on schedule.
                task.set_delay(interval);
                let Some(ctx) = weak.upgrade() else {
                    return Ok(());
                };
                self.run_once(&ctx)
            })
    }

    fn run_once(&self, ctx: &Arc<ServerContext>) -> CollaboratorResult {
        if !ctx.config().check_for_updates || !ctx.is_running() {
            return Ok(());
        }

        match self.check() {
            Ok(Some(latest)) => {
                let mut announced = self.announced.lock();
                if announced.as_deref() == Some(latest.as_str()) {
                    return Ok(());
                }
                warn!(
                    "Update {} available (running {})",
                    latest, self.current_version
                );
                ctx.sessions().broadcast(&format!(
                    "A newer version of {} is available: {}",
                    ctx.config().software_name,
                    latest
                ));
                *announced = Some(latest);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!("Update check failed: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LifecycleConfig;
    use crate::testing::{RecordingProcess, RecordingSessions, recording_context, wait_until};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FixedSource {
        version: Result<String, String>,
        calls: AtomicU32,
    }

    impl FixedSource {
        fn new(version: Result<&str, &str>) -> Arc<Self> {
            Arc::new(Self {
                version: version.map(str::to_string).map_err(str::to_string),
                calls: AtomicU32::new(0),
            })
        }
    }

    impl UpdateSource for FixedSource {
        fn latest_version(&self) -> CollaboratorResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.version.clone().map_err(Into::into)
        }
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("1.2.1", "1.2.0"));
        assert!(is_newer("2.0", "1.9.9"));
        assert!(is_newer("v1.10", "1.9"));
        assert!(!is_newer("1.2.0", "1.2"));
        assert!(!is_newer("1.1.9", "1.2.0"));
    }

    #[test]
    fn test_check() {
        let checker = UpdateChecker::new("1.0.0", FixedSource::new(Ok("1.0.1")));
        assert_eq!(checker.check().unwrap(), Some("1.0.1".to_string()));

        let checker = UpdateChecker::new("1.0.1", FixedSource::new(Ok("1.0.1")));
        assert_eq!(checker.check().unwrap(), None);

        let checker = UpdateChecker::new("1.0.1", FixedSource::new(Err("offline")));
        assert!(checker.check().is_err());
    }

    #[test]
    fn test_newer_version_is_announced_once() {
        let config = LifecycleConfig {
            update_check_interval_secs: 1,
            ..Default::default()
        };
        let sessions = Arc::new(RecordingSessions::default());
        let process = Arc::new(RecordingProcess::default());
        let ctx = ServerContext::builder(config)
            .sessions(sessions.clone())
            .process(process.clone())
            .build()
            .unwrap();
        let source = FixedSource::new(Ok("1.1.0"));
        let task = UpdateChecker::new("1.0.0", source.clone()).start(&ctx);

        assert!(wait_until(Duration::from_secs(5), || task.run_count() >= 2));
        assert!(source.calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(
            *sessions.broadcasts.lock(),
            vec!["A newer version of Ember is available: 1.1.0"]
        );
        assert!(ctx.shutdown_handle().is_none());
        assert!(ctx.is_running());
        assert!(process.replaced.lock().is_empty());
        ctx.schedulers().stop_all();
    }

    #[test]
    fn test_disabled_checks_never_query_source() {
        let config = LifecycleConfig {
            update_check_interval_secs: 1,
            check_for_updates: false,
            ..Default::default()
        };
        let (ctx, _process) = recording_context(config);
        let source = FixedSource::new(Ok("9.9.9"));
        let task = UpdateChecker::new("1.0.0", source.clone()).start(&ctx);

        assert!(wait_until(Duration::from_secs(4), || task.run_count() >= 1));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(ctx.shutdown_handle().is_none());
        ctx.schedulers().stop_all();
    }

    #[test]
    fn test_failed_check_keeps_rescheduling() {
        let config = LifecycleConfig {
            update_check_interval_secs: 1,
            ..Default::default()
        };
        let (ctx, _process) = recording_context(config);
        let task =
            UpdateChecker::new("1.0.0", FixedSource::new(Err("connection refused"))).start(&ctx);

        assert!(wait_until(Duration::from_secs(5), || task.failure_count() >= 2));
        assert!(ctx.is_running());
        ctx.schedulers().stop_all();
    }
}
