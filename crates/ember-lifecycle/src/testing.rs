//! Recording collaborators shared by unit tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::collaborators::{
    ConnectionId, LoadedWorld, LogFlusher, NetworkListener, PendingConnections, PersistenceStore,
    ProcessControl, SessionId, SessionRegistry, ShutdownObserver,
};
use crate::config::LifecycleConfig;
use crate::context::ServerContext;
use crate::error::{CollaboratorResult, LifecycleError, LifecycleResult};
use crate::shutdown::ShutdownKind;

#[derive(Default)]
pub(crate) struct RecordingProcess {
    pub exits: Mutex<Vec<i32>>,
    pub replaced: Mutex<Vec<(PathBuf, Vec<String>)>>,
    pub fail_replace: bool,
}

impl ProcessControl for RecordingProcess {
    fn replace_process(&self, path: &Path, args: &[String]) -> LifecycleResult<()> {
        self.replaced
            .lock()
            .push((path.to_path_buf(), args.to_vec()));
        if self.fail_replace {
            return Err(LifecycleError::ProcessReplace {
                path: path.to_path_buf(),
                reason: "exec format error".to_string(),
            });
        }
        Ok(())
    }

    fn exit(&self, code: i32) {
        self.exits.lock().push(code);
    }
}

#[derive(Default)]
pub(crate) struct RecordingSessions {
    pub active: Vec<SessionId>,
    pub failing: Vec<SessionId>,
    pub disconnected: Mutex<Vec<(SessionId, String)>>,
    pub broadcasts: Mutex<Vec<String>>,
}

impl SessionRegistry for RecordingSessions {
    fn all_active(&self) -> Vec<SessionId> {
        self.active.clone()
    }

    fn disconnect(&self, session: SessionId, reason: &str) -> CollaboratorResult {
        if self.failing.contains(&session) {
            return Err("socket already closed".into());
        }
        self.disconnected.lock().push((session, reason.to_string()));
        Ok(())
    }

    fn broadcast(&self, message: &str) {
        self.broadcasts.lock().push(message.to_string());
    }
}

#[derive(Default)]
pub(crate) struct RecordingPending {
    pub pending: Vec<ConnectionId>,
    pub sent: Mutex<Vec<(ConnectionId, Vec<u8>)>>,
}

impl PendingConnections for RecordingPending {
    fn all_pending(&self) -> Vec<ConnectionId> {
        self.pending.clone()
    }

    fn notify(&self, connection: ConnectionId, bytes: &[u8]) -> CollaboratorResult {
        self.sent.lock().push((connection, bytes.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingStore {
    pub worlds: Vec<LoadedWorld>,
    pub fail_save: Option<String>,
    pub saved: Mutex<Vec<String>>,
    pub change_logs: Mutex<Vec<String>>,
}

impl PersistenceStore for RecordingStore {
    fn loaded_worlds(&self) -> Vec<LoadedWorld> {
        self.worlds.clone()
    }

    fn save(&self, world: &LoadedWorld) -> CollaboratorResult {
        if self.fail_save.as_deref() == Some(world.name.as_str()) {
            return Err("disk full".into());
        }
        self.saved.lock().push(world.name.clone());
        Ok(())
    }

    fn save_change_log(&self, world: &LoadedWorld) -> CollaboratorResult {
        self.change_logs.lock().push(world.name.clone());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct CountingListener {
    pub closed: AtomicU32,
    pub fail: bool,
}

impl NetworkListener for CountingListener {
    fn close(&self) -> CollaboratorResult {
        self.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("listener already closed".into());
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct CountingFlusher {
    pub flushed: AtomicU32,
}

impl LogFlusher for CountingFlusher {
    fn flush(&self) {
        self.flushed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Observer that sleeps, widening the window for racing shutdown requests.
#[derive(Default)]
pub(crate) struct SlowObserver {
    pub delay: Duration,
    pub panic: bool,
    pub calls: Mutex<Vec<ShutdownKind>>,
}

impl ShutdownObserver for SlowObserver {
    fn on_shutting_down(&self, kind: ShutdownKind, _reason: &str) -> CollaboratorResult {
        self.calls.lock().push(kind);
        std::thread::sleep(self.delay);
        if self.panic {
            panic!("observer exploded");
        }
        Ok(())
    }
}

/// A context whose process control only records.
pub(crate) fn recording_context(
    config: LifecycleConfig,
) -> (Arc<ServerContext>, Arc<RecordingProcess>) {
    let process = Arc::new(RecordingProcess::default());
    let ctx = ServerContext::builder(config)
        .process(process.clone())
        .build()
        .unwrap();
    (ctx, process)
}

pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
