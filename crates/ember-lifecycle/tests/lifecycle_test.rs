//! End-to-end lifecycle tests: startup pipeline, then racing shutdowns.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;

use ember_lifecycle::{
    CollaboratorResult, LifecycleConfig, LifecycleResult, LifecycleState, LoadedWorld,
    NetworkListener, PersistenceStore, Plugin, PluginHost, PluginRegistry, ProcessControl,
    ServerContext, ShutdownKind, StartupPipeline, steps,
};

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Default)]
struct MemoryWorlds {
    worlds: Mutex<Vec<LoadedWorld>>,
    saves: AtomicU32,
}

impl PersistenceStore for MemoryWorlds {
    fn loaded_worlds(&self) -> Vec<LoadedWorld> {
        self.worlds.lock().clone()
    }

    fn save(&self, _world: &LoadedWorld) -> CollaboratorResult {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn save_change_log(&self, _world: &LoadedWorld) -> CollaboratorResult {
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    exits: Mutex<Vec<i32>>,
    restarts: Mutex<Vec<PathBuf>>,
}

impl ProcessControl for Recorder {
    fn replace_process(&self, path: &Path, _args: &[String]) -> LifecycleResult<()> {
        self.restarts.lock().push(path.to_path_buf());
        Ok(())
    }

    fn exit(&self, code: i32) {
        self.exits.lock().push(code);
    }
}

#[derive(Default)]
struct Listener {
    closes: AtomicU32,
}

impl NetworkListener for Listener {
    fn close(&self) -> CollaboratorResult {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct NamedPlugin(&'static str);

impl Plugin for NamedPlugin {
    fn name(&self) -> &str {
        self.0
    }

    fn load(&self, _startup: bool) -> CollaboratorResult {
        Ok(())
    }

    fn unload(&self, _shutdown: bool) -> CollaboratorResult {
        Ok(())
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

// ============================================================================
// Full lifecycle
// ============================================================================

#[test]
fn test_startup_then_racing_shutdowns() {
    let dir = TempDir::new().unwrap();
    let config = LifecycleConfig {
        autoload_file: dir.path().join("autoload.txt"),
        restart_executable: Some(PathBuf::from("/opt/ember/ember")),
        restart_args: Some(Vec::new()),
        ..Default::default()
    };

    let worlds = Arc::new(MemoryWorlds::default());
    let plugins = Arc::new(PluginRegistry::new());
    plugins.register(Arc::new(NamedPlugin("greeter"))).unwrap();
    let process = Arc::new(Recorder::default());
    let listener = Arc::new(Listener::default());

    let ctx = ServerContext::builder(config)
        .persistence(worlds.clone())
        .plugins(plugins.clone())
        .process(process.clone())
        .build()
        .unwrap();

    let w = worlds.clone();
    let l = listener.clone();
    let progress = StartupPipeline::new()
        .job("load-main-world", move |_| {
            w.worlds.lock().push(LoadedWorld::new("main", 0).with_changes());
            Ok(())
        })
        .job("load-plugins", |ctx| {
            ctx.plugins().load_all();
            Ok(())
        })
        .job("load-autoload-worlds", |_| Err("autoload.txt unreadable".into()))
        .job("open-listener", move |ctx| {
            ctx.set_listener(l);
            Ok(())
        })
        .admit(&ctx);

    assert!(wait_until(Duration::from_secs(3), || ctx.is_setup_finished()));
    assert_eq!(
        progress.completed(),
        vec!["load-main-world", "load-plugins", "open-listener"]
    );
    assert_eq!(plugins.loaded_names(), vec!["greeter"]);

    // Operator stop, fatal handler and remote update all at once.
    let barrier = Arc::new(Barrier::new(3));
    let callers: Vec<_> = [ShutdownKind::Stop, ShutdownKind::Stop, ShutdownKind::Update]
        .into_iter()
        .map(|kind| {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ctx.shutdown(kind, "going down").wait()
            })
        })
        .collect();
    let reports: Vec<_> = callers.into_iter().map(|c| c.join().unwrap()).collect();

    assert!(reports.iter().all(|r| r == &reports[0]));
    assert_eq!(listener.closes.load(Ordering::SeqCst), 1);
    assert_eq!(worlds.saves.load(Ordering::SeqCst), 1);
    assert_eq!(process.exits.lock().len() + process.restarts.lock().len(), 1);
    assert!(reports[0].autoload_written);
    assert!(reports[0].step(steps::UNLOAD_PLUGINS).unwrap().error.is_none());
    assert!(plugins.is_empty());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("autoload.txt")).unwrap(),
        "main=0\n"
    );
    assert_eq!(ctx.state(), LifecycleState::Stopped);

    ctx.schedulers().stop_all();
}

#[test]
fn test_plugin_host_through_context() {
    let registry = Arc::new(PluginRegistry::new());
    registry.register(Arc::new(NamedPlugin("a"))).unwrap();
    let ctx = ServerContext::builder(LifecycleConfig::default())
        .plugins(registry.clone())
        .process(Arc::new(Recorder::default()))
        .build()
        .unwrap();

    let report = ctx.plugins().load_all();
    assert_eq!(report.succeeded, vec!["a"]);
    ctx.schedulers().stop_all();
}
