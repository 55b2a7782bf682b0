//! The server's startup pipeline and periodic jobs.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use ember_lifecycle::{
    CollaboratorResult, ModerationLists, ModerationPaths, ModerationWatches, PluginHost,
    ServerContext, StartupPipeline, UpdateChecker,
};
use tracing::{debug, info, warn};

use crate::host::{Announcements, HttpVersionSource, Host, ModerationNotices};
use crate::net::{Connections, Listener, RECENT_LOGIN_TTL};
use crate::worlds::parse_autoload;

/// Sessions silent for longer than this are kicked by the player tick.
const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Build the startup pipeline in dependency order.
pub(crate) fn startup_pipeline(host: Arc<Host>) -> StartupPipeline {
    let moderation = Arc::clone(&host);
    let main_world = Arc::clone(&host);
    let autoload = Arc::clone(&host);
    let listener = Arc::clone(&host);
    let timers = Arc::clone(&host);

    StartupPipeline::new()
        .job("load-moderation-lists", move |ctx| load_moderation(&moderation, ctx))
        .job("load-main-world", move |_| {
            main_world
                .worlds
                .load_or_generate(&main_world.config.server.main_world)?;
            Ok(())
        })
        .job("load-plugins", |ctx| {
            let report = ctx.plugins().load_all();
            info!(
                "Plugins: {} loaded, {} failed, {} skipped",
                report.succeeded.len(),
                report.failed.len(),
                report.skipped.len()
            );
            Ok(())
        })
        .job("load-autoload-worlds", move |_| load_autoload_worlds(&autoload))
        .job("open-listener", move |ctx| open_listener(&listener, ctx))
        .job("start-timers", move |ctx| {
            start_timers(&timers, ctx);
            Ok(())
        })
        .job("start-update-checks", move |ctx| start_update_checks(&host, ctx))
}

fn load_moderation(host: &Host, ctx: &Arc<ServerContext>) -> CollaboratorResult {
    let paths = &host.config.paths;
    let lists = ModerationLists::load(&ModerationPaths {
        temp_ranks: paths.resolve(&paths.temp_ranks_file),
        muted: paths.resolve(&paths.muted_file),
        frozen: paths.resolve(&paths.frozen_file),
    })?;
    let actions = Arc::new(ModerationNotices::new(host.connections.clone()));
    let watches = ModerationWatches::start(&lists, ctx.schedulers().main(), actions);
    *host.moderation.lock() = Some(watches);
    Ok(())
}

fn load_autoload_worlds(host: &Host) -> CollaboratorResult {
    let path = host.config.paths.resolve(&host.config.paths.autoload_file);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No autoload list at {}", path.display());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut failures = Vec::new();
    for (name, physics) in parse_autoload(&content, &host.config.server.main_world) {
        if let Err(e) = host.worlds.load(&name, Some(physics)) {
            warn!("Failed to autoload {}: {}", name, e);
            failures.push(name);
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(format!("could not autoload {}", failures.join(", ")).into())
    }
}

fn open_listener(host: &Host, ctx: &Arc<ServerContext>) -> CollaboratorResult {
    let mut server = host.config.server.clone();
    if server.listen_ip.parse::<std::net::IpAddr>().is_err() {
        warn!("Unable to parse listen IP '{}', listening on any IP", server.listen_ip);
        server.listen_ip = "0.0.0.0".to_string();
    }
    let listener = Listener::open(
        &server.listen_addr(),
        Arc::clone(&host.connections),
        &host.runtime,
    )?;
    ctx.set_listener(listener);
    Ok(())
}

fn start_timers(host: &Host, ctx: &Arc<ServerContext>) {
    let timers = &host.config.timers;
    let schedulers = ctx.schedulers();

    let announcements = match Announcements::load(
        &host.config.paths.resolve(&host.config.paths.announcements_file),
    ) {
        Ok(announcements) => announcements,
        Err(e) => {
            warn!("Failed to load announcements: {}", e);
            Announcements::default()
        }
    };
    debug!("Loaded {} announcement(s)", announcements.len());
    let connections = Arc::clone(&host.connections);
    schedulers
        .main()
        .queue_repeat("announcements", timers.announcement_interval(), move |_| {
            announcements.announce(&connections);
            Ok(())
        });

    let connections = Arc::clone(&host.connections);
    schedulers.critical().queue_repeat(
        "position-updates",
        timers.position_update_interval(),
        move |_| {
            connections.ping_all();
            Ok(())
        },
    );

    let connections = Arc::clone(&host.connections);
    schedulers
        .critical()
        .queue_repeat("player-tick", timers.tick_interval(), move |_| {
            tick_players(&connections);
            Ok(())
        });

    let connections = Arc::clone(&host.connections);
    schedulers.background().queue_repeat(
        "cache-cleanup",
        timers.cache_cleanup_interval(),
        move |_| {
            let removed = connections.cleanup_recent_logins(RECENT_LOGIN_TTL);
            if removed > 0 {
                debug!("Cache cleanup removed {} entries", removed);
            }
            Ok(())
        },
    );
}

fn tick_players(connections: &Connections) {
    let kicked = connections.kick_idle(IDLE_TIMEOUT);
    if kicked > 0 {
        info!("Kicked {} idle session(s)", kicked);
    }
}

fn start_update_checks(host: &Host, ctx: &Arc<ServerContext>) -> CollaboratorResult {
    let Some(url) = host.config.server.update_url.clone() else {
        debug!("No update URL configured, update checks disabled");
        return Ok(());
    };
    let source = HttpVersionSource::new(url, host.runtime.clone())?;
    UpdateChecker::new(env!("CARGO_PKG_VERSION"), Arc::new(source)).start(ctx);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worlds::WorldStore;
    use ember_config::Config;
    use ember_lifecycle::{LifecycleConfig, PersistenceStore, PluginRegistry};
    use parking_lot::Mutex;
    use std::time::Instant;
    use tempfile::TempDir;
    use tokio::runtime::Handle;

    fn test_host(dir: &TempDir, runtime: Handle) -> Arc<Host> {
        let mut config = Config::default();
        config.paths.data_dir = dir.path().to_path_buf();
        config.server.listen_ip = "127.0.0.1".to_string();
        config.server.port = 0;
        Arc::new(Host {
            worlds: Arc::new(WorldStore::new(config.paths.resolve(&config.paths.worlds_dir))),
            connections: Arc::new(Connections::new("Ember", "")),
            moderation: Mutex::new(None),
            runtime,
            config,
        })
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pipeline_loads_worlds_and_opens_listener() {
        let dir = TempDir::new().unwrap();
        let host = test_host(&dir, Handle::current());

        let store = WorldStore::new(dir.path().join("levels"));
        store.load_or_generate("arena").unwrap();
        fs::create_dir_all(dir.path().join("text")).unwrap();
        fs::write(dir.path().join("text/autoload.txt"), "main=0\narena=2\nmissing=1\n").unwrap();

        let ctx = ServerContext::builder(LifecycleConfig {
            autoload_file: dir.path().join("text/autoload.txt"),
            ..Default::default()
        })
        .persistence(host.worlds.clone())
        .sessions(host.connections.clone())
        .pending(host.connections.clone())
        .plugins(Arc::new(PluginRegistry::new()))
        .build()
        .unwrap();

        let progress = startup_pipeline(Arc::clone(&host)).admit(&ctx);
        let ctx_probe = Arc::clone(&ctx);
        let finished = tokio::task::spawn_blocking(move || {
            wait_until(Duration::from_secs(5), || ctx_probe.is_setup_finished())
        })
        .await
        .unwrap();
        assert!(finished);

        let names: Vec<_> = host.worlds.loaded_worlds().into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["main", "arena"]);
        assert_eq!(host.worlds.loaded_worlds()[1].physics, 2);
        assert_eq!(
            progress.failed().into_iter().map(|(n, _)| n).collect::<Vec<_>>(),
            vec!["load-autoload-worlds"]
        );
        assert!(progress.completed().contains(&"open-listener".to_string()));
        assert!(host.moderation.lock().is_some());

        if let Some(watches) = host.moderation.lock().take() {
            watches.stop();
        }
        ctx.schedulers().stop_all();
    }
}
