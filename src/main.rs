//! Ember - classic block game server
//!
//! Main entry point for the Ember CLI and server.

mod cli;
mod host;
mod jobs;
mod logging;
mod net;
mod worlds;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use ember_config::{Config, ConfigLoader, ConfigValidator};
use ember_lifecycle::{LifecycleConfig, PluginRegistry, ServerContext, SignalBridge};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::cli::{Cli, Commands};
use crate::host::Host;
use crate::logging::LogGuard;
use crate::net::Connections;
use crate::worlds::WorldStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(work_dir) = &cli.work_dir {
        std::env::set_current_dir(work_dir)?;
    }

    let mut config = ConfigLoader::load_or_default(&cli.config)?;

    match cli.command {
        Some(Commands::CheckConfig) => check_config(&cli.config, &config),
        Some(Commands::Run { port }) => {
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await
        }
        None => run_server(config).await,
    }
}

/// Print validation results and fail if there are errors.
fn check_config(path: &Path, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let result = ConfigValidator::validate(config);
    for warning in &result.warnings {
        println!("warning: {}", warning);
    }
    for error in &result.errors {
        println!("error: {}", error);
    }

    if result.is_valid() {
        println!("{}: OK", path.display());
        Ok(())
    } else {
        Err(format!("{}: {} error(s)", path.display(), result.errors.len()).into())
    }
}

fn lifecycle_config(config: &Config) -> LifecycleConfig {
    LifecycleConfig {
        software_name: config.server.name.clone(),
        say_bye: config.server.say_bye,
        autoload_file: config.paths.resolve(&config.paths.autoload_file),
        autoload_locked: config.server.autoload_locked,
        check_for_updates: config.server.check_for_updates,
        update_check_interval_secs: config.timers.update_check_interval_secs,
        ..Default::default()
    }
}

/// Run the server in foreground.
async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let log_guard: Arc<LogGuard> =
        Arc::new(logging::init_tracing(&config.paths.resolve(&config.paths.log_dir))?);

    info!("Starting {} v{}", config.server.name, env!("CARGO_PKG_VERSION"));
    let validation = ConfigValidator::validate(&config);
    for warning in &validation.warnings {
        warn!("Config: {}", warning);
    }
    if !validation.is_valid() {
        for e in &validation.errors {
            error!("Config: {}", e);
        }
        return Err("invalid configuration".into());
    }

    let worlds = Arc::new(WorldStore::new(config.paths.resolve(&config.paths.worlds_dir)));
    let connections = Arc::new(
        Connections::new(&config.server.name, "Welcome to Ember")
            .with_world(worlds.clone(), &config.server.main_world),
    );
    let plugins = Arc::new(PluginRegistry::new());

    let ctx = ServerContext::builder(lifecycle_config(&config))
        .persistence(worlds.clone())
        .sessions(connections.clone())
        .pending(connections.clone())
        .plugins(plugins)
        .log_flusher(log_guard)
        .build()?;

    let mut notices = ctx.subscribe_shutdown();
    let signals = SignalBridge::new();
    signals.install_os_handlers()?;
    signals.forward_to(&ctx);

    let host = Arc::new(Host {
        config,
        connections,
        worlds,
        runtime: Handle::current(),
        moderation: Mutex::new(None),
    });
    jobs::startup_pipeline(Arc::clone(&host)).admit(&ctx);

    match notices.recv().await {
        Ok(notice) => info!("Shutting down ({}): {}", notice.kind, notice.reason),
        Err(e) => warn!("Lost shutdown notice: {}", e),
    }

    let Some(handle) = ctx.shutdown_handle() else {
        return Err("shutdown notice without a shutdown in progress".into());
    };
    // The final step exits or replaces the process, so this only returns
    // when process control hands control back.
    let report = tokio::task::spawn_blocking(move || handle.wait()).await?;
    if !report.failed_steps().is_empty() {
        return Err(format!("shutdown steps failed: {:?}", report.failed_steps()).into());
    }
    Ok(())
}
