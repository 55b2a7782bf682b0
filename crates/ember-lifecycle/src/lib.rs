//! # Ember Lifecycle
//!
//! Process lifecycle for the Ember game server.
//!
//! ## Features
//!
//! - Process-wide [`ServerContext`] owning the three scheduler tiers
//! - Ordered startup pipeline on the Background tier
//! - Race-safe shutdown/restart: one worker, shared by every caller
//! - Autoload list maintenance on shutdown
//! - Process replacement (`execvp` on Unix, spawn-and-exit elsewhere)
//! - Plugin registry, moderation expiry watches, update checks
//! - Signal handling (SIGTERM/SIGINT stop, SIGHUP restart)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ember_lifecycle::{LifecycleConfig, ServerContext, StartupPipeline};
//!
//! let ctx = ServerContext::builder(LifecycleConfig::default())
//!     .sessions(sessions)
//!     .persistence(store)
//!     .build()?;
//!
//! StartupPipeline::new()
//!     .job("load-main-world", |ctx| load_main(ctx))
//!     .job("load-plugins", |ctx| { ctx.plugins().load_all(); Ok(()) })
//!     .admit(&ctx);
//!
//! // Later, from any thread:
//! ctx.stop().wait();
//! ```

pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod moderation;
pub mod plugins;
pub mod process;
pub mod shutdown;
pub mod signal;
pub mod startup;
pub mod state;
pub mod updater;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use collaborators::{
    ConnectionId, Detached, LoadedWorld, LogFlusher, NetworkListener, PendingConnections,
    PersistenceStore, PluginHost, ProcessControl, SessionId, SessionRegistry, ShutdownObserver,
    encode_kick_packet,
};
pub use config::LifecycleConfig;
pub use context::{ServerContext, ServerContextBuilder};
pub use error::{
    CollaboratorError, CollaboratorResult, LifecycleError, LifecycleResult, LifecycleState,
};
pub use moderation::{ModerationActions, ModerationLists, ModerationPaths, ModerationWatches};
pub use plugins::{Plugin, PluginRegistry, PluginReport};
pub use process::{SpawnAndExit, native_process_control};
#[cfg(unix)]
pub use process::ExecReplace;
pub use shutdown::{
    ShutdownHandle, ShutdownKind, ShutdownNotice, ShutdownReport, StepOutcome, UPDATE_MESSAGE, steps,
};
pub use signal::{LifecycleSignal, SignalBridge};
pub use startup::{StartupPipeline, StartupProgress};
pub use updater::{UpdateChecker, UpdateSource, is_newer};
