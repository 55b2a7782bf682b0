//! Lifecycle errors and state.

use std::path::PathBuf;

use ember_scheduler::SchedulerError;
use thiserror::Error;

/// Error returned by an external collaborator (store, registry, plugin, ...).
///
/// Collaborator failures are logged by the orchestrator and never stop the
/// startup pipeline or the shutdown sequence.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for collaborator calls.
pub type CollaboratorResult<T = ()> = Result<T, CollaboratorError>;

/// Errors that can occur during lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Invalid lifecycle state transition.
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// A startup job or shutdown step failed.
    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    /// Replacing the process image failed.
    #[error("Failed to restart {path}: {reason}")]
    ProcessReplace { path: PathBuf, reason: String },

    /// A plugin failed to load or unload.
    #[error("Plugin '{name}' failed: {reason}")]
    Plugin { name: String, reason: String },

    /// Failed to set up signal handlers.
    #[error("Failed to set up signal handlers: {0}")]
    SignalSetup(String),

    /// Scheduler error.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Process-wide lifecycle state.
///
/// Transitions only move forward: `Running -> ShuttingDown -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Serving; startup jobs and periodic work run.
    Running,
    /// The shutdown worker is executing the shutdown sequence.
    ShuttingDown,
    /// The shutdown sequence has finished.
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::ShuttingDown => write!(f, "shutting_down"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}
