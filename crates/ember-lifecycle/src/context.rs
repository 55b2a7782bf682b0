//! Process-wide server context.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ember_scheduler::Schedulers;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::collaborators::{
    Detached, LogFlusher, NetworkListener, PendingConnections, PersistenceStore, PluginHost,
    ProcessControl, SessionRegistry, ShutdownObserver,
};
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, LifecycleResult, LifecycleState};
use crate::process::native_process_control;
use crate::shutdown::{ShutdownCoordinator, ShutdownHandle, ShutdownKind, ShutdownNotice};
use crate::state::StateCell;

/// Owns the three schedulers, the lifecycle state and the collaborators.
///
/// One context exists per process; it is shared as `Arc<ServerContext>` and
/// handed explicitly to everything that schedules work or triggers shutdown.
pub struct ServerContext {
    config: LifecycleConfig,
    schedulers: Schedulers,
    pub(crate) state: StateCell,
    setup_finished: AtomicBool,
    pub(crate) persistence: Arc<dyn PersistenceStore>,
    pub(crate) sessions: Arc<dyn SessionRegistry>,
    pub(crate) pending: Arc<dyn PendingConnections>,
    pub(crate) plugins: Arc<dyn PluginHost>,
    pub(crate) process: Arc<dyn ProcessControl>,
    pub(crate) log_flusher: Arc<dyn LogFlusher>,
    listener: Mutex<Option<Arc<dyn NetworkListener>>>,
    observers: Mutex<Vec<Arc<dyn ShutdownObserver>>>,
    shutdown: ShutdownCoordinator,
}

impl ServerContext {
    /// Start building a context.
    pub fn builder(config: LifecycleConfig) -> ServerContextBuilder {
        ServerContextBuilder::new(config)
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn schedulers(&self) -> &Schedulers {
        &self.schedulers
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// Check if the server is running (no shutdown has begun).
    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Check if the startup pipeline has completed this run.
    pub fn is_setup_finished(&self) -> bool {
        self.setup_finished.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_setup_finished(&self) {
        self.setup_finished.store(true, Ordering::SeqCst);
    }

    pub fn persistence(&self) -> &Arc<dyn PersistenceStore> {
        &self.persistence
    }

    pub fn sessions(&self) -> &Arc<dyn SessionRegistry> {
        &self.sessions
    }

    pub fn pending(&self) -> &Arc<dyn PendingConnections> {
        &self.pending
    }

    pub fn plugins(&self) -> &Arc<dyn PluginHost> {
        &self.plugins
    }

    /// Install the network listener once the socket is open.
    pub fn set_listener(&self, listener: Arc<dyn NetworkListener>) {
        *self.listener.lock() = Some(listener);
    }

    pub(crate) fn take_listener(&self) -> Option<Arc<dyn NetworkListener>> {
        self.listener.lock().take()
    }

    /// Register an observer for the "shutting down" notification.
    pub fn add_shutdown_observer(&self, observer: Arc<dyn ShutdownObserver>) {
        self.observers.lock().push(observer);
    }

    pub(crate) fn shutdown_observers(&self) -> Vec<Arc<dyn ShutdownObserver>> {
        self.observers.lock().clone()
    }

    /// Request a shutdown.
    ///
    /// The first request starts the shutdown worker; every later request, of
    /// any kind, receives the handle of the worker already in flight.
    pub fn shutdown(
        self: &Arc<Self>,
        kind: ShutdownKind,
        reason: impl Into<String>,
    ) -> Arc<ShutdownHandle> {
        self.shutdown.begin(self, kind, reason.into())
    }

    /// Stop the server with the configured stop reason.
    pub fn stop(self: &Arc<Self>) -> Arc<ShutdownHandle> {
        let reason = self.config.stop_reason.clone();
        self.shutdown(ShutdownKind::Stop, reason)
    }

    /// Restart the server.
    pub fn restart(self: &Arc<Self>, reason: impl Into<String>) -> Arc<ShutdownHandle> {
        self.shutdown(ShutdownKind::Restart, reason)
    }

    /// The in-flight or finished shutdown, if any.
    pub fn shutdown_handle(&self) -> Option<Arc<ShutdownHandle>> {
        self.shutdown.handle()
    }

    /// Subscribe to shutdown notices, sent once when a shutdown begins.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<ShutdownNotice> {
        self.shutdown.subscribe()
    }
}

/// Builder for [`ServerContext`].
///
/// Collaborators that are not supplied default to [`Detached`]; process
/// control defaults to the platform backend.
pub struct ServerContextBuilder {
    config: LifecycleConfig,
    persistence: Arc<dyn PersistenceStore>,
    sessions: Arc<dyn SessionRegistry>,
    pending: Arc<dyn PendingConnections>,
    plugins: Arc<dyn PluginHost>,
    process: Option<Arc<dyn ProcessControl>>,
    log_flusher: Arc<dyn LogFlusher>,
}

impl ServerContextBuilder {
    fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            persistence: Arc::new(Detached),
            sessions: Arc::new(Detached),
            pending: Arc::new(Detached),
            plugins: Arc::new(Detached),
            process: None,
            log_flusher: Arc::new(Detached),
        }
    }

    pub fn persistence(mut self, persistence: Arc<dyn PersistenceStore>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionRegistry>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn pending(mut self, pending: Arc<dyn PendingConnections>) -> Self {
        self.pending = pending;
        self
    }

    pub fn plugins(mut self, plugins: Arc<dyn PluginHost>) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn process(mut self, process: Arc<dyn ProcessControl>) -> Self {
        self.process = Some(process);
        self
    }

    pub fn log_flusher(mut self, log_flusher: Arc<dyn LogFlusher>) -> Self {
        self.log_flusher = log_flusher;
        self
    }

    /// Validate the configuration and start the schedulers.
    pub fn build(self) -> LifecycleResult<Arc<ServerContext>> {
        self.config.validate().map_err(LifecycleError::Config)?;

        let schedulers = Schedulers::start()?;
        info!("Server context ready ({})", self.config.software_name);

        Ok(Arc::new(ServerContext {
            config: self.config,
            schedulers,
            state: StateCell::new(),
            setup_finished: AtomicBool::new(false),
            persistence: self.persistence,
            sessions: self.sessions,
            pending: self.pending,
            plugins: self.plugins,
            process: self.process.unwrap_or_else(native_process_control),
            log_flusher: self.log_flusher,
            listener: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
            shutdown: ShutdownCoordinator::new(),
        }))
    }
}
