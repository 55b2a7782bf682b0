//! OS signal bridge.
//!
//! SIGINT and SIGTERM request a stop, SIGHUP requests a restart. Requests go
//! through the same entry guard as every other shutdown trigger.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::context::ServerContext;
use crate::error::{LifecycleError, LifecycleResult};
use crate::shutdown::ShutdownKind;

/// Signal type for lifecycle control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Graceful stop (SIGTERM, SIGINT, Ctrl+C).
    Stop,
    /// Restart in place (SIGHUP).
    Restart,
}

impl LifecycleSignal {
    /// Shutdown kind requested by this signal.
    pub fn shutdown_kind(&self) -> ShutdownKind {
        match self {
            LifecycleSignal::Stop => ShutdownKind::Stop,
            LifecycleSignal::Restart => ShutdownKind::Restart,
        }
    }
}

impl std::fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleSignal::Stop => write!(f, "STOP"),
            LifecycleSignal::Restart => write!(f, "RESTART"),
        }
    }
}

/// Fans OS signals out to subscribers and forwards them to the context.
#[derive(Clone)]
pub struct SignalBridge {
    sender: broadcast::Sender<LifecycleSignal>,
}

impl SignalBridge {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    /// Subscribe to signals.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleSignal> {
        self.sender.subscribe()
    }

    /// Send a signal.
    pub fn send(&self, signal: LifecycleSignal) {
        debug!("Sending signal: {}", signal);
        let _ = self.sender.send(signal);
    }

    /// Forward every signal to `ctx` as a shutdown request.
    ///
    /// Must be called from within a tokio runtime.
    pub fn forward_to(&self, ctx: &Arc<ServerContext>) {
        let mut rx = self.subscribe();
        let ctx = Arc::clone(ctx);
        tokio::spawn(async move {
            while let Ok(signal) = rx.recv().await {
                let kind = signal.shutdown_kind();
                let reason = match kind {
                    ShutdownKind::Restart => "Server restarting.".to_string(),
                    _ => ctx.config().stop_reason.clone(),
                };
                ctx.shutdown(kind, reason);
            }
        });
    }

    /// Set up OS signal handlers (Unix only).
    #[cfg(unix)]
    pub fn install_os_handlers(&self) -> LifecycleResult<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let handlers = [
            (SignalKind::terminate(), "SIGTERM", LifecycleSignal::Stop),
            (SignalKind::interrupt(), "SIGINT", LifecycleSignal::Stop),
            (SignalKind::hangup(), "SIGHUP", LifecycleSignal::Restart),
        ];

        for (kind, name, lifecycle_signal) in handlers {
            let mut stream =
                signal(kind).map_err(|e| LifecycleError::SignalSetup(e.to_string()))?;
            let bridge = self.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    info!("Received {}", name);
                    bridge.send(lifecycle_signal);
                }
            });
        }

        info!("OS signal handlers installed (SIGTERM, SIGINT, SIGHUP)");
        Ok(())
    }

    /// Set up OS signal handlers (non-Unix fallback).
    #[cfg(not(unix))]
    pub fn install_os_handlers(&self) -> LifecycleResult<()> {
        let bridge = self.clone();

        // Only Ctrl+C is available on non-Unix
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received Ctrl+C");
                bridge.send(LifecycleSignal::Stop);
            }
        });

        info!("OS signal handlers installed (Ctrl+C only)");
        Ok(())
    }
}

impl Default for SignalBridge {
    fn default() -> Self {
        Self::new()
    }
}
