//! External collaborators driven by the lifecycle orchestrator.
//!
//! World storage, sessions, the listener and plugins live outside this crate.
//! The orchestrator only needs the narrow operations below, and treats every
//! failure they report as non-fatal.

use std::path::Path;

use crate::error::{CollaboratorResult, LifecycleResult};
use crate::plugins::PluginReport;
use crate::shutdown::ShutdownKind;

/// Identifies a logged-in session.
pub type SessionId = u64;

/// Identifies a connection that has not finished logging in.
pub type ConnectionId = u64;

/// Opcode of the classic protocol's disconnect packet.
pub const KICK_OPCODE: u8 = 0x0E;

/// Fixed width of a classic protocol string.
pub const PROTOCOL_STRING_LEN: usize = 64;

/// A world currently loaded by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedWorld {
    /// World name.
    pub name: String,
    /// Physics level, recorded in the autoload list.
    pub physics: u8,
    /// Whether changes to this world are saved. Worlds that are not saved are
    /// left out of the autoload list.
    pub save_changes: bool,
    /// Whether the world has changed since it was last saved.
    pub changed: bool,
}

impl LoadedWorld {
    pub fn new(name: impl Into<String>, physics: u8) -> Self {
        Self {
            name: name.into(),
            physics,
            save_changes: true,
            changed: false,
        }
    }

    /// Mark the world as having unsaved changes.
    pub fn with_changes(mut self) -> Self {
        self.changed = true;
        self
    }

    /// Autoload list line: `name=physics`.
    pub fn autoload_line(&self) -> String {
        format!("{}={}", self.name, self.physics)
    }
}

/// World persistence.
pub trait PersistenceStore: Send + Sync {
    /// Worlds currently loaded.
    fn loaded_worlds(&self) -> Vec<LoadedWorld>;

    /// Save a world.
    fn save(&self, world: &LoadedWorld) -> CollaboratorResult;

    /// Flush the world's pending block change log.
    fn save_change_log(&self, world: &LoadedWorld) -> CollaboratorResult;
}

/// Logged-in sessions.
pub trait SessionRegistry: Send + Sync {
    /// Every active session.
    fn all_active(&self) -> Vec<SessionId>;

    /// Disconnect a session with a reason shown to the player.
    fn disconnect(&self, session: SessionId, reason: &str) -> CollaboratorResult;

    /// Send a chat message to every active session.
    fn broadcast(&self, message: &str);
}

/// Connections still in the login handshake.
pub trait PendingConnections: Send + Sync {
    /// Every pending connection.
    fn all_pending(&self) -> Vec<ConnectionId>;

    /// Send raw bytes to a pending connection.
    fn notify(&self, connection: ConnectionId, bytes: &[u8]) -> CollaboratorResult;

    /// Encode the kick message sent to pending connections.
    fn encode_kick(&self, reason: &str) -> Vec<u8> {
        encode_kick_packet(reason)
    }
}

/// Plugin loading and unloading.
///
/// Implementations isolate each plugin: one failing plugin never prevents the
/// others from loading or unloading.
pub trait PluginHost: Send + Sync {
    fn load_all(&self) -> PluginReport;
    fn unload_all(&self) -> PluginReport;
}

/// The accepting socket.
pub trait NetworkListener: Send + Sync {
    /// Stop accepting connections.
    fn close(&self) -> CollaboratorResult;
}

/// Receives the "shutting down" notification.
pub trait ShutdownObserver: Send + Sync {
    fn on_shutting_down(&self, kind: ShutdownKind, reason: &str) -> CollaboratorResult;
}

/// Flushes buffered log output before the process terminates.
pub trait LogFlusher: Send + Sync {
    fn flush(&self);
}

/// Process termination and replacement.
pub trait ProcessControl: Send + Sync {
    /// Replace the running process with `path args...`.
    ///
    /// Real backends only return on failure.
    fn replace_process(&self, path: &Path, args: &[String]) -> LifecycleResult<()>;

    /// Terminate the process with `code`.
    fn exit(&self, code: i32);
}

/// Encode a classic protocol disconnect packet.
///
/// The reason is truncated or space-padded to 64 bytes; characters outside
/// printable ASCII become `?`.
pub fn encode_kick_packet(reason: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(1 + PROTOCOL_STRING_LEN);
    packet.push(KICK_OPCODE);
    packet.extend(
        reason
            .chars()
            .take(PROTOCOL_STRING_LEN)
            .map(|c| if c.is_ascii() && !c.is_ascii_control() { c as u8 } else { b'?' }),
    );
    packet.resize(1 + PROTOCOL_STRING_LEN, b' ');
    packet
}

/// Collaborator that has nothing to report and accepts every call.
///
/// Stands in for collaborators a process does not have, such as a listener
/// before the socket is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

impl PersistenceStore for Detached {
    fn loaded_worlds(&self) -> Vec<LoadedWorld> {
        Vec::new()
    }

    fn save(&self, _world: &LoadedWorld) -> CollaboratorResult {
        Ok(())
    }

    fn save_change_log(&self, _world: &LoadedWorld) -> CollaboratorResult {
        Ok(())
    }
}

impl SessionRegistry for Detached {
    fn all_active(&self) -> Vec<SessionId> {
        Vec::new()
    }

    fn disconnect(&self, _session: SessionId, _reason: &str) -> CollaboratorResult {
        Ok(())
    }

    fn broadcast(&self, _message: &str) {}
}

impl PendingConnections for Detached {
    fn all_pending(&self) -> Vec<ConnectionId> {
        Vec::new()
    }

    fn notify(&self, _connection: ConnectionId, _bytes: &[u8]) -> CollaboratorResult {
        Ok(())
    }
}

impl PluginHost for Detached {
    fn load_all(&self) -> PluginReport {
        PluginReport::default()
    }

    fn unload_all(&self) -> PluginReport {
        PluginReport::default()
    }
}

impl NetworkListener for Detached {
    fn close(&self) -> CollaboratorResult {
        Ok(())
    }
}

impl LogFlusher for Detached {
    fn flush(&self) {}
}
