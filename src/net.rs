//! Reference network collaborators: the TCP listener, pending connections
//! and logged-in sessions.
//!
//! Each connection gets a reader task and a writer task on the tokio runtime.
//! Everything else talks to a connection through its outbound channel, so the
//! scheduler threads and the shutdown worker never block on a socket.
//!
//! Logged-in players edit the main world; each block placed or destroyed is
//! recorded in the world store's change log.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ember_lifecycle::{
    CollaboratorResult, ConnectionId, NetworkListener, PendingConnections, SessionId,
    SessionRegistry, encode_kick_packet,
};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::worlds::WorldStore;

/// Classic protocol version spoken by the server.
pub(crate) const PROTOCOL_VERSION: u8 = 7;

const STRING_LEN: usize = 64;
const IDENTIFICATION_OPCODE: u8 = 0x00;
const PING_OPCODE: u8 = 0x01;
const SET_BLOCK_OPCODE: u8 = 0x05;
const POSITION_OPCODE: u8 = 0x08;
const MESSAGE_OPCODE: u8 = 0x0D;

/// opcode, version, username, verification key, unused
const HANDSHAKE_LEN: usize = 1 + 1 + STRING_LEN + STRING_LEN + 1;
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a login is remembered as "recent" for reconnect messages.
pub(crate) const RECENT_LOGIN_TTL: Duration = Duration::from_secs(60 * 60);

/// Pad or truncate `text` to a protocol string. Non-ASCII becomes `?`.
fn protocol_string(text: &str) -> [u8; STRING_LEN] {
    let mut out = [b' '; STRING_LEN];
    for (slot, c) in out.iter_mut().zip(text.chars()) {
        *slot = if c.is_ascii() && !c.is_ascii_control() { c as u8 } else { b'?' };
    }
    out
}

/// Length of a client packet including its opcode.
fn client_packet_len(opcode: u8) -> Option<usize> {
    match opcode {
        IDENTIFICATION_OPCODE => Some(HANDSHAKE_LEN),
        SET_BLOCK_OPCODE => Some(9),
        POSITION_OPCODE => Some(10),
        MESSAGE_OPCODE => Some(2 + STRING_LEN),
        _ => None,
    }
}

/// A block placed or destroyed by a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockEdit {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub block: u8,
}

impl BlockEdit {
    /// Decode a set-block packet. Destroying leaves air (block 0).
    fn decode(packet: &[u8]) -> Option<Self> {
        if packet.len() != 9 || packet[0] != SET_BLOCK_OPCODE {
            return None;
        }
        let coord = |i: usize| i16::from_be_bytes([packet[i], packet[i + 1]]);
        let placing = packet[7] != 0;
        Some(Self {
            x: coord(1),
            y: coord(3),
            z: coord(5),
            block: if placing { packet[8] } else { 0 },
        })
    }
}

fn decode_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

pub(crate) fn chat_packet(message: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(2 + STRING_LEN);
    packet.push(MESSAGE_OPCODE);
    packet.push(0xFF);
    packet.extend_from_slice(&protocol_string(message));
    packet
}

fn identification_packet(name: &str, motd: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HANDSHAKE_LEN);
    packet.push(IDENTIFICATION_OPCODE);
    packet.push(PROTOCOL_VERSION);
    packet.extend_from_slice(&protocol_string(name));
    packet.extend_from_slice(&protocol_string(motd));
    packet.push(0x00);
    packet
}

#[derive(Debug)]
enum Outbound {
    Bytes(Vec<u8>),
    Close,
}

#[derive(Debug, Clone)]
struct Peer {
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Peer {
    fn send(&self, bytes: Vec<u8>) -> CollaboratorResult {
        self.outbound
            .send(Outbound::Bytes(bytes))
            .map_err(|_| format!("connection {} is closed", self.addr).into())
    }

    fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

#[derive(Debug)]
struct Session {
    name: String,
    peer: Peer,
    last_seen: Mutex<Instant>,
}

/// Every connection the server knows about, before and after login.
pub(crate) struct Connections {
    server_name: String,
    motd: String,
    next_id: AtomicU64,
    pending: DashMap<ConnectionId, Peer>,
    sessions: DashMap<SessionId, Session>,
    recent_logins: DashMap<String, Instant>,
    world: Option<(Arc<WorldStore>, String)>,
}

impl Connections {
    pub(crate) fn new(server_name: impl Into<String>, motd: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            motd: motd.into(),
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            sessions: DashMap::new(),
            recent_logins: DashMap::new(),
            world: None,
        }
    }

    /// Record player block edits against `world` in `store`.
    pub(crate) fn with_world(mut self, store: Arc<WorldStore>, world: impl Into<String>) -> Self {
        self.world = Some((store, world.into()));
        self
    }

    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn session_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.sessions.iter().map(|s| s.name.clone()).collect();
        names.sort();
        names
    }

    fn admit(&self, addr: SocketAddr, outbound: mpsc::UnboundedSender<Outbound>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(id, Peer { addr, outbound });
        debug!("Connection {} from {} pending login", id, addr);
        id
    }

    /// Promote a pending connection to a session.
    fn login(&self, id: ConnectionId, name: String) -> CollaboratorResult {
        let Some((_, peer)) = self.pending.remove(&id) else {
            return Err(format!("connection {} is not pending", id).into());
        };
        peer.send(identification_packet(&self.server_name, &self.motd))?;

        let returning = self
            .recent_logins
            .insert(name.to_lowercase(), Instant::now())
            .is_some();
        info!("{} logged in from {} (session {})", name, peer.addr, id);
        self.sessions.insert(
            id,
            Session {
                name: name.clone(),
                peer,
                last_seen: Mutex::new(Instant::now()),
            },
        );

        if returning {
            self.broadcast(&format!("{} reconnected", name));
        } else {
            self.broadcast(&format!("{} joined the game", name));
        }
        Ok(())
    }

    fn touch(&self, id: SessionId) {
        if let Some(session) = self.sessions.get(&id) {
            *session.last_seen.lock() = Instant::now();
        }
    }

    fn forget(&self, id: u64) {
        self.pending.remove(&id);
        if let Some((_, session)) = self.sessions.remove(&id) {
            info!("{} disconnected", session.name);
        }
    }

    /// Record a block edit made by a session.
    fn block_changed(&self, id: SessionId, edit: BlockEdit) {
        let Some((store, world)) = &self.world else {
            return;
        };
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let change = format!(
            "{} {} {} {} {}",
            session.name, edit.x, edit.y, edit.z, edit.block
        );
        if !store.record_change(world, change) {
            debug!("Dropped block change by {}: {} is not loaded", session.name, world);
        }
    }

    /// Relay a chat message from a session to everyone.
    fn chat(&self, id: SessionId, message: &str) {
        let Some(name) = self.sessions.get(&id).map(|s| s.name.clone()) else {
            return;
        };
        self.broadcast(&format!("{}: {}", name, message));
    }

    /// Ping every session so dead sockets surface as write errors.
    pub(crate) fn ping_all(&self) {
        for session in self.sessions.iter() {
            let _ = session.peer.send(vec![PING_OPCODE]);
        }
    }

    /// Kick sessions that have been silent for longer than `timeout`.
    pub(crate) fn kick_idle(&self, timeout: Duration) -> usize {
        let idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|s| s.last_seen.lock().elapsed() > timeout)
            .map(|s| *s.key())
            .collect();
        for id in &idle {
            let _ = self.disconnect(*id, "Timed out");
        }
        idle.len()
    }

    /// Drop "recent login" entries older than `ttl`.
    pub(crate) fn cleanup_recent_logins(&self, ttl: Duration) -> usize {
        let before = self.recent_logins.len();
        self.recent_logins.retain(|_, seen| seen.elapsed() <= ttl);
        before - self.recent_logins.len()
    }
}

impl SessionRegistry for Connections {
    fn all_active(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|s| *s.key()).collect()
    }

    fn disconnect(&self, session: SessionId, reason: &str) -> CollaboratorResult {
        let Some((_, session)) = self.sessions.remove(&session) else {
            return Ok(());
        };
        info!("Disconnecting {}: {}", session.name, reason);
        let sent = session.peer.send(encode_kick_packet(reason));
        session.peer.close();
        sent
    }

    fn broadcast(&self, message: &str) {
        info!("[broadcast] {}", message);
        let packet = chat_packet(message);
        for session in self.sessions.iter() {
            let _ = session.peer.send(packet.clone());
        }
    }
}

impl PendingConnections for Connections {
    fn all_pending(&self) -> Vec<ConnectionId> {
        self.pending.iter().map(|p| *p.key()).collect()
    }

    fn notify(&self, connection: ConnectionId, bytes: &[u8]) -> CollaboratorResult {
        let Some((_, peer)) = self.pending.remove(&connection) else {
            return Ok(());
        };
        let sent = peer.send(bytes.to_vec());
        peer.close();
        sent
    }
}

/// The accepting socket.
pub(crate) struct Listener {
    local_addr: SocketAddr,
    closed: watch::Sender<bool>,
}

impl Listener {
    /// Bind `addr` and start accepting on `runtime`.
    pub(crate) fn open(
        addr: &str,
        connections: Arc<Connections>,
        runtime: &Handle,
    ) -> std::io::Result<Arc<Self>> {
        let std_listener = std::net::TcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let local_addr = std_listener.local_addr()?;

        let listener = {
            let _enter = runtime.enter();
            TcpListener::from_std(std_listener)?
        };
        let (closed, closed_rx) = watch::channel(false);
        runtime.spawn(accept_loop(listener, connections, closed_rx));

        info!("Listening on {}", local_addr);
        Ok(Arc::new(Self { local_addr, closed }))
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl NetworkListener for Listener {
    fn close(&self) -> CollaboratorResult {
        info!("Closing listener on {}", self.local_addr);
        self.closed.send_replace(true);
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    connections: Arc<Connections>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = closed.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tokio::spawn(serve(Arc::clone(&connections), stream, addr));
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
        }
    }
    debug!("Accept loop finished");
}

async fn serve(connections: Arc<Connections>, stream: TcpStream, addr: SocketAddr) {
    let (mut reader, mut writer) = stream.into_split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();

    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            match message {
                Outbound::Bytes(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => break,
            }
        }
        let _ = writer.shutdown().await;
    });

    let id = connections.admit(addr, outbound.clone());

    let mut handshake = [0u8; HANDSHAKE_LEN];
    let logged_in = match tokio::time::timeout(LOGIN_TIMEOUT, reader.read_exact(&mut handshake)).await
    {
        Ok(Ok(_)) if handshake[0] == IDENTIFICATION_OPCODE => {
            let name = decode_string(&handshake[2..2 + STRING_LEN]);
            match connections.login(id, name) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Login of connection {} abandoned: {}", id, e);
                    false
                }
            }
        }
        _ => false,
    };

    if logged_in {
        read_packets(&connections, id, &mut reader).await;
    }

    connections.forget(id);
    let _ = outbound.send(Outbound::Close);
    let _ = writer_task.await;
}

/// Handle client packets until the connection closes or misbehaves.
async fn read_packets(
    connections: &Connections,
    id: SessionId,
    reader: &mut tokio::net::tcp::OwnedReadHalf,
) {
    let mut packet = [0u8; HANDSHAKE_LEN];
    loop {
        let Ok(opcode) = reader.read_u8().await else {
            break;
        };
        let Some(len) = client_packet_len(opcode) else {
            warn!("Session {} sent unknown opcode {:#04x}", id, opcode);
            break;
        };
        packet[0] = opcode;
        if reader.read_exact(&mut packet[1..len]).await.is_err() {
            break;
        }
        connections.touch(id);

        match opcode {
            SET_BLOCK_OPCODE => {
                if let Some(edit) = BlockEdit::decode(&packet[..len]) {
                    connections.block_changed(id, edit);
                }
            }
            MESSAGE_OPCODE => connections.chat(id, &decode_string(&packet[2..len])),
            _ => {}
        }
    }
}
