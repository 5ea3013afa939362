//! Connection registry and heartbeat sweep.
//!
//! The registry tracks every live WebSocket connection by an opaque id and
//! holds the sender half of each connection's outbound channel. It is
//! constructed once and injected wherever fan-out is needed; nothing in
//! the server reaches for a global connection set.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use taskboard_proto::message::{self, ServerMessage, Task};
use tokio::sync::{RwLock, mpsc};

/// Opaque identifier for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-connection bookkeeping.
struct PeerConn {
    /// Channel into the connection's writer task.
    sender: mpsc::UnboundedSender<Message>,
    /// Cleared by the sweep, set again by a pong. A connection that is
    /// still cleared on the next sweep is considered dead.
    alive: bool,
}

/// Registry of live connections with liveness tracking.
#[derive(Default)]
pub struct ConnectionRegistry {
    conns: RwLock<HashMap<u64, PeerConn>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection, returning its id. New connections start
    /// alive.
    pub async fn register(&self, sender: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut conns = self.conns.write().await;
        conns.insert(
            id,
            PeerConn {
                sender,
                alive: true,
            },
        );
        ConnectionId(id)
    }

    /// Removes a connection. Returns `true` if it was registered.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut conns = self.conns.write().await;
        conns.remove(&id.0).is_some()
    }

    /// Marks a connection as having answered the last ping.
    pub async fn mark_alive(&self, id: ConnectionId) {
        let mut conns = self.conns.write().await;
        if let Some(conn) = conns.get_mut(&id.0) {
            conn.alive = true;
        }
    }

    /// Number of currently registered connections.
    pub async fn len(&self) -> usize {
        self.conns.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.conns.read().await.is_empty()
    }

    /// Sends a message to a single connection. Dropped silently if the
    /// connection is gone; its reader loop handles the actual teardown.
    pub async fn send_to(&self, id: ConnectionId, msg: &ServerMessage) {
        let conns = self.conns.read().await;
        if let Some(conn) = conns.get(&id.0) {
            send_frame(id, conn, msg);
        }
    }

    /// Broadcasts a message to every registered connection, including the
    /// one that triggered it.
    pub async fn broadcast(&self, msg: &ServerMessage) {
        let conns = self.conns.read().await;
        for (id, conn) in conns.iter() {
            send_frame(ConnectionId(*id), conn, msg);
        }
    }

    /// Broadcasts a `todo:created` message. Only the originating
    /// connection receives the correlation `tempId`; everyone else gets
    /// the bare authoritative row.
    pub async fn broadcast_created(&self, origin: ConnectionId, temp_id: &str, task: &Task) {
        let conns = self.conns.read().await;
        for (id, conn) in conns.iter() {
            let msg = ServerMessage::Created {
                temp_id: (*id == origin.0).then(|| temp_id.to_string()),
                data: task.clone(),
            };
            send_frame(ConnectionId(*id), conn, &msg);
        }
    }

    /// One heartbeat tick: terminates every connection that failed to
    /// answer the previous ping, then marks the survivors unalive and
    /// pings them. Returns the number of connections terminated, giving a
    /// dead-peer detection window of one sweep interval.
    pub async fn sweep(&self) -> usize {
        let mut conns = self.conns.write().await;
        let dead: Vec<u64> = conns
            .iter()
            .filter(|(_, c)| !c.alive)
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            if let Some(conn) = conns.remove(id) {
                tracing::info!(conn = %ConnectionId(*id), "terminating unresponsive connection");
                let _ = conn.sender.send(Message::Close(None));
            }
        }
        for (id, conn) in conns.iter_mut() {
            conn.alive = false;
            if conn.sender.send(Message::Ping(Bytes::new())).is_err() {
                tracing::debug!(conn = %ConnectionId(*id), "ping send failed, writer gone");
            }
        }
        dead.len()
    }
}

/// Serializes and queues one server message for a connection's writer.
fn send_frame(id: ConnectionId, conn: &PeerConn, msg: &ServerMessage) {
    match message::encode_server_message(msg) {
        Ok(text) => {
            if conn.sender.send(Message::Text(text.into())).is_err() {
                tracing::debug!(conn = %id, "send to closed connection dropped");
            }
        }
        Err(e) => {
            tracing::error!(conn = %id, error = %e, "failed to encode server message");
        }
    }
}

/// Spawns the periodic heartbeat sweep over the given registry.
///
/// Abort the returned handle on shutdown; the sweep holds no state beyond
/// the registry reference, so aborting cannot leak a connection.
pub fn spawn_heartbeat(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a fresh connection
        // gets a full interval before its first ping.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let terminated = registry.sweep().await;
            if terminated > 0 {
                tracing::info!(terminated, "heartbeat sweep removed dead connections");
            }
        }
    })
}
