//! Reconnecting WebSocket transport.
//!
//! Owns one logical connection to the server. A background task runs the
//! connection state machine (`connecting -> connected -> disconnected ->
//! connecting -> ...`, with a terminal `closed` reachable only through
//! [`Transport::disconnect`] or a normal server close) and reconnects with
//! exponential backoff after abnormal drops. Callers see a typed
//! send/receive surface and a watchable [`Status`].

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use taskboard_proto::message::{ClientMessage, ServerMessage, decode_server_message,
    encode_client_message};

use crate::backoff::{Backoff, ReconnectConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors surfaced by the transport's caller-facing API.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport has shut down and will not reconnect.
    #[error("transport is closed")]
    Closed,
}

/// Connection status as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A connection attempt is in flight.
    Connecting,
    /// The socket is open; sends are delivered.
    Connected,
    /// The socket dropped abnormally; a reconnect is scheduled.
    Disconnected,
    /// Terminal. Reached only via [`Transport::disconnect`] or a normal
    /// server close.
    Closed,
}

enum Command {
    Send(ClientMessage),
    Shutdown,
}

/// Handle to the background connection task.
///
/// Dropping the handle shuts the task down (the command channel closes,
/// which the task treats as a shutdown request).
pub struct Transport {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Status>,
    incoming: Arc<Mutex<mpsc::UnboundedReceiver<ServerMessage>>>,
    _run_handle: tokio::task::JoinHandle<()>,
}

impl Transport {
    /// Starts the connection loop against `url` (ws:// or wss://).
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. Watch [`Transport::subscribe_status`] to observe it.
    #[must_use]
    pub fn connect(url: &str, config: ReconnectConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::Connecting);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let run_handle = tokio::spawn(run_loop(
            url.to_string(),
            config,
            command_rx,
            status_tx,
            incoming_tx,
        ));

        Self {
            commands: command_tx,
            status: status_rx,
            incoming: Arc::new(Mutex::new(incoming_rx)),
            _run_handle: run_handle,
        }
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// A watch receiver for status transitions, for callers that need to
    /// await a particular state.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    /// Queues a message for the server.
    ///
    /// Messages queued while the transport is not connected are dropped;
    /// the post-reconnect `todo:sync` snapshot supersedes them.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the transport has shut down.
    pub fn send(&self, msg: ClientMessage) -> Result<(), TransportError> {
        self.commands
            .send(Command::Send(msg))
            .map_err(|_| TransportError::Closed)
    }

    /// Receives the next server message. Returns `None` once the transport
    /// is closed and the queue is drained.
    pub async fn recv(&self) -> Option<ServerMessage> {
        self.incoming.lock().await.recv().await
    }

    /// Shuts the transport down. Idempotent; cancels any pending reconnect
    /// timer.
    pub fn disconnect(&self) {
        // An Err here means the run loop already exited, which is fine.
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// The connection state machine. One instance per [`Transport`], running
/// until shutdown or a normal server close.
async fn run_loop(
    url: String,
    config: ReconnectConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<Status>,
    incoming: mpsc::UnboundedSender<ServerMessage>,
) {
    let mut backoff = Backoff::new(&config);

    loop {
        let _ = status.send(Status::Connecting);
        let ws = match connect_async(&url).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "connect failed");
                let _ = status.send(Status::Disconnected);
                if !wait_backoff(&mut backoff, &mut commands).await {
                    break;
                }
                continue;
            }
        };

        backoff.reset();
        let _ = status.send(Status::Connected);
        tracing::info!(url = %url, "connected");

        match run_connection(ws, &mut commands, &incoming).await {
            ConnectionEnd::Normal => break,
            ConnectionEnd::Abnormal => {
                let _ = status.send(Status::Disconnected);
                if !wait_backoff(&mut backoff, &mut commands).await {
                    break;
                }
            }
        }
    }

    let _ = status.send(Status::Closed);
}

enum ConnectionEnd {
    /// Caller shutdown or normal server close. Do not reconnect.
    Normal,
    /// The socket dropped or errored. Reconnect after backoff.
    Abnormal,
}

/// Drives one open socket until it ends.
async fn run_connection(
    ws: WsStream,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    incoming: &mpsc::UnboundedSender<ServerMessage>,
) -> ConnectionEnd {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Send(msg)) => {
                    let text = match encode_client_message(&msg) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to encode outgoing message");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::warn!(error = %e, "send failed, socket is gone");
                        return ConnectionEnd::Abnormal;
                    }
                }
                Some(Command::Shutdown) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return ConnectionEnd::Normal;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match decode_server_message(&text) {
                    Ok(msg) => {
                        if incoming.send(msg).is_err() {
                            // Receiver side dropped; treat as shutdown.
                            return ConnectionEnd::Normal;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed server frame");
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    if sink.send(Message::Pong(data)).await.is_err() {
                        return ConnectionEnd::Abnormal;
                    }
                }
                Some(Ok(Message::Close(close_frame))) => {
                    let normal = close_frame
                        .as_ref()
                        .is_some_and(|f| f.code == CloseCode::Normal);
                    if normal {
                        tracing::info!("server closed the connection normally");
                        return ConnectionEnd::Normal;
                    }
                    tracing::warn!(frame = ?close_frame, "server closed abnormally");
                    return ConnectionEnd::Abnormal;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "socket error");
                    return ConnectionEnd::Abnormal;
                }
                None => {
                    tracing::warn!("socket stream ended");
                    return ConnectionEnd::Abnormal;
                }
            },
        }
    }
}

/// Waits out the current backoff delay, still servicing commands so that an
/// explicit shutdown cancels the pending reconnect immediately.
///
/// Returns `false` when shutdown was requested during the wait.
async fn wait_backoff(backoff: &mut Backoff, commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
    let delay = backoff.next_delay();
    tracing::debug!(?delay, "scheduling reconnect");
    let deadline = tokio::time::Instant::now() + delay;

    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => return true,
            cmd = commands.recv() => match cmd {
                // Sends while disconnected are dropped, not queued; the
                // reconnect sync snapshot supersedes them.
                Some(Command::Send(_)) => {}
                Some(Command::Shutdown) | None => return false,
            },
        }
    }
}
