//! Sync broadcast hub: shared state, WebSocket handler, and message
//! dispatch.
//!
//! Each connection gets a writer task draining an outbound channel and a
//! reader loop processing inbound frames. Inbound messages are parsed and
//! validated before any business logic runs; every rejection goes back to
//! the sender only, and the connection stays open. Successful mutations
//! are applied through the [`TaskService`] (the store serializes them) and
//! broadcast to every registered connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use taskboard_proto::message::{self, ClientMessage, ServerMessage};
use tokio::sync::mpsc;

use crate::chat;
use crate::provider::CompletionProvider;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::service::{ServiceError, TaskService};
use crate::store::Store;

/// Shared server state, constructed once and injected into every handler.
pub struct AppState {
    /// Live connection set.
    pub registry: Arc<ConnectionRegistry>,
    /// Validating mutation facade.
    pub service: TaskService,
    /// Backing row store (chat persistence goes straight to it).
    pub store: Arc<Store>,
    /// Streaming completion client.
    pub provider: Arc<dyn CompletionProvider>,
    /// Origins accepted at WebSocket handshake time.
    pub allowed_origins: Vec<String>,
}

impl AppState {
    /// Creates fresh state over an empty store.
    #[must_use]
    pub fn new(provider: Arc<dyn CompletionProvider>, allowed_origins: Vec<String>) -> Self {
        let store = Arc::new(Store::new());
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            service: TaskService::new(Arc::clone(&store)),
            store,
            provider,
            allowed_origins,
        }
    }
}

/// Builds the axum router for the sync and chat endpoints.
pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/api/chat", axum::routing::post(chat::chat_handler))
        .with_state(state)
}

/// Starts the server on the given address and returns the bound address
/// and a join handle.
///
/// The heartbeat sweep is not started here; callers spawn it via
/// [`crate::registry::spawn_heartbeat`] so tests can control the interval.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    state: Arc<AppState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Upgrades `/ws` requests, gating on the `Origin` header first.
///
/// A present-but-unlisted origin is rejected with 403 before the upgrade,
/// so a rejected handshake never touches the registry. Requests without an
/// `Origin` header (non-browser clients) are accepted.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Some(origin) = headers.get(header::ORIGIN) {
        let allowed = origin
            .to_str()
            .is_ok_and(|o| state.allowed_origins.iter().any(|a| a == o));
        if !allowed {
            tracing::warn!(origin = ?origin, "rejecting WebSocket handshake from unlisted origin");
            return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handles one upgraded WebSocket connection.
///
/// Lifecycle: register, send the full-state `todo:sync` snapshot, then run
/// a writer task and a reader loop until either side ends; finally
/// unregister.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let conn_id = state.registry.register(tx).await;
    tracing::info!(conn = %conn_id, "client connected");

    // Snapshot-on-connect: the new peer starts from the authoritative
    // list, most-recently-created first.
    let sync = ServerMessage::Sync {
        data: state.service.list().await,
    };
    state.registry.send_to(conn_id, &sync).await;

    // Writer task: drains the outbound channel into the socket. A close
    // frame (from the heartbeat sweep) ends the task after being sent.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    // Reader loop: text frames are dispatched, pongs feed the liveness
    // tracker. axum answers pings itself.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text(conn_id, text.as_str(), &reader_state).await;
                }
                Message::Pong(_) => reader_state.registry.mark_alive(conn_id).await,
                Message::Close(_) => {
                    tracing::debug!(conn = %conn_id, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    state.registry.unregister(conn_id).await;
    tracing::info!(conn = %conn_id, "client disconnected");
}

/// Processes one inbound text frame from a registered connection.
///
/// Parse and schema failures, as well as service errors, are reported to
/// the sender only and never broadcast; none of them close the connection.
async fn handle_text(conn_id: ConnectionId, text: &str, state: &Arc<AppState>) {
    let msg = match message::parse_client_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(conn = %conn_id, error = %e, "rejecting invalid message");
            let reply = ServerMessage::Error {
                message: e.to_string(),
                original_type: e.original_type().map(String::from),
            };
            state.registry.send_to(conn_id, &reply).await;
            return;
        }
    };

    let type_tag = msg.type_tag();
    if let Err(e) = dispatch(conn_id, msg, state).await {
        tracing::warn!(conn = %conn_id, error = %e, "mutation rejected");
        let reply = ServerMessage::Error {
            message: e.to_string(),
            original_type: Some(type_tag.to_string()),
        };
        state.registry.send_to(conn_id, &reply).await;
    }
}

/// Applies a validated mutation and broadcasts the authoritative result.
async fn dispatch(
    conn_id: ConnectionId,
    msg: ClientMessage,
    state: &Arc<AppState>,
) -> Result<(), ServiceError> {
    match msg {
        ClientMessage::Create { temp_id, title } => {
            let task = state.service.create(&title).await?;
            tracing::debug!(conn = %conn_id, id = task.id, "task created");
            state
                .registry
                .broadcast_created(conn_id, &temp_id, &task)
                .await;
        }
        ClientMessage::Update {
            id,
            title,
            completed,
        } => {
            let task = state.service.update(id, title.as_deref(), completed).await?;
            tracing::debug!(conn = %conn_id, id, "task updated");
            state
                .registry
                .broadcast(&ServerMessage::Updated { data: task })
                .await;
        }
        ClientMessage::Delete { id } => {
            state.service.delete(id).await?;
            tracing::debug!(conn = %conn_id, id, "task deleted");
            state
                .registry
                .broadcast(&ServerMessage::Deleted { id })
                .await;
        }
    }
    Ok(())
}
