// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the sync broadcast hub.
//!
//! These tests run the real server in-process and drive it with raw
//! tungstenite WebSocket clients, asserting:
//! - every new connection receives a full `todo:sync` snapshot first
//! - a create is broadcast to all peers, with `tempId` echoed only to the
//!   originator
//! - validation and parse failures go back to the sender only and never
//!   close the connection
//! - the heartbeat sweep terminates connections that stop answering pings

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use taskboard_proto::message::{ServerMessage, decode_server_message};
use taskboard_server::hub::{self, AppState};
use taskboard_server::provider::{ChatTurn, CompletionProvider, CompletionStream, ProviderError};
use taskboard_server::registry::spawn_heartbeat;
use tokio_tungstenite::tungstenite::Message;

/// Provider stub for tests that never touch the chat endpoint.
struct StubProvider;

#[async_trait]
impl CompletionProvider for StubProvider {
    async fn stream_completion(
        &self,
        _system_context: &str,
        _history: &[ChatTurn],
    ) -> Result<CompletionStream, ProviderError> {
        Ok(Box::pin(futures_util::stream::empty()))
    }
}

async fn start_test_server() -> (Arc<AppState>, std::net::SocketAddr) {
    let state = Arc::new(AppState::new(Arc::new(StubProvider), Vec::new()));
    let (addr, _handle) = hub::start_server("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start server");
    (state, addr)
}

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(addr: std::net::SocketAddr) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("failed to connect");
    ws
}

/// Reads frames until the next decodable server message, with a timeout.
async fn next_message(ws: &mut WsClient) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for server message")
            .expect("stream ended")
            .expect("socket error");
        match frame {
            Message::Text(text) => return decode_server_message(&text).expect("bad frame"),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Asserts that no server message arrives within the window.
async fn assert_silent(ws: &mut WsClient, window: Duration) {
    let result = tokio::time::timeout(window, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => break other,
            }
        }
    })
    .await;
    assert!(result.is_err(), "expected silence, got {result:?}");
}

#[tokio::test]
async fn new_connection_receives_full_sync_snapshot() {
    let (state, addr) = start_test_server().await;
    state.service.create("walk dog").await.unwrap();
    state.service.create("buy milk").await.unwrap();

    let mut ws = connect(addr).await;
    let ServerMessage::Sync { data } = next_message(&mut ws).await else {
        panic!("first frame was not a sync");
    };

    // Newest first.
    assert_eq!(data.len(), 2);
    assert_eq!(data[0].title, "buy milk");
    assert_eq!(data[1].title, "walk dog");
}

#[tokio::test]
async fn create_fans_out_with_temp_id_for_originator_only() {
    let (_state, addr) = start_test_server().await;

    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    assert!(matches!(next_message(&mut alice).await, ServerMessage::Sync { .. }));
    assert!(matches!(next_message(&mut bob).await, ServerMessage::Sync { .. }));

    alice
        .send(Message::Text(
            r#"{"type":"todo:create","tempId":"t-1","title":"buy milk"}"#.into(),
        ))
        .await
        .unwrap();

    let ServerMessage::Created { temp_id, data } = next_message(&mut alice).await else {
        panic!("originator did not get created");
    };
    assert_eq!(temp_id.as_deref(), Some("t-1"));
    assert_eq!(data.title, "buy milk");
    assert!(data.id > 0);

    let ServerMessage::Created { temp_id, data } = next_message(&mut bob).await else {
        panic!("peer did not get created");
    };
    assert_eq!(temp_id, None);
    assert_eq!(data.title, "buy milk");
}

#[tokio::test]
async fn update_of_missing_id_errors_sender_only() {
    let (_state, addr) = start_test_server().await;

    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    assert!(matches!(next_message(&mut alice).await, ServerMessage::Sync { .. }));
    assert!(matches!(next_message(&mut bob).await, ServerMessage::Sync { .. }));

    alice
        .send(Message::Text(
            r#"{"type":"todo:update","id":999,"completed":true}"#.into(),
        ))
        .await
        .unwrap();

    let ServerMessage::Error {
        message,
        original_type,
    } = next_message(&mut alice).await
    else {
        panic!("expected an error reply");
    };
    assert!(message.contains("not found"), "message was: {message}");
    assert_eq!(original_type.as_deref(), Some("todo:update"));

    // The failure is private to the sender.
    assert_silent(&mut bob, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn malformed_json_errors_and_connection_survives() {
    let (_state, addr) = start_test_server().await;

    let mut ws = connect(addr).await;
    assert!(matches!(next_message(&mut ws).await, ServerMessage::Sync { .. }));

    ws.send(Message::Text("{not json".into())).await.unwrap();
    let ServerMessage::Error { original_type, .. } = next_message(&mut ws).await else {
        panic!("expected an error reply");
    };
    assert_eq!(original_type, None);

    // Same connection still works.
    ws.send(Message::Text(
        r#"{"type":"todo:create","tempId":"t-2","title":"still here"}"#.into(),
    ))
    .await
    .unwrap();
    assert!(matches!(
        next_message(&mut ws).await,
        ServerMessage::Created { .. }
    ));
}

#[tokio::test]
async fn schema_violation_reports_original_type() {
    let (_state, addr) = start_test_server().await;

    let mut ws = connect(addr).await;
    assert!(matches!(next_message(&mut ws).await, ServerMessage::Sync { .. }));

    // Well-formed JSON, but an empty title fails validation.
    ws.send(Message::Text(
        r#"{"type":"todo:create","tempId":"t-3","title":"   "}"#.into(),
    ))
    .await
    .unwrap();

    let ServerMessage::Error { original_type, .. } = next_message(&mut ws).await else {
        panic!("expected an error reply");
    };
    assert_eq!(original_type.as_deref(), Some("todo:create"));
}

#[tokio::test]
async fn delete_broadcasts_to_everyone() {
    let (state, addr) = start_test_server().await;
    let task = state.service.create("doomed").await.unwrap();

    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    assert!(matches!(next_message(&mut alice).await, ServerMessage::Sync { .. }));
    assert!(matches!(next_message(&mut bob).await, ServerMessage::Sync { .. }));

    alice
        .send(Message::Text(
            format!(r#"{{"type":"todo:delete","id":{}}}"#, task.id).into(),
        ))
        .await
        .unwrap();

    for ws in [&mut alice, &mut bob] {
        let ServerMessage::Deleted { id } = next_message(ws).await else {
            panic!("expected deleted");
        };
        assert_eq!(id, task.id);
    }
}

#[tokio::test]
async fn unresponsive_connection_is_swept() {
    let (state, addr) = start_test_server().await;
    let _sweeper = spawn_heartbeat(
        Arc::clone(&state.registry),
        Duration::from_millis(100),
    );

    let ws = connect(addr).await;
    // Initial sync is in flight but never read: an unread socket never
    // generates pong replies, so the sweep sees the connection as dead.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(state.registry.len().await, 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(state.registry.is_empty().await, "connection was not swept");
    drop(ws);
}

#[tokio::test]
async fn responsive_connection_survives_sweeps() {
    let (state, addr) = start_test_server().await;
    let _sweeper = spawn_heartbeat(
        Arc::clone(&state.registry),
        Duration::from_millis(100),
    );

    let mut ws = connect(addr).await;
    // Keep reading; tungstenite answers pings automatically on read.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while tokio::time::Instant::now() < deadline {
        let _ = tokio::time::timeout(Duration::from_millis(50), ws.next()).await;
        ws.flush().await.unwrap();
    }

    assert_eq!(state.registry.len().await, 1);
}
