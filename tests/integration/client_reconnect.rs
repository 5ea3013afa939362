// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the reconnecting transport and the optimistic
//! reconciler, run against the real server.
//!
//! ## Disconnect simulation
//!
//! Aborting the server's `JoinHandle` does not close existing WebSocket
//! connections (they live on independently-spawned tasks). Instead we put
//! a **TCP proxy** between the client and the real server. Killing the
//! proxy aborts every proxied connection task, which drops both TCP
//! streams and lets the client's WebSocket layer observe an abnormal
//! disconnect.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use taskboard_client::backoff::ReconnectConfig;
use taskboard_client::reconciler::Reconciler;
use taskboard_client::transport::{Status, Transport};
use taskboard_proto::message::ServerMessage;
use taskboard_server::hub::{self, AppState};
use taskboard_server::provider::{ChatTurn, CompletionProvider, CompletionStream, ProviderError};

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

// =============================================================================
// TCP proxy helper
// =============================================================================

/// Forwards traffic between a client-facing port and the real server.
/// `kill()` aborts all connection tasks, severing every proxied stream.
struct TcpProxy {
    accept_handle: tokio::task::JoinHandle<()>,
    conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl TcpProxy {
    async fn new(proxy_port: u16, backend_addr: std::net::SocketAddr) -> Self {
        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{proxy_port}"))
            .await
            .unwrap_or_else(|e| panic!("proxy: failed to bind to port {proxy_port}: {e}"));
        let conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let conn_handles_clone = Arc::clone(&conn_handles);

        let accept_handle = tokio::spawn(async move {
            loop {
                let Ok((mut client_stream, _)) = listener.accept().await else {
                    break;
                };
                let conn_handle = tokio::spawn(async move {
                    let Ok(mut backend_stream) =
                        tokio::net::TcpStream::connect(backend_addr).await
                    else {
                        return;
                    };
                    // No sub-tasks, so aborting this task drops both
                    // streams immediately.
                    let _ = tokio::io::copy_bidirectional(&mut client_stream, &mut backend_stream)
                        .await;
                });
                conn_handles_clone.lock().unwrap().push(conn_handle);
            }
        });

        Self {
            accept_handle,
            conn_handles,
        }
    }

    fn kill(self) {
        self.accept_handle.abort();
        for h in self.conn_handles.lock().unwrap().iter() {
            h.abort();
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn find_free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

async fn start_test_server() -> (Arc<AppState>, std::net::SocketAddr) {
    let state = Arc::new(AppState::new(Arc::new(StubProvider), Vec::new()));
    let (addr, _handle) = hub::start_server("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start server");
    (state, addr)
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(2),
    }
}

/// Waits until the transport reports `target`, with a timeout.
async fn wait_for_status(transport: &Transport, target: Status) {
    let mut rx = transport.subscribe_status();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *rx.borrow() == target {
                return;
            }
            rx.changed().await.expect("status channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for status {target:?}"));
}

async fn recv_with_timeout(transport: &Transport) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(5), transport.recv())
        .await
        .expect("timed out waiting for server message")
        .expect("transport closed")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn connects_and_receives_initial_sync() {
    let (state, addr) = start_test_server().await;
    state.service.create("pre-existing").await.unwrap();

    let transport = Transport::connect(&format!("ws://{addr}/ws"), fast_reconnect());
    wait_for_status(&transport, Status::Connected).await;

    let ServerMessage::Sync { data } = recv_with_timeout(&transport).await else {
        panic!("first message was not a sync");
    };
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].title, "pre-existing");
}

#[tokio::test]
async fn optimistic_create_round_trip() {
    let (_state, addr) = start_test_server().await;

    let transport = Transport::connect(&format!("ws://{addr}/ws"), fast_reconnect());
    wait_for_status(&transport, Status::Connected).await;

    let mut reconciler = Reconciler::new();
    if let ServerMessage::Sync { data } = recv_with_timeout(&transport).await {
        reconciler.apply(ServerMessage::Sync { data });
    }

    transport.send(reconciler.create("buy milk")).unwrap();
    assert!(reconciler.tasks()[0].id < 0);

    let confirmed = recv_with_timeout(&transport).await;
    assert!(matches!(&confirmed, ServerMessage::Created { temp_id: Some(_), .. }));
    reconciler.apply(confirmed);

    assert_eq!(reconciler.tasks().len(), 1);
    assert!(reconciler.tasks()[0].id > 0);
    assert_eq!(reconciler.tasks()[0].title, "buy milk");
    assert_eq!(reconciler.pending_creates(), 0);
}

#[tokio::test]
async fn reconnects_after_abnormal_drop_and_resyncs() {
    let (state, addr) = start_test_server().await;
    state.service.create("survivor").await.unwrap();

    let proxy_port = find_free_port().await;
    let proxy = TcpProxy::new(proxy_port, addr).await;

    let transport = Transport::connect(
        &format!("ws://127.0.0.1:{proxy_port}/ws"),
        fast_reconnect(),
    );
    wait_for_status(&transport, Status::Connected).await;

    let mut reconciler = Reconciler::new();
    let first_sync = recv_with_timeout(&transport).await;
    reconciler.apply(first_sync);
    assert_eq!(reconciler.tasks().len(), 1);

    // A create whose confirmation never arrives.
    proxy.kill();
    wait_for_status(&transport, Status::Disconnected).await;
    let _ = transport.send(reconciler.create("lost in transit"));
    assert_eq!(reconciler.pending_creates(), 1);

    // Bring the path back; the transport reconnects on its own.
    let _proxy2 = TcpProxy::new(proxy_port, addr).await;
    wait_for_status(&transport, Status::Connected).await;

    let resync = recv_with_timeout(&transport).await;
    assert!(matches!(resync, ServerMessage::Sync { .. }));
    reconciler.apply(resync);

    // The snapshot supersedes the unconfirmed create.
    assert_eq!(reconciler.pending_creates(), 0);
    assert_eq!(reconciler.tasks().len(), 1);
    assert_eq!(reconciler.tasks()[0].title, "survivor");
}

#[tokio::test]
async fn disconnect_is_terminal_and_idempotent() {
    let (_state, addr) = start_test_server().await;

    let transport = Transport::connect(&format!("ws://{addr}/ws"), fast_reconnect());
    wait_for_status(&transport, Status::Connected).await;

    transport.disconnect();
    transport.disconnect();
    wait_for_status(&transport, Status::Closed).await;

    // No reconnect after an explicit disconnect.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(transport.status(), Status::Closed);
}

#[tokio::test]
async fn disconnect_during_backoff_cancels_reconnect() {
    let (_state, addr) = start_test_server().await;

    let proxy_port = find_free_port().await;
    let proxy = TcpProxy::new(proxy_port, addr).await;
    let transport = Transport::connect(
        &format!("ws://127.0.0.1:{proxy_port}/ws"),
        ReconnectConfig {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
        },
    );
    wait_for_status(&transport, Status::Connected).await;

    proxy.kill();
    wait_for_status(&transport, Status::Disconnected).await;

    // Shutdown lands mid-backoff and must not wait the delay out.
    transport.disconnect();
    wait_for_status(&transport, Status::Closed).await;
}
