//! End-to-end tests over a real WebSocket server.

use folio_collab::protocol::{ClientFrame, ClientMessage, ErrorKind, ServerMessage};
use folio_collab::server::{CollabServer, ServerConfig};
use folio_collab::SessionEvent;
use folio_core::{Cursor, Operation, Role, User};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on an ephemeral port.
async fn start_test_server() -> (Arc<CollabServer>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = Arc::new(CollabServer::new(ServerConfig::for_testing()).unwrap());
    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        serving.serve(listener).await.unwrap();
    });
    (server, format!("ws://127.0.0.1:{port}"))
}

async fn connect(url: &str) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut Ws, request_id: u64, message: ClientMessage) {
    let bytes = ClientFrame::new(request_id, message).encode().unwrap();
    ws.send(Message::Binary(bytes.into())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> ServerMessage {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("message within timeout")
            .expect("stream open")
            .expect("websocket ok");
        if let Message::Binary(data) = msg {
            return ServerMessage::decode(&data).unwrap();
        }
    }
}

/// Next reply, skipping pushed events.
async fn reply(ws: &mut Ws) -> ServerMessage {
    loop {
        match recv(ws).await {
            ServerMessage::Event(_) => continue,
            other => return other,
        }
    }
}

/// Next pushed event, skipping replies.
async fn event(ws: &mut Ws) -> SessionEvent {
    loop {
        if let ServerMessage::Event(event) = recv(ws).await {
            return event;
        }
    }
}

fn user(name: &str, role: Role) -> User {
    User::new(Uuid::new_v4(), name, format!("{name}@example.com"), role)
}

fn create(user: User, content: &str) -> ClientMessage {
    ClientMessage::CreateSession {
        report_id: Uuid::new_v4(),
        template_id: Uuid::nil(),
        user,
        content: Some(content.to_string()),
        settings: None,
    }
}

async fn open_session(ws: &mut Ws, owner: User, content: &str) -> Uuid {
    send(ws, 1, create(owner, content)).await;
    match reply(ws).await {
        ServerMessage::Joined { request_id: 1, session } => session.id,
        other => panic!("expected Joined, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ping_pong() {
    let (_server, url) = start_test_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, 7, ClientMessage::Ping).await;
    assert_eq!(reply(&mut ws).await, ServerMessage::Pong { request_id: 7 });
}

#[tokio::test]
async fn test_request_before_join_is_rejected() {
    let (_server, url) = start_test_server().await;
    let mut ws = connect(&url).await;

    send(&mut ws, 3, ClientMessage::UpdateCursor { cursor: Cursor::at(0) }).await;
    match reply(&mut ws).await {
        ServerMessage::Error { request_id, kind, .. } => {
            assert_eq!(request_id, 3);
            assert_eq!(kind, ErrorKind::Protocol);
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_garbage_frame_is_rejected() {
    let (server, url) = start_test_server().await;
    let mut ws = connect(&url).await;

    ws.send(Message::Binary(vec![0xff, 0x00, 0xff].into())).await.unwrap();
    assert!(matches!(
        reply(&mut ws).await,
        ServerMessage::Error { kind: ErrorKind::Protocol, .. }
    ));
    assert_eq!(server.stats().await.rejected_frames, 1);
}

#[tokio::test]
async fn test_edits_reach_other_participants() {
    let (server, url) = start_test_server().await;
    let alice = user("alice", Role::Editor);
    let bob = user("bob", Role::Editor);

    let mut alice_ws = connect(&url).await;
    let session_id = open_session(&mut alice_ws, alice.clone(), "world").await;

    let mut bob_ws = connect(&url).await;
    send(&mut bob_ws, 1, ClientMessage::JoinSession { session_id, user: bob.clone() }).await;
    match reply(&mut bob_ws).await {
        ServerMessage::Joined { session, .. } => {
            assert_eq!(session.content, "world");
            assert_eq!(session.online_count(), 2);
        }
        other => panic!("expected Joined, got {other:?}"),
    }
    match event(&mut alice_ws).await {
        SessionEvent::UserJoined { user, .. } => assert_eq!(user.id, bob.id),
        other => panic!("unexpected event {other:?}"),
    }

    // The server stamps the connection's user as author.
    let op = Operation::insert(Uuid::nil(), 0, "hello ").with_base_revision(0);
    send(&mut bob_ws, 2, ClientMessage::ApplyOperation { operation: op }).await;
    assert_eq!(
        reply(&mut bob_ws).await,
        ServerMessage::Ack { request_id: 2, revision: Some(1) }
    );

    match event(&mut alice_ws).await {
        SessionEvent::OperationApplied { operation, revision, .. } => {
            assert_eq!(revision, 1);
            assert_eq!(operation.author_id, bob.id);
            assert_eq!(operation.content.as_deref(), Some("hello "));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let session = server.manager().session(session_id).await.unwrap();
    assert_eq!(session.content, "hello world");
}

#[tokio::test]
async fn test_cursor_not_echoed_to_sender() {
    let (_server, url) = start_test_server().await;
    let alice = user("alice", Role::Editor);
    let bob = user("bob", Role::Editor);

    let mut alice_ws = connect(&url).await;
    let session_id = open_session(&mut alice_ws, alice, "some text").await;
    let mut bob_ws = connect(&url).await;
    send(&mut bob_ws, 1, ClientMessage::JoinSession { session_id, user: bob }).await;
    reply(&mut bob_ws).await;
    event(&mut alice_ws).await;

    send(&mut alice_ws, 2, ClientMessage::UpdateCursor { cursor: Cursor::at(4) }).await;
    send(&mut alice_ws, 3, ClientMessage::Ping).await;
    assert_eq!(recv(&mut alice_ws).await, ServerMessage::Ack { request_id: 2, revision: None });
    assert_eq!(recv(&mut alice_ws).await, ServerMessage::Pong { request_id: 3 });

    match event(&mut bob_ws).await {
        SessionEvent::CursorUpdate { cursor, .. } => assert_eq!(cursor.position, 4),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_viewer_edit_is_denied() {
    let (_server, url) = start_test_server().await;
    let mut alice_ws = connect(&url).await;
    let session_id = open_session(&mut alice_ws, user("alice", Role::Editor), "text").await;

    let mut vera_ws = connect(&url).await;
    send(
        &mut vera_ws,
        1,
        ClientMessage::JoinSession {
            session_id,
            user: user("vera", Role::Viewer),
        },
    )
    .await;
    reply(&mut vera_ws).await;

    let op = Operation::insert(Uuid::nil(), 0, "x");
    send(&mut vera_ws, 2, ClientMessage::ApplyOperation { operation: op }).await;
    match reply(&mut vera_ws).await {
        ServerMessage::Error { request_id, kind, .. } => {
            assert_eq!(request_id, 2);
            assert_eq!(kind, ErrorKind::PermissionDenied);
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_leaves_session() {
    let (server, url) = start_test_server().await;
    let bob = user("bob", Role::Editor);

    let mut alice_ws = connect(&url).await;
    let session_id = open_session(&mut alice_ws, user("alice", Role::Editor), "").await;
    let mut bob_ws = connect(&url).await;
    send(&mut bob_ws, 1, ClientMessage::JoinSession { session_id, user: bob.clone() }).await;
    reply(&mut bob_ws).await;
    event(&mut alice_ws).await;

    drop(bob_ws);
    match event(&mut alice_ws).await {
        SessionEvent::UserLeft { user_id, .. } => assert_eq!(user_id, bob.id),
        other => panic!("unexpected event {other:?}"),
    }

    alice_ws.close(None).await.unwrap();
    for _ in 0..50 {
        if server.manager().active_sessions().await.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session was not closed after the last participant disconnected");
}
