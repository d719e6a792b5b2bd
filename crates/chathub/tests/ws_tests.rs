//! End-to-end WebSocket tests against a live server.

use std::net::SocketAddr;
use std::time::Duration;

use chathub::ids::{ConversationId, UserId};
use chathub::store::Conversation;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

mod common;
use common::TestApp;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, token: &str) -> Client {
    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?token={token}"))
        .await
        .unwrap();
    socket
}

async fn send_chat(client: &mut Client, conversation: &ConversationId, text: &str) {
    let frame = json!({"text": text, "conversationID": conversation.as_str(), "userID": "mallory"});
    client
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Next chat frame, skipping keepalive traffic.
async fn next_chat(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("transport error");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Read until the server closes the connection.
async fn expect_closed(client: &mut Client) {
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "connection was not closed by the server");
}

async fn conversation_with(app: &TestApp, author: &str, members: &[&str]) -> Conversation {
    let conversation = app
        .conversations
        .create_conversation("general", &UserId::from(author))
        .await
        .unwrap();
    for member in members {
        app.conversations
            .add_participant(&conversation.id, &UserId::from(*member))
            .await
            .unwrap();
    }
    conversation
}

#[tokio::test]
async fn test_handshake_rejects_invalid_token() {
    let app = TestApp::new().await;
    let addr = app.serve().await;

    for url in [
        format!("ws://{addr}/ws"),
        format!("ws://{addr}/ws?token=not-a-jwt"),
    ] {
        let err = tokio_tungstenite::connect_async(url).await.unwrap_err();
        match err {
            tungstenite::Error::Http(response) => assert_eq!(response.status(), 401),
            other => panic!("expected HTTP 401, got {other:?}"),
        }
    }

    assert!(app.hub.snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_message_reaches_participants_only() {
    let app = TestApp::new().await;
    let addr = app.serve().await;
    let conversation = conversation_with(&app, "alice", &["bob"]).await;

    let mut alice = connect(addr, &app.token("alice")).await;
    let mut bob = connect(addr, &app.token("bob")).await;
    let mut carol = connect(addr, &app.token("carol")).await;
    app.wait_online(&["alice", "bob", "carol"]).await;

    send_chat(&mut alice, &conversation.id, "  hello\nworld ").await;

    let expected = json!({
        "text": "hello world",
        "conversationID": conversation.id.as_str(),
        "userID": "alice",
    });
    assert_eq!(next_chat(&mut bob).await, expected);
    assert_eq!(next_chat(&mut alice).await, expected);

    let nothing = tokio::time::timeout(Duration::from_millis(200), carol.next()).await;
    assert!(nothing.is_err(), "non-participant received a frame");

    let history = app.conversations.history(&conversation.id, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "hello world");
    assert_eq!(history[0].author, UserId::from("alice"));
}

#[tokio::test]
async fn test_oversized_frame_disconnects() {
    let app = TestApp::new().await;
    let addr = app.serve().await;
    let conversation = conversation_with(&app, "alice", &[]).await;

    let mut alice = connect(addr, &app.token("alice")).await;
    app.wait_online(&["alice"]).await;

    let big = "x".repeat(1024);
    // The send itself may fail if the server has already dropped the socket.
    let frame = json!({"text": big, "conversationID": conversation.id.as_str()});
    let _ = alice.send(Message::Text(frame.to_string().into())).await;

    expect_closed(&mut alice).await;
    app.wait_offline("alice").await;
    assert!(
        app.conversations
            .history(&conversation.id, None)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_malformed_frame_disconnects() {
    let app = TestApp::new().await;
    let addr = app.serve().await;

    let mut alice = connect(addr, &app.token("alice")).await;
    app.wait_online(&["alice"]).await;

    alice
        .send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();

    expect_closed(&mut alice).await;
    app.wait_offline("alice").await;
}

#[tokio::test]
async fn test_second_session_closes_first() {
    let app = TestApp::new().await;
    let addr = app.serve().await;
    let conversation = conversation_with(&app, "alice", &["bob"]).await;

    let mut first = connect(addr, &app.token("bob")).await;
    app.wait_online(&["bob"]).await;
    let before = app.hub.snapshot().await.unwrap().connection_of(&UserId::from("bob"));

    let mut second = connect(addr, &app.token("bob")).await;
    expect_closed(&mut first).await;

    // Wait for the replacement, then make sure the old session's teardown
    // did not remove it.
    for _ in 0..200 {
        let current = app.hub.snapshot().await.unwrap().connection_of(&UserId::from("bob"));
        if current.is_some() && current != before {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = app.hub.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_ne!(snapshot.connection_of(&UserId::from("bob")), before);

    let mut alice = connect(addr, &app.token("alice")).await;
    app.wait_online(&["alice"]).await;
    send_chat(&mut alice, &conversation.id, "still there?").await;
    assert_eq!(next_chat(&mut second).await["text"], "still there?");
}

#[tokio::test]
async fn test_client_close_unregisters() {
    let app = TestApp::new().await;
    let addr = app.serve().await;

    let mut alice = connect(addr, &app.token("alice")).await;
    app.wait_online(&["alice"]).await;

    alice.close(None).await.unwrap();
    app.wait_offline("alice").await;
}
