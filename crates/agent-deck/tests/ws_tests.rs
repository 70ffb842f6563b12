//! WebSocket integration tests against a live listener.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use agent_deck::auth::AuthState;
use agent_deck::events::Event;
use agent_deck::session::NewSession;
use agent_deck_protocol::EventType;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

mod common;
use common::{TEST_TOKEN, TestApp, eventually, files_in};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(url: String) -> Client {
    let (stream, _) = connect_async(url).await.unwrap();
    stream
}

/// Next text frame as JSON.
async fn recv_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::text(value.to_string())).await.unwrap();
}

/// Round-trip a ping so every earlier frame has been handled by the server.
async fn sync(client: &mut Client) -> Value {
    send_json(client, json!({"type": "ping"})).await;
    recv_json(client).await
}

fn events_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/ws/events")
}

fn upload_url(addr: SocketAddr, session_id: &str) -> String {
    format!("ws://{addr}/ws/upload/{session_id}")
}

#[tokio::test]
async fn test_connected_is_first_frame() {
    let app = TestApp::new();
    let addr = app.spawn().await;

    let mut client = connect(events_url(addr)).await;
    assert_eq!(recv_json(&mut client).await, json!({"type": "connected"}));
    assert_eq!(sync(&mut client).await, json!({"type": "pong"}));
    assert_eq!(app.state.hub.client_count(), 1);
}

#[tokio::test]
async fn test_hub_routing_with_unsubscribe() {
    let app = TestApp::new();
    let addr = app.spawn().await;
    let mut client = connect(events_url(addr)).await;
    recv_json(&mut client).await;

    send_json(&mut client, json!({"type": "subscribe", "channel": "sessions"})).await;
    let subscribed = recv_json(&mut client).await;
    assert_eq!(subscribed["type"], "subscribed");
    assert_eq!(subscribed["channel"], "sessions");
    let subscription_id = subscribed["subscriptionId"].as_str().unwrap().to_string();

    app.state.bus.emit(Event::new(
        EventType::SessionStatusChanged,
        "s1",
        json!({"sessionId": "s1", "status": "running"}),
    ));
    let event = recv_json(&mut client).await;
    assert_eq!(event["type"], "event");
    assert_eq!(event["channel"], "sessions");
    assert_eq!(event["eventType"], "status-changed");
    assert_eq!(event["data"]["status"], "running");

    // Tasks are a different bucket.
    app.state
        .bus
        .emit(Event::global(EventType::TaskCreated, json!({"id": "t1"})));
    assert_eq!(sync(&mut client).await, json!({"type": "pong"}));

    send_json(
        &mut client,
        json!({"type": "unsubscribe", "subscriptionId": subscription_id}),
    )
    .await;
    assert_eq!(sync(&mut client).await, json!({"type": "pong"}));

    app.state.bus.emit(Event::new(
        EventType::SessionStatusChanged,
        "s1",
        json!({"sessionId": "s1", "status": "idle"}),
    ));
    assert_eq!(sync(&mut client).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_per_session_filter() {
    let app = TestApp::new();
    let addr = app.spawn().await;
    let mut client = connect(events_url(addr)).await;
    recv_json(&mut client).await;

    send_json(
        &mut client,
        json!({"type": "subscribe", "channel": "session", "sessionId": "s1"}),
    )
    .await;
    let subscribed = recv_json(&mut client).await;
    assert_eq!(subscribed["channel"], "session");

    app.state.bus.emit(Event::new(
        EventType::SessionUpdated,
        "s2",
        json!({"id": "s2"}),
    ));
    app.state.bus.emit(Event::new(
        EventType::SessionUpdated,
        "s1",
        json!({"id": "s1"}),
    ));

    let event = recv_json(&mut client).await;
    assert_eq!(event["eventType"], "updated");
    assert_eq!(event["data"]["id"], "s1");
    assert_eq!(sync(&mut client).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_invalid_frames_keep_connection_open() {
    let app = TestApp::new();
    let addr = app.spawn().await;
    let mut client = connect(events_url(addr)).await;
    recv_json(&mut client).await;

    client.send(Message::text("{oops")).await.unwrap();
    assert_eq!(recv_json(&mut client).await["type"], "error");

    send_json(&mut client, json!({"type": "dance"})).await;
    assert_eq!(recv_json(&mut client).await["type"], "error");

    send_json(&mut client, json!({"type": "subscribe", "channel": "weather"})).await;
    assert_eq!(recv_json(&mut client).await["type"], "error");

    send_json(&mut client, json!({"type": "unsubscribe"})).await;
    let reply = recv_json(&mut client).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["data"].as_str().unwrap().contains("subscriptionId"));

    assert_eq!(sync(&mut client).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_disconnect_unregisters_client() {
    let app = TestApp::new();
    let addr = app.spawn().await;
    let mut client = connect(events_url(addr)).await;
    recv_json(&mut client).await;
    assert_eq!(app.state.hub.client_count(), 1);

    client.close(None).await.unwrap();
    let hub = app.state.hub.clone();
    assert!(eventually(|| hub.client_count() == 0).await);
}

#[tokio::test]
async fn test_events_socket_requires_token() {
    let app = TestApp::with(|_| {}, AuthState::with_token(TEST_TOKEN));
    let addr = app.spawn().await;

    match connect_async(events_url(addr)).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("handshake should have been rejected"),
    }

    let mut client = connect(format!("{}?token={TEST_TOKEN}", events_url(addr))).await;
    assert_eq!(recv_json(&mut client).await["type"], "connected");
}

fn upload_app() -> (TestApp, PathBuf) {
    let app = TestApp::new();
    let profile = app.dir.path().join("profile-s1");
    app.state
        .sessions
        .create(NewSession {
            id: Some("s1".to_string()),
            project_path: "/work/demo".to_string(),
            profile_dir: Some(profile.clone()),
            ..Default::default()
        })
        .unwrap();
    let upload_dir = profile.join("uploads").join("s1");
    (app, upload_dir)
}

#[tokio::test]
async fn test_upload_happy_path() {
    let (app, upload_dir) = upload_app();
    let addr = app.spawn().await;
    let mut client = connect(upload_url(addr, "s1")).await;

    send_json(
        &mut client,
        json!({"type": "start", "filename": "notes.bin", "size": 131072}),
    )
    .await;
    for chunk in 0..4u8 {
        client
            .send(Message::binary(vec![chunk; 32 * 1024]))
            .await
            .unwrap();
    }

    assert_eq!(
        recv_json(&mut client).await,
        json!({"type": "progress", "received": 65536, "total": 131072})
    );
    assert_eq!(
        recv_json(&mut client).await,
        json!({"type": "progress", "received": 131072, "total": 131072})
    );

    send_json(&mut client, json!({"type": "end"})).await;
    let complete = recv_json(&mut client).await;
    assert_eq!(complete["type"], "complete");
    assert_eq!(complete["filename"], "notes.bin");
    assert_eq!(complete["size"], 131072);

    let path = PathBuf::from(complete["path"].as_str().unwrap());
    assert_eq!(path.parent().unwrap(), upload_dir);
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.ends_with("-notes.bin"));
    assert_eq!(name.len(), 32 + 1 + "notes.bin".len());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 131072);
}

#[tokio::test]
async fn test_upload_full_step_frames() {
    let (app, upload_dir) = upload_app();
    let addr = app.spawn().await;
    let mut client = connect(upload_url(addr, "s1")).await;

    send_json(
        &mut client,
        json!({"type": "start", "filename": "two.bin", "size": 131072}),
    )
    .await;
    client
        .send(Message::binary(vec![1u8; 65536]))
        .await
        .unwrap();
    assert_eq!(
        recv_json(&mut client).await,
        json!({"type": "progress", "received": 65536, "total": 131072})
    );
    client
        .send(Message::binary(vec![2u8; 65536]))
        .await
        .unwrap();
    assert_eq!(
        recv_json(&mut client).await,
        json!({"type": "progress", "received": 131072, "total": 131072})
    );

    send_json(&mut client, json!({"type": "end"})).await;
    let complete = recv_json(&mut client).await;
    assert_eq!(complete["type"], "complete");
    assert_eq!(complete["size"], 131072);

    let path = PathBuf::from(complete["path"].as_str().unwrap());
    assert_eq!(path.parent().unwrap(), upload_dir);
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 131072);
    assert!(bytes[..65536].iter().all(|b| *b == 1));
    assert!(bytes[65536..].iter().all(|b| *b == 2));
}

#[tokio::test]
async fn test_upload_abort_on_disconnect_removes_partial() {
    let (app, upload_dir) = upload_app();
    let addr = app.spawn().await;
    let mut client = connect(upload_url(addr, "s1")).await;

    send_json(
        &mut client,
        json!({"type": "start", "filename": "big.bin", "size": 131072}),
    )
    .await;
    client
        .send(Message::binary(vec![7u8; 32 * 1024]))
        .await
        .unwrap();

    let dir = upload_dir.clone();
    assert!(
        eventually(|| files_in(&dir)
            .iter()
            .any(|p| std::fs::metadata(p).map(|m| m.len()).unwrap_or(0) == 32 * 1024))
        .await
    );

    client.close(None).await.unwrap();
    drop(client);

    let dir = upload_dir.clone();
    assert!(eventually(|| files_in(&dir).is_empty()).await);
}

#[tokio::test]
async fn test_upload_errors_are_reported() {
    let (app, upload_dir) = upload_app();
    let addr = app.spawn().await;
    let mut client = connect(upload_url(addr, "s1")).await;

    client
        .send(Message::binary(vec![1u8; 16]))
        .await
        .unwrap();
    let reply = recv_json(&mut client).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "NO_UPLOAD_IN_PROGRESS");

    send_json(
        &mut client,
        json!({"type": "start", "filename": "x.bin", "size": -1}),
    )
    .await;
    assert_eq!(recv_json(&mut client).await["code"], "INVALID_SIZE");

    send_json(
        &mut client,
        json!({"type": "start", "filename": "x.bin", "size": 10}),
    )
    .await;
    client.send(Message::binary(vec![1u8; 4])).await.unwrap();
    send_json(&mut client, json!({"type": "end"})).await;
    assert_eq!(recv_json(&mut client).await["code"], "INCOMPLETE");

    let dir = upload_dir.clone();
    assert!(eventually(|| files_in(&dir).is_empty()).await);
}

#[tokio::test]
async fn test_upload_unknown_session_is_404() {
    let app = TestApp::new();
    let addr = app.spawn().await;

    match connect_async(upload_url(addr, "missing")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("handshake should have been rejected"),
    }
}

#[tokio::test]
async fn test_upload_read_only_is_403() {
    let app = TestApp::with(|s| s.read_only = true, AuthState::disabled());
    app.create_session("s1", "/work/demo");
    let addr = app.spawn().await;

    match connect_async(upload_url(addr, "s1")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("handshake should have been rejected"),
    }
}

#[tokio::test]
async fn test_shutdown_closes_sockets() {
    let app = TestApp::new();
    let addr = app.spawn().await;
    let mut client = connect(events_url(addr)).await;
    recv_json(&mut client).await;

    app.state.shutdown.cancel();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = client.next().await {
            match frame {
                Ok(Message::Close(frame)) => return frame.map(|f| u16::from(f.code)),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    })
    .await
    .unwrap();
    assert_eq!(closed, Some(1001));

    let hub = app.state.hub.clone();
    assert!(eventually(|| hub.client_count() == 0).await);
}
