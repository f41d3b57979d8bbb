use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use grid_backend::{app, AppState};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(AppState::default())).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, player_id: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws?playerId={player_id}"))
        .await
        .unwrap();
    client
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Reads messages until one of type `kind` arrives.
async fn expect_type(client: &mut Client, kind: &str) -> Value {
    for _ in 0..8 {
        let message = next_json(client).await;
        if message["type"] == kind {
            return message;
        }
    }
    panic!("never received {kind}");
}

/// Reads until a `player_count` with the given value arrives; earlier counts
/// from joins that raced the connection are skipped.
async fn expect_count(client: &mut Client, online_count: u64) {
    for _ in 0..8 {
        let message = expect_type(client, "player_count").await;
        if message["onlineCount"] == online_count {
            return;
        }
    }
    panic!("online count never reached {online_count}");
}

async fn send(client: &mut Client, message: Value) {
    client
        .send(Message::Text(message.to_string().into()))
        .await
        .unwrap();
}

async fn assert_silent(client: &mut Client) {
    assert!(
        timeout(Duration::from_millis(200), client.next()).await.is_err(),
        "expected no message"
    );
}

#[tokio::test]
async fn claim_flow_over_websocket() {
    let addr = spawn_server().await;

    let mut alice = connect(addr, "A").await;
    let init = expect_type(&mut alice, "init").await;
    assert_eq!(init["playerId"], "A");
    assert_eq!(init["grid"].as_array().unwrap().len(), 100);
    assert_eq!(init["onlineCount"], 1);
    assert_eq!(init["submitted"], false);

    let mut bob = connect(addr, "B").await;
    expect_type(&mut bob, "init").await;
    expect_count(&mut alice, 2).await;

    send(
        &mut alice,
        json!({ "type": "place_char", "row": 3, "col": 4, "char": "X" }),
    )
    .await;
    let update = expect_type(&mut bob, "cell_update").await;
    assert_eq!(update, json!({ "type": "cell_update", "row": 3, "col": 4, "char": "X" }));
    expect_type(&mut alice, "submission_locked").await;

    send(
        &mut bob,
        json!({ "type": "place_char", "row": 3, "col": 4, "char": "Y" }),
    )
    .await;
    let error = expect_type(&mut bob, "error_msg").await;
    assert_eq!(error["message"], "Cell already taken!");
}

#[tokio::test]
async fn malformed_frames_get_no_reply() {
    let addr = spawn_server().await;
    let mut client = connect(addr, "A").await;
    expect_type(&mut client, "init").await;
    expect_count(&mut client, 1).await;

    send(&mut client, json!({ "type": "place_char", "row": 1, "col": 1, "char": "" })).await;
    send(&mut client, json!({ "type": "place_char", "char": "X" })).await;
    client.send(Message::Text("not json".into())).await.unwrap();
    assert_silent(&mut client).await;
}

#[tokio::test]
async fn closing_last_tab_updates_count_for_others() {
    let addr = spawn_server().await;
    let mut observer = connect(addr, "B").await;
    expect_type(&mut observer, "init").await;

    let mut tab1 = connect(addr, "A").await;
    expect_type(&mut tab1, "init").await;
    expect_count(&mut observer, 2).await;

    let mut tab2 = connect(addr, "A").await;
    assert_eq!(expect_type(&mut tab2, "init").await["onlineCount"], 2);

    tab1.close(None).await.unwrap();
    assert_silent(&mut observer).await;

    tab2.close(None).await.unwrap();
    expect_count(&mut observer, 1).await;
}

#[tokio::test]
async fn handshake_without_player_id_is_rejected() {
    let addr = spawn_server().await;
    assert!(connect_async(format!("ws://{addr}/ws")).await.is_err());
    assert!(connect_async(format!("ws://{addr}/ws?playerId=")).await.is_err());
}
