use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};

use scan_alerts::{
    channel::{ChannelBuilder, ChannelClient, ChannelEvent},
    config::ChannelConfig,
    models::RecordId,
};

const TOKEN: &str = "parent-token";

#[derive(Clone, Copy)]
enum Script {
    /// Ping, wait for the pong, then push one alert
    PingThenScan,
    /// Drop the first connection right after admitting it
    DropFirst,
    /// Send events that must be ignored before a valid alert
    Noise,
    /// Admit, then never ping
    Silent,
    /// Answer the upgrade request with 401
    RefuseUpgrade,
}

#[derive(Clone)]
struct MockServer {
    script: Script,
    connections: Arc<AtomicUsize>,
}

fn alert_json(record_id: &str) -> Value {
    json!({
        "childId": "c1",
        "parentId": "p1",
        "childName": "Asha",
        "log": {
            "_id": record_id,
            "latitude": 12.9,
            "longitude": 77.6,
            "timestamp": "2024-03-01T10:15:00.000Z",
            "message": "I am in Danger"
        }
    })
}

fn event(name: &str, payload: Value) -> Message {
    Message::Text(format!("42{}", json!([name, payload])))
}

async fn ws_handler(ws: WebSocketUpgrade, State(server): State<MockServer>) -> Response {
    if let Script::RefuseUpgrade = server.script {
        server.connections.fetch_add(1, Ordering::SeqCst);
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, server))
}

async fn handle_socket(mut socket: WebSocket, server: MockServer) {
    let index = server.connections.fetch_add(1, Ordering::SeqCst);
    let (interval, timeout) = match server.script {
        Script::Silent => (100, 100),
        _ => (25000, 20000),
    };
    let open = format!(
        r#"0{{"sid":"s{}","upgrades":[],"pingInterval":{},"pingTimeout":{},"maxPayload":1000000}}"#,
        index, interval, timeout
    );
    if socket.send(Message::Text(open)).await.is_err() {
        return;
    }

    let Some(Ok(Message::Text(connect))) = socket.recv().await else {
        return;
    };
    let auth: Value = connect
        .strip_prefix("40")
        .and_then(|data| serde_json::from_str(data).ok())
        .unwrap_or(Value::Null);
    if auth["token"] != TOKEN {
        let _ = socket
            .send(Message::Text(r#"44{"message":"Invalid token"}"#.to_string()))
            .await;
        return;
    }
    if socket
        .send(Message::Text(r#"40{"sid":"n1"}"#.to_string()))
        .await
        .is_err()
    {
        return;
    }

    match server.script {
        Script::PingThenScan => {
            let _ = socket.send(Message::Text("2".to_string())).await;
            match socket.recv().await {
                Some(Ok(Message::Text(pong))) if pong == "3" => {}
                _ => return,
            }
            let _ = socket.send(event("scan", alert_json("r1"))).await;
        }
        Script::DropFirst => {
            if index == 0 {
                return;
            }
            let _ = socket.send(event("scan", alert_json("r2"))).await;
        }
        Script::Noise => {
            let _ = socket.send(event("hello", json!({}))).await;
            let _ = socket.send(event("scan", json!({"bad": true}))).await;
            let _ = socket
                .send(Message::Text(format!(
                    "42/admin,{}",
                    json!(["scan", alert_json("r1")])
                )))
                .await;
            let _ = socket.send(Message::Text("42{broken".to_string())).await;
            let _ = socket.send(event("scan", alert_json("r2"))).await;
        }
        Script::Silent | Script::RefuseUpgrade => {}
    }

    while let Some(Ok(_)) = socket.recv().await {}
}

async fn spawn_server(script: Script) -> (SocketAddr, Arc<AtomicUsize>) {
    let connections = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/socket.io/", get(ws_handler))
        .with_state(MockServer {
            script,
            connections: Arc::clone(&connections),
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, connections)
}

fn connect(addr: SocketAddr, token: &str) -> ChannelClient {
    let config = ChannelConfig {
        url: format!("http://{}", addr),
        path: "/socket.io".to_string(),
        reconnect_delay_min: Duration::from_millis(50),
        reconnect_delay_max: Duration::from_millis(200),
    };
    ChannelBuilder::new(&config, token).unwrap().connect()
}

async fn next_event(client: &mut ChannelClient) -> Option<ChannelEvent> {
    tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("timeout waiting for channel event")
}

fn scan_id(event: Option<ChannelEvent>) -> RecordId {
    match event {
        Some(ChannelEvent::Scan(alert)) => alert.log.id,
        other => panic!("expected scan event, got {:?}", other),
    }
}

#[tokio::test]
async fn delivers_scan_after_handshake() {
    let (addr, _) = spawn_server(Script::PingThenScan).await;
    let mut client = connect(addr, TOKEN);

    assert_eq!(next_event(&mut client).await, Some(ChannelEvent::Connected));

    match next_event(&mut client).await {
        Some(ChannelEvent::Scan(alert)) => {
            assert_eq!(alert.child_name, "Asha");
            assert_eq!(alert.log.message.as_deref(), Some("I am in Danger"));
        }
        other => panic!("expected scan event, got {:?}", other),
    }
}

#[tokio::test]
async fn rejected_token_is_not_retried() {
    let (addr, connections) = spawn_server(Script::PingThenScan).await;
    let mut client = connect(addr, "stale-token");

    assert_eq!(next_event(&mut client).await, None);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(connections.load(Ordering::SeqCst), 1);
    assert!(!client.is_running());
}

#[tokio::test]
async fn refused_upgrade_is_not_retried() {
    let (addr, connections) = spawn_server(Script::RefuseUpgrade).await;
    let mut client = connect(addr, TOKEN);

    assert_eq!(next_event(&mut client).await, None);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(connections.load(Ordering::SeqCst), 1);
    assert!(!client.is_running());
}

#[tokio::test]
async fn reconnects_after_server_drop() {
    let (addr, connections) = spawn_server(Script::DropFirst).await;
    let mut client = connect(addr, TOKEN);

    assert_eq!(next_event(&mut client).await, Some(ChannelEvent::Connected));
    assert_eq!(
        next_event(&mut client).await,
        Some(ChannelEvent::Disconnected)
    );
    assert_eq!(next_event(&mut client).await, Some(ChannelEvent::Connected));
    assert_eq!(scan_id(next_event(&mut client).await), RecordId::from("r2"));
    assert_eq!(connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn ignores_foreign_and_malformed_packets() {
    let (addr, _) = spawn_server(Script::Noise).await;
    let mut client = connect(addr, TOKEN);

    assert_eq!(next_event(&mut client).await, Some(ChannelEvent::Connected));
    assert_eq!(scan_id(next_event(&mut client).await), RecordId::from("r2"));
}

#[tokio::test]
async fn missed_heartbeat_forces_reconnect() {
    let (addr, connections) = spawn_server(Script::Silent).await;
    let mut client = connect(addr, TOKEN);

    assert_eq!(next_event(&mut client).await, Some(ChannelEvent::Connected));
    assert_eq!(
        next_event(&mut client).await,
        Some(ChannelEvent::Disconnected)
    );
    assert_eq!(next_event(&mut client).await, Some(ChannelEvent::Connected));
    assert!(connections.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn dropping_client_closes_connection() {
    let (addr, connections) = spawn_server(Script::PingThenScan).await;
    let mut client = connect(addr, TOKEN);

    assert_eq!(next_event(&mut client).await, Some(ChannelEvent::Connected));
    client.close();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}
