//! End-to-end tests against a listening server using a real WebSocket client.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use relay_server::{RelayServer, ServerConfig};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn test_config() -> ServerConfig {
    ServerConfig {
        heartbeat_interval: None,
        ..ServerConfig::default()
    }
}

async fn boot(config: ServerConfig) -> (SocketAddr, RelayServer) {
    let server = RelayServer::new(config);
    let (addr, _handle) = server.listen().await.unwrap();
    (addr, server)
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

/// Registration happens on the server task after the handshake completes.
async fn wait_for_clients(server: &RelayServer, n: usize) {
    timeout(TIMEOUT, async {
        while server.hub().len() != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("hub never reached {n} clients (has {})", server.hub().len()));
}

/// Next data frame, skipping control frames.
async fn next_data(ws: &mut WsStream) -> Message {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if msg.is_text() || msg.is_binary() || msg.is_close() {
            return msg;
        }
    }
}

async fn post_broadcast(addr: SocketAddr, body: impl Into<reqwest::Body>) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}/api/broadcast"))
        .body(body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn http_broadcast_reaches_every_client() {
    let (addr, server) = boot(test_config()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_clients(&server, 2).await;

    let resp = post_broadcast(addr, "hello").await;
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["recipients"], 2);
    assert_eq!(body["evicted"], 0);

    assert_eq!(next_data(&mut a).await, Message::text("hello"));
    assert_eq!(next_data(&mut b).await, Message::text("hello"));
}

#[tokio::test]
async fn unregistered_client_misses_later_broadcasts() {
    let (addr, server) = boot(test_config()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    wait_for_clients(&server, 3).await;

    server.hub().broadcast_message("hello");
    for ws in [&mut a, &mut b, &mut c] {
        assert_eq!(next_data(ws).await, Message::text("hello"));
    }

    b.close(None).await.unwrap();
    wait_for_clients(&server, 2).await;

    server.hub().broadcast_message("again");
    assert_eq!(next_data(&mut a).await, Message::text("again"));
    assert_eq!(next_data(&mut c).await, Message::text("again"));
}

#[tokio::test]
async fn broadcasts_arrive_in_order() {
    let (addr, server) = boot(test_config()).await;
    let mut ws = connect(addr).await;
    wait_for_clients(&server, 1).await;

    for i in 0..20 {
        server.hub().broadcast_message(format!("m{i}"));
    }
    for i in 0..20 {
        assert_eq!(next_data(&mut ws).await, Message::text(format!("m{i}")));
    }
}

#[tokio::test]
async fn non_utf8_payload_is_sent_as_binary() {
    let (addr, server) = boot(test_config()).await;
    let mut ws = connect(addr).await;
    wait_for_clients(&server, 1).await;

    let resp = post_broadcast(addr, vec![0xff_u8, 0xfe, 0x00]).await;
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
    assert_eq!(
        next_data(&mut ws).await,
        Message::binary(vec![0xff_u8, 0xfe, 0x00])
    );
}

#[tokio::test]
async fn empty_broadcast_is_bad_request() {
    let (addr, _server) = boot(test_config()).await;
    let resp = post_broadcast(addr, Vec::<u8>::new()).await;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upgrade_refused_at_connection_limit() {
    let (addr, server) = boot(ServerConfig {
        max_connections: 1,
        ..test_config()
    })
    .await;
    let _first = connect(addr).await;
    wait_for_clients(&server, 1).await;

    let err = connect_async(format!("ws://{addr}/ws")).await.unwrap_err();
    match err {
        WsError::Http(resp) => assert_eq!(resp.status().as_u16(), 503),
        other => panic!("expected HTTP 503, got {other:?}"),
    }
    assert_eq!(server.hub().len(), 1);
}

#[tokio::test]
async fn inbound_messages_relayed_when_enabled() {
    let (addr, server) = boot(ServerConfig {
        relay_inbound: true,
        ..test_config()
    })
    .await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_clients(&server, 2).await;

    a.send(Message::text("from a")).await.unwrap();
    assert_eq!(next_data(&mut b).await, Message::text("from a"));
    assert_eq!(next_data(&mut a).await, Message::text("from a"));
}

#[tokio::test]
async fn dropped_client_is_unregistered() {
    let (addr, server) = boot(test_config()).await;
    let ws = connect(addr).await;
    wait_for_clients(&server, 1).await;
    drop(ws);
    wait_for_clients(&server, 0).await;
}

#[tokio::test]
async fn server_sends_pings_when_heartbeat_enabled() {
    let (addr, server) = boot(ServerConfig {
        heartbeat_interval: Some(Duration::from_millis(50)),
        heartbeat_timeout: Duration::from_secs(5),
        ..ServerConfig::default()
    })
    .await;
    let mut ws = connect(addr).await;
    wait_for_clients(&server, 1).await;

    let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    assert!(msg.is_ping(), "expected ping, got {msg:?}");
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let (addr, server) = boot(test_config()).await;
    let mut ws = connect(addr).await;
    wait_for_clients(&server, 1).await;

    server.shutdown().shutdown();
    assert!(next_data(&mut ws).await.is_close());
    wait_for_clients(&server, 0).await;
}

#[tokio::test]
async fn health_over_http() {
    let (addr, server) = boot(test_config()).await;
    let _ws = connect(addr).await;
    wait_for_clients(&server, 1).await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
}

#[tokio::test]
async fn slow_consumer_evicted_over_real_socket() {
    let (addr, server) = boot(ServerConfig {
        mailbox_capacity: 2,
        ..test_config()
    })
    .await;
    let mut slow = connect(addr).await;
    wait_for_clients(&server, 1).await;
    let slow_id = server.hub().client_ids().remove(0);
    let mut fast = connect(addr).await;
    wait_for_clients(&server, 2).await;

    // Large frames fill the kernel socket buffers of the client that never reads.
    let filler = "x".repeat(256 * 1024);
    let mut evicted_at = None;
    for i in 0..400 {
        let msg = format!("{i:06}{filler}");
        let report = server.hub().broadcast(relay_core::Payload::from(msg.clone()));
        assert!(!report.evicted.iter().any(|id| id != &slow_id));
        assert_eq!(next_data(&mut fast).await, Message::text(msg));
        if report.evicted.contains(&slow_id) {
            evicted_at = Some(i);
            break;
        }
    }
    assert!(evicted_at.is_some(), "slow client was never evicted");
    assert!(!server.hub().contains(&slow_id));
    assert_eq!(server.hub().len(), 1);

    // Session teardown drops the server side of the socket.
    let ended = timeout(Duration::from_secs(30), async {
        while let Some(Ok(msg)) = slow.next().await {
            if msg.is_close() {
                break;
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "slow client's connection never ended");

    server.hub().broadcast_message("after");
    assert_eq!(next_data(&mut fast).await, Message::text("after"));
}
