use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use shieldfeed::auth::{DeviceAuthenticator, TicketAuthenticator};
use shieldfeed::config::Config;
use shieldfeed::feed::alert::ThreatAlert;
use shieldfeed::feed::Feed;
use shieldfeed::kv::MemoryStore;
use shieldfeed::AppState;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ===========================================================================
// Helpers
// ===========================================================================

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background; returns its address, the shared state, and the ticket minter.
async fn start_server() -> (SocketAddr, AppState, Arc<TicketAuthenticator>) {
    let kv = Arc::new(MemoryStore::new());
    let feed = Arc::new(Feed::new(kv.clone()));
    let auth = Arc::new(TicketAuthenticator::new(kv));

    let state = AppState {
        feed,
        auth: auth.clone() as Arc<dyn DeviceAuthenticator>,
        config: Arc::new(Config {
            port: 0,
            redis_url: None,
        }),
    };

    let app = shieldfeed::feed::server::router().with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state, auth)
}

/// Connect a device: mint a ticket and open the WebSocket with it.
async fn connect_device(
    addr: SocketAddr,
    auth: &TicketAuthenticator,
    device_id: &str,
) -> WsClient {
    let ticket = auth.mint_ticket(device_id).await.expect("mint ticket");
    let url = format!("ws://{addr}/feed/ws?token={ticket}");
    let (ws, _) = connect_async(url).await.expect("ws connect");
    ws
}

/// Read frames until the next text envelope, with a timeout.
async fn next_envelope(ws: &mut WsClient) -> serde_json::Value {
    time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = ws.next().await {
            match msg.expect("ws read") {
                Message::Text(text) => {
                    return serde_json::from_str(&text).expect("valid envelope json")
                }
                Message::Close(frame) => panic!("unexpected close: {frame:?}"),
                _ => continue,
            }
        }
        panic!("connection ended before envelope");
    })
    .await
    .expect("timed out waiting for envelope")
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn connect_receives_welcome_then_pong() {
    let (addr, _state, auth) = start_server().await;
    let mut ws = connect_device(addr, &auth, "device-ws-1").await;

    let welcome = next_envelope(&mut ws).await;
    assert_eq!(welcome["message_type"], "connection_established");
    assert_eq!(welcome["device_id"], "device-ws-1");
    assert!(welcome["data"]["session_id"]
        .as_str()
        .unwrap()
        .starts_with("ses_"));

    ws.send(Message::Text(r#"{"type": "ping"}"#.into()))
        .await
        .expect("send ping");
    let pong = next_envelope(&mut ws).await;
    assert_eq!(pong["message_type"], "pong");
}

#[tokio::test]
async fn invalid_token_is_closed_with_auth_code() {
    let (addr, state, _auth) = start_server().await;

    let url = format!("ws://{addr}/feed/ws?token=tkt_bogus");
    let (mut ws, _) = connect_async(url).await.expect("handshake still succeeds");

    let msg = time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out")
        .expect("frame")
        .expect("ws read");
    match msg {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4001),
        other => panic!("expected close frame, got {other:?}"),
    }

    // The registry was never touched.
    assert_eq!(state.feed.get_stats().total_connections, 0);
}

#[tokio::test]
async fn submitted_alert_arrives_over_websocket() {
    let (addr, state, auth) = start_server().await;
    let mut ws = connect_device(addr, &auth, "device-ws-2").await;
    next_envelope(&mut ws).await; // welcome

    let alert = ThreatAlert::phishing(Default::default(), "live campaign", None);
    let delivered = state.feed.submit_alert(&alert, None).await;
    assert_eq!(delivered, 1);

    let envelope = next_envelope(&mut ws).await;
    assert_eq!(envelope["message_type"], "threat_alert");
    assert_eq!(envelope["data"]["priority"], "high");
    assert_eq!(envelope["data"]["alert"]["description"], "live campaign");
}

#[tokio::test]
async fn subscribe_frame_is_acknowledged() {
    let (addr, _state, auth) = start_server().await;
    let mut ws = connect_device(addr, &auth, "device-ws-3").await;
    next_envelope(&mut ws).await; // welcome

    ws.send(Message::Text(
        r#"{"type": "subscribe", "threat_types": ["spyware"], "risk_threshold": 40}"#.into(),
    ))
    .await
    .expect("send subscribe");

    let ack = next_envelope(&mut ws).await;
    assert_eq!(ack["message_type"], "subscription_updated");
    assert_eq!(ack["data"]["risk_threshold"], 40);
    let subs = ack["data"]["subscriptions"].as_array().unwrap();
    assert!(subs.iter().any(|s| s == "spyware"));
}

#[tokio::test]
async fn reconnect_terminates_previous_connection() {
    let (addr, state, auth) = start_server().await;

    let mut first = connect_device(addr, &auth, "device-ws-4").await;
    next_envelope(&mut first).await; // welcome

    let mut second = connect_device(addr, &auth, "device-ws-4").await;
    let welcome = next_envelope(&mut second).await;
    assert_eq!(welcome["message_type"], "connection_established");

    // The first socket is closed by the server.
    let closed = time::timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None => return true,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return true,
            }
        }
    })
    .await
    .expect("timed out waiting for close");
    assert!(closed);

    assert_eq!(state.feed.get_stats().total_connections, 1);
}

#[tokio::test]
async fn stats_route_reports_live_sessions() {
    let kv = Arc::new(MemoryStore::new());
    let feed = Arc::new(Feed::new(kv.clone()));
    let auth = Arc::new(TicketAuthenticator::new(kv));
    let state = AppState {
        feed: feed.clone(),
        auth,
        config: Arc::new(Config {
            port: 0,
            redis_url: None,
        }),
    };

    let server =
        axum_test::TestServer::new(shieldfeed::feed::server::router().with_state(state)).unwrap();

    let body: serde_json::Value = server.get("/api/v1/feed/stats").await.json();
    assert_eq!(body["total_connections"], 0);

    feed.register(
        "device-stats",
        Arc::new(shieldfeed::feed::channel::InMemoryChannel::new()),
        None,
    )
    .await;

    let body: serde_json::Value = server.get("/api/v1/feed/stats").await.json();
    assert_eq!(body["total_connections"], 1);
    assert_eq!(body["subscription_counts"]["phishing"], 1);
    assert_eq!(body["stale_connections"], 0);
}
