//! WebSocket upgrade handler and per-connection read loop.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::error::FeedError;
use crate::AppState;

use super::channel::DeviceChannel;
use super::message::ClientFrame;
use super::registry::RegistryStats;

/// Application close code for a failed token resolution.
const CLOSE_AUTH_FAILED: u16 = 4001;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/feed/ws", get(ws_upgrade))
        .route("/api/v1/feed/stats", get(stats))
}

async fn stats(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.feed.get_stats())
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: String,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, params.token))
}

async fn handle_connection(socket: WebSocket, state: AppState, token: String) {
    // Resolve the token before anything touches the registry.
    let device_id = match state.auth.resolve_device(&token).await {
        Ok(device_id) => device_id,
        Err(err) => {
            tracing::debug!(%err, "connect token rejected");
            let (mut ws_tx, _) = socket.split();
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, "Invalid token").await;
            return;
        }
    };

    let (ws_tx, mut ws_rx) = socket.split();
    let channel = Arc::new(WsChannel::new(ws_tx));
    let session_id = state.feed.register(&device_id, channel, None).await;

    // Inbound frames are processed in arrival order for this session.
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let frame: ClientFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::debug!(%session_id, %err, "malformed client frame ignored");
                        continue;
                    }
                };
                state.feed.delivery().handle_client_frame(&session_id, frame).await;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => break,
        }
    }

    state.feed.registry().unregister(&session_id).await;
    tracing::info!(%session_id, %device_id, "device connection ended");
}

async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}

/// The send half of a live WebSocket, owned exclusively by its session.
pub struct WsChannel {
    sink: tokio::sync::Mutex<SplitSink<WebSocket, Message>>,
}

impl WsChannel {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: tokio::sync::Mutex::new(sink),
        }
    }
}

#[async_trait]
impl DeviceChannel for WsChannel {
    async fn send_text(&self, text: String) -> Result<(), FeedError> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|err| FeedError::channel(err.to_string()))
    }

    async fn close(&self) -> Result<(), FeedError> {
        self.sink
            .lock()
            .await
            .send(Message::Close(Some(CloseFrame {
                code: 1000,
                reason: "session terminated".into(),
            })))
            .await
            .map_err(|err| FeedError::channel(err.to_string()))
    }
}
