//! Realtime WebSocket hub
//!
//! One bidirectional JSON channel per client at `/ws`. A connection may be
//! subscribed to at most one call at a time; joining another call
//! implicitly leaves the previous one. All outbound traffic for a
//! connection funnels through a single mpsc writer task, which is also the
//! delivery target the session registry fans out to.

pub mod messages;
pub mod processor;

pub use processor::ConnectionState;

use axum::{
    extract::{
        Extension, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{select, time::Duration};
use tracing::{debug, info, warn};

use crate::core::session::OutboundFrame;
use crate::middleware::ClientIp;
use crate::state::AppState;

use messages::OutgoingMessage;

/// Channel buffer per connection; audio chunk bursts need headroom
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (4 MB)
const MAX_WS_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Maximum WebSocket message size (4 MB)
const MAX_WS_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// How often the connection checks for staleness
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, client_ip.map(|Extension(ip)| ip)))
}

/// Drive one WebSocket connection to completion.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, client_ip: Option<ClientIp>) {
    let conn_id = state.next_connection_id();
    info!(conn_id, "WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<OutboundFrame>(CHANNEL_BUFFER_SIZE);

    // Writer task: everything this connection receives - direct replies and
    // session broadcasts alike - leaves through here, preserving order.
    let sender_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let result = match frame {
                OutboundFrame::Json(json) => sender.send(Message::Text(json.into())).await,
                OutboundFrame::Binary(data) => sender.send(Message::Binary(data)).await,
                OutboundFrame::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if let Err(e) = result {
                debug!("failed to write WebSocket frame: {e}");
                break;
            }
        }
    });

    let mut conn = ConnectionState::new(conn_id, frame_tx.clone());
    let idle_timeout = state.config.ws_idle_timeout();
    let mut last_activity = std::time::Instant::now();

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = std::time::Instant::now();
                match msg_result {
                    Some(Ok(msg)) => {
                        let continue_processing =
                            process_ws_message(msg, &mut conn, &state).await;
                        if !continue_processing {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(conn_id, "WebSocket error: {e}");
                        break;
                    }
                    None => {
                        info!(conn_id, "WebSocket closed by client");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > idle_timeout {
                    warn!(
                        conn_id,
                        idle_secs = last_activity.elapsed().as_secs(),
                        "closing stale WebSocket connection"
                    );
                    let _ = frame_tx.send(OutboundFrame::Close).await;
                    break;
                }
            }
        }
    }

    // Cleanup: drop the subscription (the session itself survives transient
    // disconnects), stop the writer, release the connection slot.
    if let Some(call_id) = conn.subscribed.take() {
        state.sessions.detach(&call_id, conn_id);
    }
    sender_task.abort();
    if let Some(ClientIp(ip)) = client_ip {
        state.release_connection(ip);
    }
    info!(conn_id, "WebSocket connection terminated");
}

/// Decode one wire message and dispatch it.
async fn process_ws_message(msg: Message, conn: &mut ConnectionState, state: &Arc<AppState>) -> bool {
    match msg {
        Message::Text(text) => {
            // Two-step parse so unknown `type` tags degrade to a warning
            // instead of a connection error
            let value: serde_json::Value = match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(e) => {
                    warn!(conn_id = conn.conn_id, "malformed WebSocket JSON: {e}");
                    conn.send(OutgoingMessage::Error {
                        message: format!("invalid JSON: {e}"),
                    })
                    .await;
                    return true;
                }
            };
            let message_type = value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_string();

            let incoming: messages::IncomingMessage = match serde_json::from_value(value) {
                Ok(incoming) => incoming,
                Err(e) => {
                    warn!(
                        conn_id = conn.conn_id,
                        message_type = %message_type,
                        "unrecognized WebSocket message: {e}"
                    );
                    conn.send(OutgoingMessage::Error {
                        message: format!("unrecognized message type: {message_type}"),
                    })
                    .await;
                    return true;
                }
            };

            if let Err(reason) = incoming.validate() {
                conn.send(OutgoingMessage::Error { message: reason }).await;
                return true;
            }

            processor::handle_incoming(incoming, conn, state).await
        }
        Message::Binary(data) => {
            // The protocol carries audio as base64 inside JSON; raw binary
            // frames are tolerated but ignored
            debug!(conn_id = conn.conn_id, bytes = data.len(), "ignoring binary frame");
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!(conn_id = conn.conn_id, "WebSocket close received");
            false
        }
    }
}
