//! WebSocket live channel.
//!
//! Each socket owns one hub connection. Clients join and leave
//! conversations and may submit messages; every message stored in a joined
//! conversation is pushed as a `newMessage` frame.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use chat_sync::{ChatService, ConnectionId};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::config::AppState;
use crate::error::Error;
use crate::views::{ClientFrame, ServerFrame};

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    // Check connection limit before upgrading
    let max = state.config.max_ws_connections;
    if state.ws_connections.load(Ordering::Relaxed) >= max {
        warn!("Rejecting WebSocket: {} connections open", max);
        return Error::Unavailable(format!("too many WebSocket connections (max {})", max))
            .into_response();
    }

    ws.on_upgrade(|socket| ws_connection(socket, state))
        .into_response()
}

/// Releases the hub connection and the connection slot when the socket ends.
struct ConnectionGuard {
    chat: Arc<ChatService>,
    connection_id: ConnectionId,
    count: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.chat.disconnect(self.connection_id);
        self.count.fetch_sub(1, Ordering::Relaxed);
        info!("WebSocket {} closed", self.connection_id);
    }
}

async fn ws_connection(socket: WebSocket, state: AppState) {
    let (connection_id, mut rx) = state.chat.connect();
    state.ws_connections.fetch_add(1, Ordering::Relaxed);
    let _guard = ConnectionGuard {
        chat: state.chat.clone(),
        connection_id,
        count: state.ws_connections.clone(),
    };
    info!("WebSocket {} connected", connection_id);

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            // Forward live messages to the client
            live = rx.recv() => {
                let Some(message) = live else { break };
                if send_frame(&mut sink, &ServerFrame::NewMessage { message }).await.is_err() {
                    break; // client disconnected
                }
            }
            incoming = stream.next() => {
                match inbound(incoming) {
                    Inbound::Frame(text) => {
                        if let Some(reply) = handle_frame(&state, connection_id, &text).await {
                            if send_frame(&mut sink, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Inbound::Skip => {}
                    Inbound::Closed(reason) => {
                        debug!("WebSocket {} ended: {}", connection_id, reason);
                        break;
                    }
                }
            }
        }
    }
}

/// What the loop does with one item from the socket.
#[derive(Debug, PartialEq)]
enum Inbound {
    Frame(String),
    /// Control and binary frames. axum answers pings itself.
    Skip,
    Closed(String),
}

fn inbound(incoming: Option<Result<WsMessage, axum::Error>>) -> Inbound {
    match incoming {
        Some(Ok(WsMessage::Text(text))) => Inbound::Frame(text.as_str().to_string()),
        Some(Ok(WsMessage::Close(_))) => Inbound::Closed("close frame".to_string()),
        Some(Ok(_)) => Inbound::Skip,
        Some(Err(e)) => Inbound::Closed(format!("receive error: {}", e)),
        None => Inbound::Closed("stream ended".to_string()),
    }
}

/// Apply one client frame. Returns an error frame for the client, if any.
async fn handle_frame(state: &AppState, connection_id: ConnectionId, raw: &str) -> Option<ServerFrame> {
    let frame = match serde_json::from_str::<ClientFrame>(raw) {
        Ok(frame) => frame,
        Err(e) => {
            return Some(ServerFrame::Error {
                message: format!("invalid frame: {}", e),
            })
        }
    };

    let result = match frame {
        ClientFrame::JoinChat { chat_id } => {
            debug!("WebSocket {} joins chat {}", connection_id, chat_id);
            state.chat.join_live(connection_id, chat_id)
        }
        ClientFrame::LeaveChat { chat_id } => {
            debug!("WebSocket {} leaves chat {}", connection_id, chat_id);
            state.chat.leave_live(connection_id, chat_id);
            Ok(())
        }
        ClientFrame::SendMessage {
            chat_id,
            content,
            sender,
        } => state
            .chat
            .submit_message(chat_id, &content, sender)
            .await
            .map(|_| ()),
    };

    result.err().map(|e| ServerFrame::Error {
        message: e.to_string(),
    })
}

async fn send_frame<S>(sink: &mut S, frame: &ServerFrame) -> Result<(), axum::Error>
where
    S: futures::Sink<WsMessage, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(frame) {
        Ok(json) => sink.send(WsMessage::Text(json.into())).await,
        Err(e) => {
            warn!("Failed to encode frame: {}", e);
            Ok(())
        }
    }
}
