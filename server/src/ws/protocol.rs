//! JSON event framing for the consultation socket.
//!
//! Every frame is a text message `{"event": "<name>", "data": {...}}`.
//! Inbound events: `join`, `send_message`. Outbound events: `new_message`, `error`.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::payload;
use crate::state::AppState;
use crate::ws::{ConnectionId, ConnectionSender};

pub const EVENT_JOIN: &str = "join";
pub const EVENT_SEND_MESSAGE: &str = "send_message";

/// Error text sent when a send-message payload fails validation.
pub const ERR_INVALID_PAYLOAD: &str = "Invalid message payload";
/// Error text sent when the message could not be persisted.
pub const ERR_DATABASE: &str = "Database error";

/// An inbound frame before its payload is validated.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Delivered to every connection in the recipient's room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessageEvent {
    pub consultation_id: String,
    pub sender_id: String,
    pub message: String,
}

/// Delivered to the originating connection only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// Outbound events, serialized as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(NewMessageEvent),
    Error(ErrorEvent),
}

impl ServerEvent {
    pub fn error(message: &str) -> Self {
        Self::Error(ErrorEvent {
            message: message.to_string(),
        })
    }

    /// Encode as a WebSocket text frame.
    pub fn to_ws_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server event");
                None
            }
        }
    }
}

/// Encode and send an event to a single connection.
pub fn send_event(tx: &ConnectionSender, event: &ServerEvent) {
    if let Some(msg) = event.to_ws_message() {
        let _ = tx.send(msg);
    }
}

/// Send an `error` event to a single connection.
pub fn send_error(tx: &ConnectionSender, message: &str) {
    send_event(tx, &ServerEvent::error(message));
}

/// Handle one inbound text frame from a connection.
pub async fn handle_text_message(
    text: &str,
    connection_id: ConnectionId,
    tx: &ConnectionSender,
    state: &AppState,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(
                connection_id = %connection_id,
                error = %e,
                "Ignoring malformed frame"
            );
            return;
        }
    };

    match frame.event.as_str() {
        EVENT_JOIN => handle_join(&frame.data, connection_id, state),
        EVENT_SEND_MESSAGE => {
            state.router.handle_send(tx, &frame.data).await;
        }
        other => {
            tracing::debug!(
                connection_id = %connection_id,
                event = %other,
                "Ignoring unknown event"
            );
        }
    }
}

/// `join`: put the connection in the room for `user_id`.
/// A payload without a usable `user_id` is ignored without a reply.
fn handle_join(data: &Value, connection_id: ConnectionId, state: &AppState) {
    match payload::join_user_id(data) {
        Some(user_id) => {
            if state.connections.join(connection_id, &user_id) {
                tracing::info!(
                    connection_id = %connection_id,
                    user_id = %user_id,
                    "Connection joined room"
                );
            }
        }
        None => {
            tracing::debug!(
                connection_id = %connection_id,
                "Join without user_id ignored"
            );
        }
    }
}
