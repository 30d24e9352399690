//! Room broadcast helpers for chat events.

use crate::ws::protocol::{NewMessageEvent, ServerEvent};
use crate::ws::ConnectionRegistry;

/// Send a `new_message` event to every connection in the recipient's room.
/// Returns how many connections it was handed to; 0 means the recipient is offline.
pub fn broadcast_new_message(
    registry: &ConnectionRegistry,
    recipient_id: &str,
    event: NewMessageEvent,
) -> usize {
    match ServerEvent::NewMessage(event).to_ws_message() {
        Some(msg) => registry.broadcast(recipient_id, msg),
        None => 0,
    }
}
