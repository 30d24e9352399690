//! Delivery router: validate → persist → deliver → schedule notification.
//!
//! Each `send_message` event runs through these steps once. A message reaches
//! the recipient only after it is committed; if validation or persistence
//! fails, the sender alone gets an `error` event and nothing else happens.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::chat::broadcast::broadcast_new_message;
use crate::chat::payload::{NewMessage, PayloadError};
use crate::notify::{NotificationDispatcher, NotificationTask};
use crate::store::{Deadline, MessageStore, PersistedMessage, StoreError};
use crate::ws::protocol::{send_error, NewMessageEvent, ERR_DATABASE, ERR_INVALID_PAYLOAD};
use crate::ws::{ConnectionRegistry, ConnectionSender};

/// Slack on top of the store's own deadline for blocking-pool scheduling.
const PERSIST_GRACE: Duration = Duration::from_millis(250);

/// What happened to one send-message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Persisted and handed to `live_connections` recipient connections
    Delivered {
        message_id: String,
        live_connections: usize,
    },
    /// Payload failed validation; nothing was written
    Rejected(PayloadError),
    /// Store write failed or timed out; nothing was delivered
    PersistFailed(StoreError),
}

#[derive(Clone)]
pub struct DeliveryRouter {
    store: Arc<dyn MessageStore>,
    connections: ConnectionRegistry,
    notifier: NotificationDispatcher,
    persist_timeout: Duration,
}

impl DeliveryRouter {
    pub fn new(
        store: Arc<dyn MessageStore>,
        connections: ConnectionRegistry,
        notifier: NotificationDispatcher,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            store,
            connections,
            notifier,
            persist_timeout,
        }
    }

    /// Run one `send_message` payload through the pipeline.
    /// `sender` is the originating connection; it only ever receives `error` events.
    pub async fn handle_send(&self, sender: &ConnectionSender, data: &Value) -> DeliveryOutcome {
        let message = match NewMessage::from_payload(data) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected send_message payload");
                send_error(sender, ERR_INVALID_PAYLOAD);
                return DeliveryOutcome::Rejected(e);
            }
        };

        let recipient_id = message.receiver_id.clone();
        let event = NewMessageEvent {
            consultation_id: message.consultation_id.clone(),
            sender_id: message.sender_id.clone(),
            message: message.content.clone(),
        };

        let persisted = match self.persist(message).await {
            Ok(persisted) => persisted,
            Err(StoreError::InvalidMessage(field)) => {
                tracing::warn!(field, "Store rejected message");
                send_error(sender, ERR_INVALID_PAYLOAD);
                return DeliveryOutcome::Rejected(PayloadError::MissingField(field));
            }
            Err(e) => {
                tracing::error!(
                    consultation_id = %event.consultation_id,
                    sender_id = %event.sender_id,
                    error = %e,
                    "Failed to persist message"
                );
                send_error(sender, ERR_DATABASE);
                return DeliveryOutcome::PersistFailed(e);
            }
        };

        let live_connections = broadcast_new_message(&self.connections, &recipient_id, event);
        tracing::info!(
            message_id = %persisted.id,
            consultation_id = %persisted.consultation_id,
            server_sequence = persisted.server_sequence,
            recipient_id = %recipient_id,
            live_connections,
            "Message delivered"
        );

        if let Err(e) = self
            .notifier
            .dispatch(NotificationTask::new_message(&recipient_id))
        {
            tracing::warn!(
                recipient_id = %recipient_id,
                error = %e,
                "Notification not scheduled"
            );
        }

        DeliveryOutcome::Delivered {
            message_id: persisted.id,
            live_connections,
        }
    }

    /// Append on the blocking pool, bounded by the persist timeout.
    ///
    /// The store and this wait share one [`Deadline`]. If the wait runs out
    /// while the store is already committing, the store's own result wins.
    async fn persist(&self, message: NewMessage) -> Result<PersistedMessage, StoreError> {
        let deadline = Deadline::after(self.persist_timeout);
        let store = self.store.clone();
        let store_deadline = deadline.clone();
        let mut task = tokio::task::spawn_blocking(move || store.append(&message, &store_deadline));

        let joined = match timeout(self.persist_timeout + PERSIST_GRACE, &mut task).await {
            Ok(joined) => joined,
            Err(_) if deadline.abandon() => return Err(StoreError::Timeout),
            Err(_) => task.await,
        };
        joined.map_err(|e| StoreError::Persistence(format!("store task failed: {}", e)))?
    }
}
