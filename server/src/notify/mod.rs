//! Best-effort push notifications, decoupled from real-time delivery.
//!
//! The delivery path only ever calls [`NotificationDispatcher::dispatch`], which
//! enqueues without waiting. A bounded worker pool drains the queue and talks to
//! the configured [`NotificationProvider`]. Failures end here: they are logged
//! and never reach the sender or the recipient.

pub mod dispatcher;
pub mod provider;

use serde::Serialize;
use std::fmt;

pub use dispatcher::{DispatchSettings, DispatcherHandle, NotificationDispatcher};
pub use provider::{provider_for, LogProvider, NotificationProvider, WebhookProvider};

/// Title of the push sent for a new consultation message.
pub const NEW_MESSAGE_TITLE: &str = "New Message";
/// Body of the push sent for a new consultation message.
pub const NEW_MESSAGE_BODY: &str = "You received a new consultation message";

/// A single push send. Lives only in memory; lost if the process exits first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationTask {
    pub recipient_id: String,
    pub title: String,
    pub body: String,
}

impl NotificationTask {
    pub fn new(recipient_id: &str, title: &str, body: &str) -> Self {
        Self {
            recipient_id: recipient_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        }
    }

    /// The notification scheduled after a message is delivered to `recipient_id`.
    pub fn new_message(recipient_id: &str) -> Self {
        Self::new(recipient_id, NEW_MESSAGE_TITLE, NEW_MESSAGE_BODY)
    }
}

/// Failure to hand a notification to the push provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The queue is at capacity; the task was dropped
    QueueFull,
    /// The dispatcher has shut down
    Closed,
    /// The provider did not answer within the send timeout
    Timeout,
    /// The provider rejected the request with an HTTP status
    Status(u16),
    /// Transport or provider-side failure
    Provider(String),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "Notification queue is full"),
            Self::Closed => write!(f, "Notification dispatcher is shut down"),
            Self::Timeout => write!(f, "Push provider timed out"),
            Self::Status(code) => write!(f, "Push provider returned status {}", code),
            Self::Provider(e) => write!(f, "Push provider error: {}", e),
        }
    }
}

impl std::error::Error for NotifyError {}
