pub mod actor;
pub mod handler;
pub mod protocol;

use axum::extract::ws::Message;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sender half of a WebSocket connection's outbound channel.
/// Cloning it lets any part of the system push frames to that client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Identity of one live transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct ConnectionEntry {
    sender: ConnectionSender,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct RegistryInner {
    /// connection -> its outbound sender and the rooms it joined
    connections: DashMap<ConnectionId, ConnectionEntry>,
    /// room (user identity) -> member connections
    rooms: DashMap<String, HashMap<ConnectionId, ConnectionSender>>,
}

/// Connection registry: live connections grouped into rooms keyed by user identity.
///
/// A user can have several connections (devices, tabs) in their room, and a
/// connection can sit in several rooms. Rooms exist only while they have
/// members. Cloning shares the same registry.
///
/// Lock order: a `connections` entry may be held while touching `rooms`,
/// never the other way round.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly established connection. It belongs to no room until it joins one.
    pub fn register(&self, id: ConnectionId, sender: ConnectionSender) {
        self.inner.connections.insert(
            id,
            ConnectionEntry {
                sender,
                rooms: HashSet::new(),
            },
        );
        tracing::debug!(connection_id = %id, "Connection registered");
    }

    /// Add a connection to the room for `user_id`.
    /// Returns `true` if the membership is new. Joining twice is a no-op, as is
    /// joining with a connection that was never registered or has already left.
    pub fn join(&self, id: ConnectionId, user_id: &str) -> bool {
        let Some(mut entry) = self.inner.connections.get_mut(&id) else {
            return false;
        };
        if !entry.rooms.insert(user_id.to_string()) {
            return false;
        }
        self.inner
            .rooms
            .entry(user_id.to_string())
            .or_default()
            .insert(id, entry.sender.clone());

        tracing::debug!(
            connection_id = %id,
            user_id = %user_id,
            members = self.room_size(user_id),
            "Joined room"
        );
        true
    }

    /// Remove a connection from every room it joined and forget it.
    /// Empty rooms are dropped. Unknown connections are ignored.
    pub fn leave(&self, id: ConnectionId) {
        let Some((_, entry)) = self.inner.connections.remove(&id) else {
            return;
        };
        for room in &entry.rooms {
            if let Some(mut members) = self.inner.rooms.get_mut(room) {
                members.remove(&id);
            }
            self.inner.rooms.remove_if(room, |_, members| members.is_empty());
        }
        tracing::debug!(
            connection_id = %id,
            rooms = entry.rooms.len(),
            "Connection left"
        );
    }

    /// Send `message` to every connection currently in the room for `user_id`.
    ///
    /// Membership is snapshotted before sending, so a connection joining
    /// concurrently may miss this message but receives every later one.
    /// Returns the number of connections the message was handed to; an empty
    /// or missing room yields 0 and is not an error.
    pub fn broadcast(&self, user_id: &str, message: Message) -> usize {
        let targets: Vec<ConnectionSender> = match self.inner.rooms.get(user_id) {
            Some(members) => members.values().cloned().collect(),
            None => return 0,
        };

        targets
            .iter()
            .filter(|sender| sender.send(message.clone()).is_ok())
            .count()
    }

    /// Number of connections in the room for `user_id`.
    pub fn room_size(&self, user_id: &str) -> usize {
        self.inner.rooms.get(user_id).map(|m| m.len()).unwrap_or(0)
    }

    /// Number of registered connections, joined or not.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }
}
