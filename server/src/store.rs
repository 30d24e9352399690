//! Durable, append-only message store.
//!
//! `append` validates, then writes inside a single IMMEDIATE transaction that
//! also assigns the per-consultation `server_sequence`. A failed or timed-out
//! append leaves no row behind.

use chrono::{DateTime, Utc};
use rusqlite::TransactionBehavior;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chat::payload::NewMessage;
use crate::db::DbPool;

/// Errors returned by a [`MessageStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A required field was empty; rejected before any I/O
    InvalidMessage(&'static str),
    /// The write failed and was rolled back
    Persistence(String),
    /// The write did not complete within the configured deadline and was rolled back
    Timeout,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMessage(field) => write!(f, "Invalid message: {} is empty", field),
            Self::Persistence(e) => write!(f, "Persistence error: {}", e),
            Self::Timeout => write!(f, "Persistence timed out"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

/// Identity and ordering assigned to a message at persistence time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedMessage {
    pub id: String,
    pub consultation_id: String,
    pub server_sequence: i64,
    pub created_at: DateTime<Utc>,
}

const OPEN: u8 = 0;
const COMMITTING: u8 = 1;
const ABANDONED: u8 = 2;

/// Time budget for one append, shared by the caller waiting on it and the
/// store doing the write.
///
/// The store may only commit after winning [`Deadline::begin_commit`]; the
/// caller may only report a timeout after winning [`Deadline::abandon`].
/// Exactly one of the two can succeed, so a write the caller reported as
/// failed is never committed.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    state: Arc<AtomicU8>,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            state: Arc::new(AtomicU8::new(OPEN)),
        }
    }

    /// True once the budget is spent or the caller gave up.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at || self.state.load(Ordering::Acquire) == ABANDONED
    }

    /// Claim the right to commit. False if the deadline passed or the caller gave up.
    pub fn begin_commit(&self) -> bool {
        Instant::now() < self.at
            && self
                .state
                .compare_exchange(OPEN, COMMITTING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Stop waiting. False if the store already started committing, in which
    /// case the caller must wait for the store's own result.
    pub fn abandon(&self) -> bool {
        self.state
            .compare_exchange(OPEN, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Durable append of chat messages. Implementations are synchronous and are
/// driven from `tokio::task::spawn_blocking`.
///
/// An implementation must not commit unless [`Deadline::begin_commit`] returns
/// true, and returns [`StoreError::Timeout`] when it does not.
pub trait MessageStore: Send + Sync + 'static {
    fn append(
        &self,
        message: &NewMessage,
        deadline: &Deadline,
    ) -> Result<PersistedMessage, StoreError>;
}

/// SQLite-backed [`MessageStore`].
#[derive(Clone)]
pub struct SqliteMessageStore {
    db: DbPool,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

impl MessageStore for SqliteMessageStore {
    fn append(
        &self,
        message: &NewMessage,
        deadline: &Deadline,
    ) -> Result<PersistedMessage, StoreError> {
        if let Some(field) = message.first_empty_field() {
            return Err(StoreError::InvalidMessage(field));
        }

        let mut conn = self
            .db
            .lock()
            .map_err(|_| StoreError::Persistence("database lock poisoned".to_string()))?;
        if deadline.expired() {
            return Err(StoreError::Timeout);
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let server_sequence: i64 = tx.query_row(
            "SELECT COALESCE(MAX(server_sequence), 0) + 1 FROM messages WHERE consultation_id = ?1",
            rusqlite::params![message.consultation_id],
            |row| row.get(0),
        )?;

        let id = uuid::Uuid::now_v7().to_string();
        let created_at = Utc::now();

        tx.execute(
            "INSERT INTO messages (id, consultation_id, sender_id, sender_role, receiver_id, content, server_sequence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                id,
                message.consultation_id,
                message.sender_id,
                message.sender_role.as_str(),
                message.receiver_id,
                message.content,
                server_sequence,
                created_at.to_rfc3339(),
            ],
        )?;

        // Dropping `tx` without commit rolls back.
        if !deadline.begin_commit() {
            return Err(StoreError::Timeout);
        }
        tx.commit()?;

        Ok(PersistedMessage {
            id,
            consultation_id: message.consultation_id.clone(),
            server_sequence,
            created_at,
        })
    }
}
