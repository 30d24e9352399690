//! Read-only conversation history: GET /api/consultations/{consultation_id}/messages

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::models::MessageRow;
use crate::db::DbPool;
use crate::state::AppState;
use crate::store::StoreError;

/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Only return messages with a server_sequence lower than this
    pub before: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<HistoryMessage>,
    pub has_more: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    pub consultation_id: String,
    pub sender_id: String,
    pub sender_role: String,
    pub receiver_id: String,
    pub message: String,
    pub server_sequence: i64,
    pub created_at: String,
}

impl From<MessageRow> for HistoryMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            consultation_id: row.consultation_id,
            sender_id: row.sender_id,
            sender_role: row.sender_role,
            receiver_id: row.receiver_id,
            message: row.content,
            server_sequence: row.server_sequence,
            created_at: row.created_at,
        }
    }
}

/// GET /api/consultations/{consultation_id}/messages?before={seq}&limit={n}
/// Newest first. Identity is checked upstream of this service.
pub async fn get_consultation_messages(
    State(state): State<AppState>,
    Path(consultation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    let db = state.db.clone();
    let before = query.before.unwrap_or(i64::MAX);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let rows = tokio::task::spawn_blocking(move || {
        load_page(&db, &consultation_id, before, limit + 1)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to load consultation history");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let has_more = rows.len() > limit as usize;
    let messages = rows
        .into_iter()
        .take(limit as usize)
        .map(HistoryMessage::from)
        .collect();

    Ok(Json(HistoryResponse { messages, has_more }))
}

/// Fetch up to `limit` rows of a consultation below `before`, newest first.
pub fn load_page(
    db: &DbPool,
    consultation_id: &str,
    before: i64,
    limit: u32,
) -> Result<Vec<MessageRow>, StoreError> {
    let conn = db
        .lock()
        .map_err(|_| StoreError::Persistence("database lock poisoned".to_string()))?;

    let mut stmt = conn.prepare(
        "SELECT id, consultation_id, sender_id, sender_role, receiver_id, content, server_sequence, created_at
         FROM messages
         WHERE consultation_id = ?1 AND server_sequence < ?2
         ORDER BY server_sequence DESC
         LIMIT ?3",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![consultation_id, before, limit as i64], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                consultation_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_role: row.get(3)?,
                receiver_id: row.get(4)?,
                content: row.get(5)?,
                server_sequence: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}
