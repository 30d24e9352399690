use rusqlite_migration::{Migrations, M};

/// Schema migrations, tracked through SQLite's user_version pragma.
///
/// `messages` is append-only: no code path updates or deletes rows.
/// `server_sequence` is assigned per consultation inside the insert
/// transaction, so (consultation_id, server_sequence) orders a conversation.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: Consultation messages

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    consultation_id TEXT NOT NULL CHECK (consultation_id <> ''),
    sender_id TEXT NOT NULL CHECK (sender_id <> ''),
    sender_role TEXT NOT NULL CHECK (sender_role IN ('patient', 'provider')),
    receiver_id TEXT NOT NULL CHECK (receiver_id <> ''),
    content TEXT NOT NULL CHECK (content <> ''),
    server_sequence INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (consultation_id, server_sequence)
);
CREATE INDEX idx_messages_consultation_seq ON messages(consultation_id, server_sequence);
CREATE INDEX idx_messages_receiver ON messages(receiver_id, created_at);
",
    )])
}
