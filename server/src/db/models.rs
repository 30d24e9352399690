//! Database row types. These correspond 1:1 to the schema in migrations.rs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of a consultation authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Patient,
    Provider,
}

impl SenderRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Some(Self::Patient),
            "provider" => Some(Self::Provider),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Provider => "provider",
        }
    }
}

impl fmt::Display for SenderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message row as stored in the `messages` table.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRow {
    pub id: String,
    pub consultation_id: String,
    pub sender_id: String,
    pub sender_role: String,
    pub receiver_id: String,
    pub content: String,
    pub server_sequence: i64,
    pub created_at: String,
}
