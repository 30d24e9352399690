//! Boundary validation for inbound socket payloads.
//!
//! Payload values arrive as loose JSON. Identity fields may be strings or
//! integers (clients keyed on numeric database ids send numbers); both are
//! normalised to strings here so nothing past this module sees raw JSON.

use serde_json::Value;
use std::fmt;

use crate::db::models::SenderRole;

/// Error for a payload that is missing a field or carries an unusable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Payload is not a JSON object
    NotAnObject,
    /// Required field absent, null or empty
    MissingField(&'static str),
    /// Field present but of the wrong type or value
    InvalidField(&'static str),
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "Payload is not an object"),
            Self::MissingField(field) => write!(f, "Missing required field: {}", field),
            Self::InvalidField(field) => write!(f, "Invalid value for field: {}", field),
        }
    }
}

impl std::error::Error for PayloadError {}

/// A send-message payload that passed validation. Every field is present and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub consultation_id: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    pub receiver_id: String,
    pub content: String,
}

impl NewMessage {
    /// Validate a `send_message` payload:
    /// `{consultation_id, sender_id, sender_role, message, receiver_id}`.
    pub fn from_payload(data: &Value) -> Result<Self, PayloadError> {
        let obj = data.as_object().ok_or(PayloadError::NotAnObject)?;
        let field = |name: &'static str| -> Result<String, PayloadError> {
            match obj.get(name) {
                None | Some(Value::Null) => Err(PayloadError::MissingField(name)),
                Some(value) => identity_string(value).ok_or(PayloadError::InvalidField(name)),
            }
        };

        let consultation_id = field("consultation_id")?;
        let sender_id = field("sender_id")?;
        let sender_role = SenderRole::parse(&field("sender_role")?)
            .ok_or(PayloadError::InvalidField("sender_role"))?;
        let receiver_id = field("receiver_id")?;
        let content = match obj.get("message") {
            None | Some(Value::Null) => return Err(PayloadError::MissingField("message")),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(PayloadError::InvalidField("message")),
        };

        let message = Self {
            consultation_id,
            sender_id,
            sender_role,
            receiver_id,
            content,
        };
        match message.first_empty_field() {
            Some(name) => Err(PayloadError::MissingField(name)),
            None => Ok(message),
        }
    }

    /// Name of the first required field that is empty, if any.
    /// Whitespace is content, not absence.
    pub fn first_empty_field(&self) -> Option<&'static str> {
        [
            ("consultation_id", &self.consultation_id),
            ("sender_id", &self.sender_id),
            ("receiver_id", &self.receiver_id),
            ("message", &self.content),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
    }
}

/// Extract the room key from a `join` payload: `{user_id}`.
/// Returns `None` for anything unusable; joins with a bad payload are ignored.
pub fn join_user_id(data: &Value) -> Option<String> {
    data.get("user_id").and_then(identity_string)
}

/// Normalise a JSON identity value to a non-empty string, kept exactly as sent.
fn identity_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "consultation_id": "C1",
            "sender_id": "S1",
            "sender_role": "patient",
            "message": "hello",
            "receiver_id": "R1",
        })
    }

    #[test]
    fn accepts_complete_payload() {
        let msg = NewMessage::from_payload(&valid()).unwrap();
        assert_eq!(msg.consultation_id, "C1");
        assert_eq!(msg.sender_id, "S1");
        assert_eq!(msg.sender_role, SenderRole::Patient);
        assert_eq!(msg.receiver_id, "R1");
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn numeric_ids_are_normalised() {
        let payload = json!({
            "consultation_id": 12,
            "sender_id": 7,
            "sender_role": "provider",
            "message": "take rest",
            "receiver_id": 9,
        });
        let msg = NewMessage::from_payload(&payload).unwrap();
        assert_eq!(msg.consultation_id, "12");
        assert_eq!(msg.sender_id, "7");
        assert_eq!(msg.receiver_id, "9");
    }

    #[test]
    fn each_missing_field_is_rejected() {
        for field in ["consultation_id", "sender_id", "sender_role", "message", "receiver_id"] {
            let mut payload = valid();
            payload.as_object_mut().unwrap().remove(field);
            assert_eq!(
                NewMessage::from_payload(&payload),
                Err(PayloadError::MissingField(field)),
                "field {field}"
            );
        }
    }

    #[test]
    fn empty_values_are_rejected() {
        let mut payload = valid();
        payload["message"] = json!("");
        assert_eq!(
            NewMessage::from_payload(&payload),
            Err(PayloadError::MissingField("message"))
        );

        let mut payload = valid();
        payload["receiver_id"] = json!("");
        assert_eq!(
            NewMessage::from_payload(&payload),
            Err(PayloadError::InvalidField("receiver_id"))
        );
    }

    #[test]
    fn whitespace_is_kept_as_sent() {
        let mut payload = valid();
        payload["message"] = json!("   ");
        payload["receiver_id"] = json!(" R1");
        payload["sender_id"] = json!("S1 ");
        let msg = NewMessage::from_payload(&payload).unwrap();
        assert_eq!(msg.content, "   ");
        assert_eq!(msg.receiver_id, " R1");
        assert_eq!(msg.sender_id, "S1 ");
        assert_eq!(msg.first_empty_field(), None);

        assert_eq!(join_user_id(&json!({"user_id": " R1"})), Some(" R1".to_string()));
    }

    #[test]
    fn rejects_unknown_role_and_non_objects() {
        let mut payload = valid();
        payload["sender_role"] = json!("janitor");
        assert_eq!(
            NewMessage::from_payload(&payload),
            Err(PayloadError::InvalidField("sender_role"))
        );
        assert_eq!(
            NewMessage::from_payload(&json!("hello")),
            Err(PayloadError::NotAnObject)
        );
    }

    #[test]
    fn join_payload_extraction() {
        assert_eq!(join_user_id(&json!({"user_id": "R1"})), Some("R1".to_string()));
        assert_eq!(join_user_id(&json!({"user_id": 42})), Some("42".to_string()));
        assert_eq!(join_user_id(&json!({"user": "R1"})), None);
        assert_eq!(join_user_id(&json!({"user_id": ""})), None);
        assert_eq!(join_user_id(&json!(null)), None);
    }
}
