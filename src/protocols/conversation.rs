//! Conversation validation
//!
//! A request carries its conversation either as a JSON-encoded string or as a
//! raw JSON array. Both are normalized into a [`Conversation`] here; nothing
//! downstream sees unvalidated input.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StreamError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Non-empty, validated message list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Conversation(Vec<Message>);

impl Conversation {
    pub fn messages(&self) -> &[Message] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct ConversationValidator;

impl ConversationValidator {
    /// Validate the `conversation` request field
    pub fn validate(raw: &Value) -> Result<Conversation, StreamError> {
        let parsed;
        let value = match raw {
            Value::String(encoded) => {
                parsed = serde_json::from_str::<Value>(encoded).map_err(|e| {
                    StreamError::invalid(format!("conversation is not valid JSON: {}", e))
                })?;
                &parsed
            }
            other => other,
        };

        let items = value
            .as_array()
            .ok_or_else(|| StreamError::invalid("conversation must be a list of messages"))?;
        if items.is_empty() {
            return Err(StreamError::invalid("conversation must not be empty"));
        }

        items
            .iter()
            .enumerate()
            .map(|(index, item)| Self::validate_message(index, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Conversation)
    }

    fn validate_message(index: usize, item: &Value) -> Result<Message, StreamError> {
        let record = item
            .as_object()
            .ok_or_else(|| StreamError::invalid_at(index, "message must be an object"))?;

        let field = |name: &str| -> Result<String, StreamError> {
            match record.get(name) {
                None | Some(Value::Null) => {
                    Err(StreamError::invalid_at(index, format!("missing '{}'", name)))
                }
                Some(Value::String(s)) if s.is_empty() => {
                    Err(StreamError::invalid_at(index, format!("'{}' is empty", name)))
                }
                Some(Value::String(s)) => Ok(s.clone()),
                Some(_) => Err(StreamError::invalid_at(
                    index,
                    format!("'{}' must be a string", name),
                )),
            }
        };

        Ok(Message {
            role: field("role")?,
            content: field("content")?,
        })
    }

    /// Resolve `max_tokens`: absent or null falls back to `default`; numbers
    /// and numeric strings must be positive integers.
    pub fn resolve_max_tokens(raw: Option<&Value>, default: u32) -> Result<u32, StreamError> {
        let invalid = |v: &Value| {
            StreamError::invalid(format!("max_tokens must be a positive integer, got {}", v))
        };

        let parsed = match raw {
            None | Some(Value::Null) => return Ok(default),
            Some(v @ Value::Number(n)) => n.as_u64().ok_or_else(|| invalid(v))?,
            Some(v @ Value::String(s)) => s.trim().parse::<u64>().map_err(|_| invalid(v))?,
            Some(v) => return Err(invalid(v)),
        };

        match u32::try_from(parsed) {
            Ok(0) => Err(StreamError::invalid("max_tokens must be greater than zero")),
            Ok(n) => Ok(n),
            Err(_) => Err(StreamError::invalid(format!(
                "max_tokens {} exceeds {}",
                parsed,
                u32::MAX
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_accepts_encoded_string_and_raw_array() {
        let raw = json!([{"role": "user", "content": "Hi"}]);
        let encoded = Value::String(raw.to_string());

        let a = ConversationValidator::validate(&raw).unwrap();
        let b = ConversationValidator::validate(&encoded).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.messages(), &[Message::new("user", "Hi")]);
    }

    #[test]
    fn test_role_values_are_not_restricted() {
        let raw = json!([
            {"role": "narrator", "content": "Once"},
            {"role": "user", "content": "upon", "name": "extra fields are ignored"}
        ]);
        let conversation = ConversationValidator::validate(&raw).unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.messages()[0].role, "narrator");
    }

    #[test]
    fn test_missing_content_names_index() {
        let raw = Value::String(r#"[{"role":"user"}]"#.to_string());
        match ConversationValidator::validate(&raw) {
            Err(StreamError::InvalidInput { index, reason }) => {
                assert_eq!(index, Some(0));
                assert!(reason.contains("content"));
            }
            other => panic!("expected InvalidInput, got {:?}", other),
        }

        let raw = json!([
            {"role": "user", "content": "Hi"},
            {"role": "assistant", "content": 7}
        ]);
        match ConversationValidator::validate(&raw) {
            Err(StreamError::InvalidInput { index, .. }) => assert_eq!(index, Some(1)),
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_non_list_shapes() {
        for raw in [
            json!([]),
            json!({"role": "user", "content": "Hi"}),
            json!("not json at all"),
            json!(["plain string"]),
            json!(42),
        ] {
            assert!(
                matches!(
                    ConversationValidator::validate(&raw),
                    Err(StreamError::InvalidInput { .. })
                ),
                "{} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_resolve_max_tokens() {
        assert_eq!(ConversationValidator::resolve_max_tokens(None, 512).unwrap(), 512);
        assert_eq!(
            ConversationValidator::resolve_max_tokens(Some(&Value::Null), 512).unwrap(),
            512
        );
        assert_eq!(
            ConversationValidator::resolve_max_tokens(Some(&json!(16)), 512).unwrap(),
            16
        );
        assert_eq!(
            ConversationValidator::resolve_max_tokens(Some(&json!("32")), 512).unwrap(),
            32
        );

        for bad in [json!(0), json!(-3), json!(1.5), json!("many"), json!([4])] {
            assert!(
                ConversationValidator::resolve_max_tokens(Some(&bad), 512).is_err(),
                "{} should be rejected",
                bad
            );
        }
    }
}
