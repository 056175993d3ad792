// Task message parsing
//
// Wire format: a JSON object with an integer `userId` plus any other fields,
// which are kept verbatim for the processor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a popped message was dropped
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task body is not UTF-8: {0}")]
    InvalidEncoding(#[from] std::str::Utf8Error),

    #[error("invalid task JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("task is not a JSON object")]
    NotAnObject,

    #[error("task has no userId")]
    MissingSubjectId,
}

/// A unit of work popped from the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "userId")]
    pub user_id: i64,

    /// Remaining fields, forwarded untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Parse a raw queue message body
    ///
    /// `userId` must be a non-zero integer; absent, null, zero, or
    /// non-integer values all count as missing.
    pub fn parse(body: impl AsRef<[u8]>) -> Result<Self, TaskError> {
        let text = std::str::from_utf8(body.as_ref())?;
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut fields) = value else {
            return Err(TaskError::NotAnObject);
        };

        let user_id = fields
            .remove("userId")
            .and_then(|v| v.as_i64())
            .filter(|id| *id != 0)
            .ok_or(TaskError::MissingSubjectId)?;

        Ok(Self {
            user_id,
            extra: fields,
        })
    }

    /// Wire representation, as a producer would push it
    pub fn to_message(&self) -> String {
        // Map<String, Value> with an i64 always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_minimal() {
        let task = Task::parse(r#"{"userId": 42}"#).unwrap();
        assert_eq!(task.user_id, 42);
        assert!(task.extra.is_empty());
    }

    #[test]
    fn test_parse_keeps_extra_fields() {
        let task = Task::parse(r#"{"userId": 7, "source": "cron", "opts": {"deep": true}}"#)
            .unwrap();
        assert_eq!(task.user_id, 7);
        assert_eq!(task.extra.get("source"), Some(&json!("cron")));
        assert_eq!(task.extra.get("opts"), Some(&json!({"deep": true})));
        assert!(!task.extra.contains_key("userId"));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            Task::parse("{not json"),
            Err(TaskError::InvalidJson(_))
        ));
        assert!(matches!(Task::parse(""), Err(TaskError::InvalidJson(_))));
    }

    #[test]
    fn test_non_utf8_body() {
        let body = b"{\"userId\": 42, \"name\": \"\xff\xfe\"}";
        assert!(matches!(
            Task::parse(&body[..]),
            Err(TaskError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_non_object() {
        assert!(matches!(Task::parse("[1, 2]"), Err(TaskError::NotAnObject)));
        assert!(matches!(Task::parse("42"), Err(TaskError::NotAnObject)));
    }

    #[test]
    fn test_missing_or_unusable_user_id() {
        for body in [
            r#"{}"#,
            r#"{"user_id": 42}"#,
            r#"{"userId": null}"#,
            r#"{"userId": 0}"#,
            r#"{"userId": "42"}"#,
            r#"{"userId": 4.2}"#,
        ] {
            assert!(
                matches!(Task::parse(body), Err(TaskError::MissingSubjectId)),
                "expected missing id for {body}"
            );
        }
    }

    #[test]
    fn test_message_matches_wire_format() {
        let task = Task::new(42).with_field("reason", json!("manual"));
        let value: Value = serde_json::from_str(&task.to_message()).unwrap();
        assert_eq!(value, json!({"userId": 42, "reason": "manual"}));
    }
}
