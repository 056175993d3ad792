// Database models for the records the worker reads and appends

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user the worker processes tasks for
///
/// Credential columns are nullable; NULL maps to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Subject {
    pub id: i64,
    pub username: String,
    pub snapchat_client_id: Option<String>,
    pub snapchat_api_key: Option<String>,
}

impl Subject {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            snapchat_client_id: None,
            snapchat_api_key: None,
        }
    }

    /// Whether both external credentials are present
    pub fn has_credentials(&self) -> bool {
        self.snapchat_client_id.is_some() && self.snapchat_api_key.is_some()
    }
}

/// Append-only snapshot of data fetched for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedDataRecord {
    pub id: i64,
    pub user_id: i64,
    pub data: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

/// Append-only derived insight for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightRecord {
    pub id: i64,
    pub user_id: i64,
    pub insight: String,
    pub created_at: DateTime<Utc>,
}
