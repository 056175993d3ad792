// Persistence facade used by the worker and its processors
//
// Every operation is isolated: a failing store degrades the single call to
// None/false and is logged with the operation name, it never propagates.

use std::sync::Arc;

use tracing::{error, warn};

use crate::error::StoreError;
use crate::memory::InMemoryRecordStore;
use crate::models::Subject;
use crate::postgres::PostgresRecordStore;
use crate::store::RecordStore;

/// Record-level persistence with per-call failure isolation
///
/// Constructed once by the process bootstrap and shared as `Arc<Storage>`.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn RecordStore>,
}

impl Storage {
    pub fn new(backend: Arc<dyn RecordStore>) -> Self {
        Self { backend }
    }

    /// Postgres-backed storage; a missing URL still yields a usable value
    pub fn postgres(database_url: Option<String>) -> Self {
        Self::new(Arc::new(PostgresRecordStore::new(database_url)))
    }

    /// Postgres-backed storage configured from DATABASE_URL
    pub fn from_env() -> Self {
        Self::new(Arc::new(PostgresRecordStore::from_env()))
    }

    /// Storage over an in-memory backend, returning both handles
    pub fn in_memory() -> (Self, Arc<InMemoryRecordStore>) {
        let store = Arc::new(InMemoryRecordStore::new());
        (Self::new(store.clone()), store)
    }

    /// Look up a user by id
    ///
    /// Returns `None` both when the row does not exist and when the store
    /// could not be reached. Callers cannot tell the two apart.
    pub async fn get_subject(&self, id: i64) -> Option<Subject> {
        match self.backend.fetch_subject(id).await {
            Ok(subject) => subject,
            Err(e) => {
                log_failure("get_subject", id, &e);
                None
            }
        }
    }

    /// Append a fetched-data record; `false` means the data is lost
    pub async fn save_fetched_data(&self, user_id: i64, data: &serde_json::Value) -> bool {
        match self.backend.insert_fetched_data(user_id, data).await {
            Ok(()) => true,
            Err(e) => {
                log_failure("save_fetched_data", user_id, &e);
                false
            }
        }
    }

    /// Append an insight record; `false` means the insight is lost
    pub async fn save_insight(&self, user_id: i64, insight: &str) -> bool {
        if insight.is_empty() {
            warn!(user_id, "saving empty insight");
        }
        match self.backend.insert_insight(user_id, insight).await {
            Ok(()) => true,
            Err(e) => {
                log_failure("save_insight", user_id, &e);
                false
            }
        }
    }
}

/// Unreachable store vs rejected statement, logged under separate messages
fn log_failure(operation: &'static str, user_id: i64, err: &StoreError) {
    if err.is_connectivity() {
        error!(operation, user_id, error = %err, "Database unreachable");
    } else {
        error!(operation, user_id, error = %err, "Database error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_subject_found() {
        let (storage, store) = Storage::in_memory();
        store.insert_subject(Subject::new(42, "duck"));

        let subject = storage.get_subject(42).await.unwrap();
        assert_eq!(subject.username, "duck");
        assert!(subject.snapchat_api_key.is_none());
    }

    // Not-found and outage collapse into the same `None`; this is a known
    // property of the API, kept on purpose until callers need to tell them apart.
    #[tokio::test]
    async fn test_missing_and_unreachable_are_indistinguishable() {
        let (storage, store) = Storage::in_memory();
        store.insert_subject(Subject::new(1, "present"));

        let not_found = storage.get_subject(999).await;

        store.set_unavailable(true);
        let unreachable = storage.get_subject(1).await;

        assert_eq!(not_found, None);
        assert_eq!(unreachable, None);
        assert_eq!(not_found, unreachable);
    }

    #[tokio::test]
    async fn test_saves_are_append_only() {
        let (storage, store) = Storage::in_memory();

        assert!(storage.save_fetched_data(5, &json!({"snaps": 3})).await);
        assert!(storage.save_fetched_data(5, &json!({"snaps": 3})).await);
        assert!(storage.save_insight(5, "posts more at night").await);
        assert!(storage.save_insight(5, "posts more at night").await);

        assert_eq!(store.fetched_data_for(5).len(), 2);
        let insights = store.insights_for(5);
        assert_eq!(insights.len(), 2);
        assert_ne!(insights[0].id, insights[1].id);
    }

    #[tokio::test]
    async fn test_store_failure_returns_false() {
        let (storage, store) = Storage::in_memory();
        store.set_unavailable(true);

        assert!(!storage.save_fetched_data(1, &json!({})).await);
        assert!(!storage.save_insight(1, "lost").await);

        store.set_unavailable(false);
        assert_eq!(store.write_count(), 0);
    }

    /// Backend that is reachable but rejects every statement
    struct RejectingStore;

    #[async_trait::async_trait]
    impl RecordStore for RejectingStore {
        async fn fetch_subject(&self, _id: i64) -> crate::StoreResult<Option<Subject>> {
            Err(StoreError::Database("permission denied".to_string()))
        }

        async fn insert_fetched_data(
            &self,
            _user_id: i64,
            _data: &serde_json::Value,
        ) -> crate::StoreResult<()> {
            Err(StoreError::Database("violates foreign key constraint".to_string()))
        }

        async fn insert_insight(&self, _user_id: i64, _insight: &str) -> crate::StoreResult<()> {
            Err(StoreError::Database("value too long".to_string()))
        }
    }

    #[tokio::test]
    async fn test_rejected_statements_degrade_like_outages() {
        let storage = Storage::new(Arc::new(RejectingStore));
        let err = StoreError::Database("permission denied".to_string());
        assert!(!err.is_connectivity());

        assert_eq!(storage.get_subject(1).await, None);
        assert!(!storage.save_fetched_data(1, &json!({"a": 1})).await);
        assert!(!storage.save_insight(1, "text").await);
    }

    #[tokio::test]
    async fn test_unconfigured_postgres_degrades() {
        let storage = Storage::postgres(None);

        assert_eq!(storage.get_subject(1).await, None);
        assert!(!storage.save_fetched_data(1, &json!({"a": 1})).await);
        assert!(!storage.save_insight(1, "text").await);
    }
}
