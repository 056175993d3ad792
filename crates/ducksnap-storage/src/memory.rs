//! In-memory implementation of RecordStore for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::models::{FetchedDataRecord, InsightRecord, Subject};
use crate::store::RecordStore;

/// In-memory implementation of RecordStore
///
/// Provides the same append-only semantics as the PostgreSQL store. The
/// outage switch makes every call fail with [`StoreError::Unavailable`],
/// which is how tests simulate an unreachable database.
///
/// # Example
///
/// ```
/// use ducksnap_storage::{InMemoryRecordStore, Subject};
///
/// let store = InMemoryRecordStore::new();
/// store.insert_subject(Subject::new(42, "duck"));
/// ```
pub struct InMemoryRecordStore {
    subjects: RwLock<HashMap<i64, Subject>>,
    fetched_data: RwLock<Vec<FetchedDataRecord>>,
    insights: RwLock<Vec<InsightRecord>>,
    next_id: AtomicI64,
    unavailable: AtomicBool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            subjects: RwLock::new(HashMap::new()),
            fetched_data: RwLock::new(Vec::new()),
            insights: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Seed a user row
    pub fn insert_subject(&self, subject: Subject) {
        self.subjects.write().insert(subject.id, subject);
    }

    /// Toggle the simulated outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fetched_data_for(&self, user_id: i64) -> Vec<FetchedDataRecord> {
        self.fetched_data
            .read()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn insights_for(&self, user_id: i64) -> Vec<InsightRecord> {
        self.insights
            .read()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Total number of appended records of both kinds
    pub fn write_count(&self) -> usize {
        self.fetched_data.read().len() + self.insights.read().len()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn fetch_subject(&self, id: i64) -> StoreResult<Option<Subject>> {
        self.check_available()?;
        Ok(self.subjects.read().get(&id).cloned())
    }

    async fn insert_fetched_data(
        &self,
        user_id: i64,
        data: &serde_json::Value,
    ) -> StoreResult<()> {
        self.check_available()?;
        // Mirror the text round trip the Postgres store performs
        let text = serde_json::to_string(data)?;
        let data = serde_json::from_str(&text)?;
        let record = FetchedDataRecord {
            id: self.next_id(),
            user_id,
            data,
            fetched_at: Utc::now(),
        };
        self.fetched_data.write().push(record);
        Ok(())
    }

    async fn insert_insight(&self, user_id: i64, insight: &str) -> StoreResult<()> {
        self.check_available()?;
        let record = InsightRecord {
            id: self.next_id(),
            user_id,
            insight: insight.to_string(),
            created_at: Utc::now(),
        };
        self.insights.write().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_seeded_subject() {
        let store = InMemoryRecordStore::new();
        let mut subject = Subject::new(7, "mallard");
        subject.snapchat_client_id = Some("client".to_string());
        store.insert_subject(subject.clone());

        let found = store.fetch_subject(7).await.unwrap();
        assert_eq!(found, Some(subject));
        assert_eq!(store.fetch_subject(8).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetched_data_is_append_only() {
        let store = InMemoryRecordStore::new();
        store.insert_fetched_data(1, &json!({"n": 1})).await.unwrap();
        store.insert_fetched_data(1, &json!({"n": 2})).await.unwrap();

        let records = store.fetched_data_for(1);
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].id, records[1].id);
        assert_eq!(records[0].data, json!({"n": 1}));
        assert_eq!(records[1].data, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_outage_fails_all_operations() {
        let store = InMemoryRecordStore::new();
        store.insert_subject(Subject::new(1, "teal"));
        store.set_unavailable(true);

        assert!(matches!(
            store.fetch_subject(1).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.insert_insight(1, "x").await.is_err());
        assert!(store.insert_fetched_data(1, &json!({})).await.is_err());
        assert_eq!(store.write_count(), 0);

        store.set_unavailable(false);
        assert!(store.fetch_subject(1).await.unwrap().is_some());
    }
}
