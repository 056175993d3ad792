//! RecordStore trait definition

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::models::Subject;

/// Backend for the three record operations the worker exercises
///
/// Implementations report every failure as a [`StoreError`](crate::StoreError);
/// turning failures into degraded values is the job of [`Storage`](crate::Storage).
/// Each call owns whatever connection it needs for its duration only.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Single-row lookup of a user by id
    async fn fetch_subject(&self, id: i64) -> StoreResult<Option<Subject>>;

    /// Append a fetched-data record stamped with the store's clock
    async fn insert_fetched_data(&self, user_id: i64, data: &serde_json::Value)
        -> StoreResult<()>;

    /// Append an insight record stamped with the store's clock
    async fn insert_insight(&self, user_id: i64, insight: &str) -> StoreResult<()>;
}
