//! PostgreSQL implementation of RecordStore
//!
//! Connection discipline:
//! - Every call opens its own connection from the configured URL
//! - Writes run inside a single transaction and commit before returning
//! - Any error path drops the transaction (rollback) and the connection
//! - No pool is held between calls

use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use tracing::{debug, instrument, warn};

use crate::error::{StoreError, StoreResult};
use crate::models::Subject;
use crate::store::RecordStore;

/// PostgreSQL implementation of RecordStore
///
/// Constructed without touching the network. A missing URL is accepted and
/// reported as [`StoreError::NotConfigured`] on every call.
///
/// # Example
///
/// ```ignore
/// use ducksnap_storage::PostgresRecordStore;
///
/// let store = PostgresRecordStore::new(std::env::var("DATABASE_URL").ok());
/// let user = store.fetch_subject(42).await?;
/// ```
#[derive(Clone)]
pub struct PostgresRecordStore {
    database_url: Option<String>,
}

impl std::fmt::Debug for PostgresRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The URL carries credentials
        f.debug_struct("PostgresRecordStore")
            .field("configured", &self.database_url.is_some())
            .finish()
    }
}

impl PostgresRecordStore {
    pub fn new(database_url: Option<String>) -> Self {
        let database_url = database_url.filter(|url| !url.trim().is_empty());
        if database_url.is_none() {
            warn!("DATABASE_URL is not set, every storage call will fail");
        }
        Self { database_url }
    }

    /// Read DATABASE_URL from the environment
    pub fn from_env() -> Self {
        Self::new(std::env::var("DATABASE_URL").ok())
    }

    async fn connect(&self) -> StoreResult<PgConnection> {
        let url = self.database_url.as_deref().ok_or(StoreError::NotConfigured)?;
        PgConnection::connect(url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    #[instrument(skip(self))]
    async fn fetch_subject(&self, id: i64) -> StoreResult<Option<Subject>> {
        let mut conn = self.connect().await?;

        let row = sqlx::query_as::<_, Subject>(
            r#"
            SELECT id::BIGINT AS id, username, snapchat_client_id, snapchat_api_key
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut conn)
        .await?;

        close(conn).await;
        Ok(row)
    }

    #[instrument(skip(self, data))]
    async fn insert_fetched_data(
        &self,
        user_id: i64,
        data: &serde_json::Value,
    ) -> StoreResult<()> {
        let payload = serde_json::to_string(data)?;
        let mut conn = self.connect().await?;

        let mut tx = conn.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO snapchat_data (user_id, data, fetched_at)
            VALUES ($1, $2::jsonb, NOW())
            "#,
        )
        .bind(user_id)
        .bind(&payload)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        close(conn).await;
        debug!(user_id, bytes = payload.len(), "stored fetched data");
        Ok(())
    }

    #[instrument(skip(self, insight))]
    async fn insert_insight(&self, user_id: i64, insight: &str) -> StoreResult<()> {
        let mut conn = self.connect().await?;

        let mut tx = conn.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO ai_insights (user_id, insight, created_at)
            VALUES ($1, $2, NOW())
            "#,
        )
        .bind(user_id)
        .bind(insight)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        close(conn).await;
        debug!(user_id, "stored insight");
        Ok(())
    }
}

/// Graceful close; the result of the call is already decided at this point
async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        debug!(error = %e, "error closing connection");
    }
}
