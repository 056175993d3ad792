// Processing capability invoked once per task
//
// The dispatcher only knows this trait. The agent logic that runs in
// production implements it outside this crate; SubjectSyncProcessor is the
// built-in implementation the binary uses.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ducksnap_storage::Storage;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::task::Task;

/// Errors a processor reports back to the dispatcher
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The task's user does not exist (or the store could not be reached)
    #[error("user {0} not found")]
    SubjectNotFound(i64),

    /// A write the processor depends on was not persisted
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Anything else that went wrong inside the processor
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Long-running per-task work
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Run the task to completion and return a structured result
    async fn process(&self, task: &Task) -> Result<Value, ProcessError>;
}

#[async_trait]
impl<P: TaskProcessor + ?Sized> TaskProcessor for Arc<P> {
    async fn process(&self, task: &Task) -> Result<Value, ProcessError> {
        (**self).process(task).await
    }
}

/// Resolves the task's user and reports on it
///
/// Read-only unless [`recording_payload`](Self::recording_payload) is set,
/// in which case the task's extra fields are appended as a fetched-data
/// record first.
pub struct SubjectSyncProcessor {
    storage: Arc<Storage>,
    record_payload: bool,
}

impl SubjectSyncProcessor {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            record_payload: false,
        }
    }

    /// Also store the task's extra fields as fetched data
    pub fn recording_payload(mut self) -> Self {
        self.record_payload = true;
        self
    }
}

#[async_trait]
impl TaskProcessor for SubjectSyncProcessor {
    async fn process(&self, task: &Task) -> Result<Value, ProcessError> {
        let subject = self
            .storage
            .get_subject(task.user_id)
            .await
            .ok_or(ProcessError::SubjectNotFound(task.user_id))?;

        debug!(
            user_id = subject.id,
            has_credentials = subject.has_credentials(),
            "Loaded user"
        );

        let stored_fields: Vec<&String> = if self.record_payload {
            let payload = Value::Object(task.extra.clone());
            if !self.storage.save_fetched_data(subject.id, &payload).await {
                return Err(ProcessError::Persistence(format!(
                    "fetched data for user {} was not saved",
                    subject.id
                )));
            }
            info!(user_id = subject.id, fields = task.extra.len(), "Recorded task payload");
            task.extra.keys().collect()
        } else {
            Vec::new()
        };

        Ok(json!({
            "userId": subject.id,
            "username": subject.username,
            "hasCredentials": subject.has_credentials(),
            "storedFields": stored_fields,
            "completedAt": Utc::now(),
        }))
    }
}
