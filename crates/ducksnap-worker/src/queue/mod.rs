//! Queue client for the shared task list
//!
//! This module provides:
//! - [`QueueConnector`]: opens and health-checks connections
//! - [`TaskQueue`]: blocking pop (consumer) and push (producer) on one connection
//! - [`RedisConnector`] for production (LPUSH / BRPOP on a Redis list)
//! - [`InMemoryConnector`] for testing, with scripted connection faults

mod memory;
mod redis_queue;

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;

pub use self::memory::{InMemoryConnector, InMemoryQueue};
pub use self::redis_queue::{RedisConnector, RedisQueue};

/// A message popped from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// List the message came from
    pub queue: String,
    /// Bytes exactly as stored; not guaranteed to be UTF-8
    pub body: Vec<u8>,
}

impl RawMessage {
    pub fn new(queue: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            queue: queue.into(),
            body: body.into(),
        }
    }

    /// Body for logging, with invalid bytes replaced
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Queue errors, split by what the caller must do about them
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The connection is broken and must be rebuilt
    #[error("queue connection lost: {0}")]
    ConnectionLost(String),

    /// Any other failure; the connection may still be usable
    #[error("queue command failed: {0}")]
    Command(String),
}

impl QueueError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, QueueError::ConnectionLost(_))
    }
}

/// One live connection to the queue
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Wait up to `timeout` for a message at the tail of `key`
    ///
    /// `Ok(None)` is a timeout, not an error.
    async fn pop_blocking(
        &mut self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<RawMessage>, QueueError>;

    /// Push a message at the head of `key`
    async fn push(&mut self, key: &str, body: &str) -> Result<(), QueueError>;
}

/// Factory for queue connections
#[async_trait]
pub trait QueueConnector: Send + Sync {
    /// Open a connection and verify it answers
    ///
    /// Failure is logged and reported as `None`; the caller decides whether
    /// that is fatal.
    async fn connect(&self) -> Option<Box<dyn TaskQueue>>;

    /// Where connections go, for logging
    fn endpoint(&self) -> String;
}
