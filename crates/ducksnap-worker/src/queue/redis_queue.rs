//! Redis-backed queue client
//!
//! Producers LPUSH JSON messages onto a list, consumers BRPOP from its tail,
//! so each message goes to exactly one popper.
//!
//! Both connecting and popping run under client-side deadlines: a peer that
//! accepts the socket but stops answering is treated as a lost connection.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::RedisError;
use tracing::{error, info, instrument, warn};

use super::{QueueConnector, QueueError, RawMessage, TaskQueue};
use crate::config::{WorkerConfig, DEFAULT_CONNECT_TIMEOUT};

/// How long past the BRPOP server timeout the reply may take
const POP_REPLY_GRACE: Duration = Duration::from_secs(2);

/// Opens Redis connections for the worker
pub struct RedisConnector {
    client: redis::Client,
    endpoint: String,
    connect_timeout: Duration,
}

impl RedisConnector {
    /// Create a connector from a `redis://` URL
    ///
    /// Only validates the URL; no connection is opened here.
    pub fn new(redis_url: &str, endpoint: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::Command(format!("invalid redis url: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    pub fn from_config(config: &WorkerConfig) -> Result<Self, QueueError> {
        let url = config
            .redis_url()
            .map_err(|e| QueueError::Command(format!("invalid redis address: {}", e)))?;
        Ok(Self::new(&url, format!("{}:{}", config.redis_host, config.redis_port))?
            .with_connect_timeout(config.connect_timeout))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn open(&self) -> Result<RedisQueue, RedisError> {
        let mut conn = self.client.get_multiplexed_tokio_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(RedisQueue { conn })
    }
}

#[async_trait]
impl QueueConnector for RedisConnector {
    async fn connect(&self) -> Option<Box<dyn TaskQueue>> {
        match tokio::time::timeout(self.connect_timeout, self.open()).await {
            Ok(Ok(queue)) => {
                info!(endpoint = %self.endpoint, "Connected to Redis");
                Some(Box::new(queue))
            }
            Ok(Err(e)) => {
                error!(endpoint = %self.endpoint, error = %e, "Failed to connect to Redis");
                None
            }
            Err(_) => {
                error!(
                    endpoint = %self.endpoint,
                    timeout = ?self.connect_timeout,
                    "Failed to connect to Redis: no answer before timeout"
                );
                None
            }
        }
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// A single Redis connection used for popping (and pushing) tasks
pub struct RedisQueue {
    conn: MultiplexedConnection,
}

#[async_trait]
impl TaskQueue for RedisQueue {
    #[instrument(skip(self))]
    async fn pop_blocking(
        &mut self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<RawMessage>, QueueError> {
        // BRPOP treats 0 as "block forever"
        let timeout_secs = timeout.as_secs().max(1);
        let deadline = Duration::from_secs(timeout_secs) + POP_REPLY_GRACE;

        let mut cmd = redis::cmd("BRPOP");
        cmd.arg(key).arg(timeout_secs);
        let pop = cmd.query_async::<_, Option<(String, Vec<u8>)>>(&mut self.conn);

        let reply = match tokio::time::timeout(deadline, pop).await {
            Ok(reply) => reply.map_err(classify)?,
            Err(_) => {
                warn!(key, ?deadline, "BRPOP got no reply before its deadline");
                return Err(QueueError::ConnectionLost(format!(
                    "no reply to BRPOP within {:?}",
                    deadline
                )));
            }
        };

        Ok(reply.map(|(queue, body)| RawMessage::new(queue, body)))
    }

    async fn push(&mut self, key: &str, body: &str) -> Result<(), QueueError> {
        let _: i64 = redis::cmd("LPUSH")
            .arg(key)
            .arg(body)
            .query_async(&mut self.conn)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// Separate broken connections from failures the connection survives
fn classify(err: RedisError) -> QueueError {
    if err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_io_error()
        || err.is_timeout()
    {
        QueueError::ConnectionLost(err.to_string())
    } else {
        QueueError::Command(err.to_string())
    }
}
