// Worker configuration
//
// Read from the environment (after the binary loads any .env file). Unset or
// unparsable numeric values fall back to their defaults.

use std::time::Duration;

use url::Url;

use crate::retry::ReconnectPolicy;

pub const DEFAULT_REDIS_HOST: &str = "localhost";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_QUEUE_KEY: &str = "ducksnap_tasks";
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TRANSIENT_ERROR_PAUSE: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct WorkerConfig {
    /// Store connection string (DATABASE_URL)
    pub database_url: Option<String>,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,
    /// List key tasks are popped from
    pub queue_key: String,
    /// How long a single blocking pop waits
    pub poll_timeout: Duration,
    /// Fixed wait before rebuilding a lost queue connection
    pub reconnect_interval: Duration,
    /// Upper bound on opening and health-checking a queue connection
    pub connect_timeout: Duration,
    /// Pause after an unexpected, non-connection queue error
    pub transient_error_pause: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_host: DEFAULT_REDIS_HOST.to_string(),
            redis_port: DEFAULT_REDIS_PORT,
            redis_password: None,
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            transient_error_pause: DEFAULT_TRANSIENT_ERROR_PAUSE,
        }
    }
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("database_configured", &self.database_url.is_some())
            .field("redis_host", &self.redis_host)
            .field("redis_port", &self.redis_port)
            .field("redis_password", &self.redis_password.as_ref().map(|_| "***"))
            .field("queue_key", &self.queue_key)
            .field("poll_timeout", &self.poll_timeout)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: Duration| {
            non_empty(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            database_url: non_empty("DATABASE_URL"),
            redis_host: non_empty("REDIS_HOST").unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string()),
            redis_port: non_empty("REDIS_PORT")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_REDIS_PORT),
            redis_password: non_empty("REDIS_PASSWORD"),
            queue_key: non_empty("TASK_QUEUE_KEY").unwrap_or_else(|| DEFAULT_QUEUE_KEY.to_string()),
            poll_timeout: secs("POLL_TIMEOUT_SECS", DEFAULT_POLL_TIMEOUT),
            reconnect_interval: secs("RECONNECT_INTERVAL_SECS", DEFAULT_RECONNECT_INTERVAL),
            connect_timeout: secs("REDIS_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT),
            transient_error_pause: DEFAULT_TRANSIENT_ERROR_PAUSE,
        }
    }

    /// Connection URL for the queue, password percent-encoded
    pub fn redis_url(&self) -> Result<String, url::ParseError> {
        let mut url = Url::parse(&format!("redis://{}:{}/", self.redis_host, self.redis_port))?;
        if let Some(password) = &self.redis_password {
            url.set_password(Some(password))
                .map_err(|_| url::ParseError::EmptyHost)?;
        }
        Ok(url.to_string())
    }

    /// Reconnect policy derived from the configured interval
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::fixed(self.reconnect_interval)
    }
}
