//! Reconnect policy for the queue connection

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How long to wait before each attempt to rebuild a lost queue connection
///
/// The dispatcher only asks this value for delays; swapping the fixed
/// interval for exponential backoff does not touch the loop.
///
/// # Example
///
/// ```
/// use ducksnap_worker::ReconnectPolicy;
/// use std::time::Duration;
///
/// let policy = ReconnectPolicy::fixed(Duration::from_secs(5));
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
/// assert_eq!(policy.delay_for_attempt(100), Duration::from_secs(5));
/// assert!(policy.has_attempts_remaining(u32::MAX - 1));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum reconnect attempts; `None` retries forever
    pub max_attempts: Option<u32>,

    /// Delay before the first attempt
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound on any delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Growth factor per attempt (1.0 for fixed intervals)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl ReconnectPolicy {
    /// Same delay before every attempt, never gives up
    pub fn fixed(interval: Duration) -> Self {
        Self {
            max_attempts: None,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Doubling delays from `initial` up to `max`, never gives up
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: None,
            initial_interval: initial,
            max_interval: max.max(initial),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-range..range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::try_from_secs_f64(jittered).unwrap_or(self.max_interval)
    }

    /// Whether attempt number `attempt` (already made) leaves room for another
    pub fn has_attempts_remaining(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
