//! In-memory queue for testing
//!
//! Lists live in shared state, so a connector and every connection it hands
//! out see the same messages. Faults are scripted up front:
//! - the next N connects fail
//! - the next N pops report a lost connection
//! - the next N pops fail with a command error

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{QueueConnector, QueueError, RawMessage, TaskQueue};

#[derive(Default)]
struct Faults {
    failing_connects: usize,
    dropped_pops: usize,
    failing_pops: usize,
}

#[derive(Default)]
struct Shared {
    lists: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    faults: Mutex<Faults>,
    notify: Notify,
    connect_attempts: AtomicUsize,
    pops: AtomicUsize,
}

/// In-memory [`QueueConnector`]
///
/// # Example
///
/// ```
/// use ducksnap_worker::queue::InMemoryConnector;
///
/// let connector = InMemoryConnector::new();
/// connector.enqueue("ducksnap_tasks", r#"{"userId": 42}"#);
/// assert_eq!(connector.len("ducksnap_tasks"), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    shared: Arc<Shared>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer-side push, bypassing any connection
    pub fn enqueue(&self, key: &str, body: &str) {
        push_front(&self.shared, key, body.as_bytes());
    }

    /// Push raw bytes, which need not be valid UTF-8
    pub fn enqueue_bytes(&self, key: &str, body: &[u8]) {
        push_front(&self.shared, key, body);
    }

    /// Make the next `n` connect attempts fail
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.faults.lock().failing_connects = n;
    }

    /// Make the next `n` pops report a dropped connection
    pub fn drop_next_pops(&self, n: usize) {
        self.shared.faults.lock().dropped_pops = n;
    }

    /// Make the next `n` pops fail with a non-connection error
    pub fn fail_next_pops(&self, n: usize) {
        self.shared.faults.lock().failing_pops = n;
    }

    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of pop calls made across all connections
    pub fn pop_calls(&self) -> usize {
        self.shared.pops.load(Ordering::SeqCst)
    }

    pub fn len(&self, key: &str) -> usize {
        self.shared.lists.lock().get(key).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }
}

#[async_trait]
impl QueueConnector for InMemoryConnector {
    async fn connect(&self) -> Option<Box<dyn TaskQueue>> {
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let mut faults = self.shared.faults.lock();
        if faults.failing_connects > 0 {
            faults.failing_connects -= 1;
            tracing::error!("Failed to connect to in-memory queue (scripted)");
            return None;
        }

        Some(Box::new(InMemoryQueue {
            shared: self.shared.clone(),
            broken: false,
        }))
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

/// One connection handed out by [`InMemoryConnector`]
///
/// Once a scripted drop hits it, the connection stays broken.
pub struct InMemoryQueue {
    shared: Arc<Shared>,
    broken: bool,
}

impl InMemoryQueue {
    fn check_faults(&mut self) -> Result<(), QueueError> {
        if self.broken {
            return Err(QueueError::ConnectionLost("connection closed".to_string()));
        }

        let mut faults = self.shared.faults.lock();
        if faults.dropped_pops > 0 {
            faults.dropped_pops -= 1;
            self.broken = true;
            return Err(QueueError::ConnectionLost("connection reset by peer".to_string()));
        }
        if faults.failing_pops > 0 {
            faults.failing_pops -= 1;
            return Err(QueueError::Command("scripted command failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn pop_blocking(
        &mut self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<RawMessage>, QueueError> {
        self.shared.pops.fetch_add(1, Ordering::SeqCst);
        self.check_faults()?;

        let deadline = Instant::now() + timeout;
        loop {
            // Register before checking so a push between the two is not missed
            let notified = self.shared.notify.notified();

            if let Some(body) = pop_back(&self.shared, key) {
                return Ok(Some(RawMessage::new(key, body)));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn push(&mut self, key: &str, body: &str) -> Result<(), QueueError> {
        if self.broken {
            return Err(QueueError::ConnectionLost("connection closed".to_string()));
        }
        push_front(&self.shared, key, body.as_bytes());
        Ok(())
    }
}

fn push_front(shared: &Shared, key: &str, body: &[u8]) {
    shared
        .lists
        .lock()
        .entry(key.to_string())
        .or_default()
        .push_front(body.to_vec());
    shared.notify.notify_waiters();
}

fn pop_back(shared: &Shared, key: &str) -> Option<Vec<u8>> {
    shared.lists.lock().get_mut(key).and_then(VecDeque::pop_back)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "tasks";

    #[tokio::test]
    async fn test_fifo_order() {
        let connector = InMemoryConnector::new();
        connector.enqueue(KEY, "first");
        connector.enqueue(KEY, "second");

        let mut queue = connector.connect().await.unwrap();
        let a = queue.pop_blocking(KEY, Duration::from_secs(1)).await.unwrap();
        let b = queue.pop_blocking(KEY, Duration::from_secs(1)).await.unwrap();

        assert_eq!(a.unwrap().body, b"first");
        assert_eq!(b.unwrap().body, b"second");
        assert!(connector.is_empty(KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_times_out_when_empty() {
        let connector = InMemoryConnector::new();
        let mut queue = connector.connect().await.unwrap();

        let started = Instant::now();
        let popped = queue.pop_blocking(KEY, Duration::from_secs(5)).await.unwrap();

        assert!(popped.is_none());
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_wakes_on_push() {
        let connector = InMemoryConnector::new();
        let mut consumer = connector.connect().await.unwrap();
        let producer = connector.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            producer.enqueue(KEY, "late");
        });

        let popped = consumer
            .pop_blocking(KEY, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(popped.unwrap().body, b"late");
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let connector = InMemoryConnector::new();
        connector.fail_next_connects(2);

        assert!(connector.connect().await.is_none());
        assert!(connector.connect().await.is_none());
        assert!(connector.connect().await.is_some());
        assert_eq!(connector.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_dropped_connection_stays_broken() {
        let connector = InMemoryConnector::new();
        connector.enqueue(KEY, "kept");
        connector.drop_next_pops(1);

        let mut queue = connector.connect().await.unwrap();
        let err = queue.pop_blocking(KEY, Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_connection_lost());
        let err = queue.pop_blocking(KEY, Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_connection_lost());

        // A fresh connection sees the message that was never popped
        let mut fresh = connector.connect().await.unwrap();
        let popped = fresh.pop_blocking(KEY, Duration::from_secs(1)).await.unwrap();
        assert_eq!(popped.unwrap().body, b"kept");
    }

    #[tokio::test]
    async fn test_command_failure_keeps_connection() {
        let connector = InMemoryConnector::new();
        connector.enqueue(KEY, "after");
        connector.fail_next_pops(1);

        let mut queue = connector.connect().await.unwrap();
        let err = queue.pop_blocking(KEY, Duration::from_secs(1)).await.unwrap_err();
        assert!(!err.is_connection_lost());

        let popped = queue.pop_blocking(KEY, Duration::from_secs(1)).await.unwrap();
        assert_eq!(popped.unwrap().body, b"after");
    }
}
