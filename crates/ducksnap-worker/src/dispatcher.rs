// Task dispatcher: the worker's consumption loop
//
// States: Connecting -> IdleWaiting <-> Processing
//                ^            |
//                +-- lost ----+
//
// - The first connect is fatal on failure; later reconnects retry forever
//   using the configured ReconnectPolicy.
// - One task is processed to completion before the next pop.
// - Malformed messages are dropped after logging.
// - Processor errors and panics are contained here; the loop always returns
//   to IdleWaiting.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::processor::TaskProcessor;
use crate::queue::{QueueConnector, QueueError, RawMessage, TaskQueue};
use crate::retry::ReconnectPolicy;
use crate::task::{Task, TaskError};

/// Longest result summary written to the log
const SUMMARY_CHARS: usize = 100;

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queue_key: String,
    pub poll_timeout: Duration,
    pub reconnect_policy: ReconnectPolicy,
    pub transient_error_pause: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for DispatcherConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            queue_key: config.queue_key.clone(),
            poll_timeout: config.poll_timeout,
            reconnect_policy: config.reconnect_policy(),
            transient_error_pause: config.transient_error_pause,
        }
    }
}

/// Logical state of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Connecting,
    IdleWaiting,
    Processing,
}

/// What a single loop step did
#[derive(Debug)]
pub enum PollOutcome {
    /// Pop timed out with nothing to do
    Idle,
    /// Processor returned a result
    Processed { user_id: i64 },
    /// Processor failed or panicked; the failure was logged
    Failed { user_id: i64, error: String },
    /// Message could not be turned into a task and was discarded
    Dropped(TaskError),
    /// Lost connection was rebuilt
    Reconnected,
    /// Reconnect attempt failed; still connecting
    ReconnectFailed,
    /// Non-connection queue error; paused and carried on
    TransientError,
}

/// Counters for what the loop has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub reconnects: u64,
}

/// Errors that stop the dispatcher
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("could not connect to the task queue at {0}")]
    StartupConnect(String),

    #[error("gave up reconnecting to the task queue after {0} attempts")]
    ReconnectExhausted(u32),

    #[error("dispatcher has not been started")]
    NotStarted,
}

/// Pops tasks one at a time and hands them to the processor
pub struct TaskDispatcher {
    connector: Arc<dyn QueueConnector>,
    processor: Arc<dyn TaskProcessor>,
    config: DispatcherConfig,
    queue: Option<Box<dyn TaskQueue>>,
    state: DispatcherState,
    started: bool,
    reconnect_attempt: u32,
    stats: DispatcherStats,
}

impl TaskDispatcher {
    pub fn new(
        connector: Arc<dyn QueueConnector>,
        processor: Arc<dyn TaskProcessor>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            connector,
            processor,
            config,
            queue: None,
            state: DispatcherState::Connecting,
            started: false,
            reconnect_attempt: 0,
            stats: DispatcherStats::default(),
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }

    /// Initial connect; failure here is fatal for the worker
    pub async fn start(&mut self) -> Result<(), DispatchError> {
        self.state = DispatcherState::Connecting;
        match self.connector.connect().await {
            Some(queue) => {
                self.queue = Some(queue);
                self.started = true;
                self.state = DispatcherState::IdleWaiting;
                info!(queue = %self.config.queue_key, "Listening for tasks");
                Ok(())
            }
            None => Err(DispatchError::StartupConnect(self.connector.endpoint())),
        }
    }

    /// Run until `shutdown` flips to true
    ///
    /// Shutdown is checked between steps, so an in-flight task always
    /// finishes first.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<(), DispatchError> {
        if !self.started {
            self.start().await?;
        }

        while !*shutdown.borrow() {
            self.poll_once().await?;
        }

        info!(stats = ?self.stats, "Dispatcher stopped");
        Ok(())
    }

    /// One step of the loop
    pub async fn poll_once(&mut self) -> Result<PollOutcome, DispatchError> {
        if !self.started {
            return Err(DispatchError::NotStarted);
        }

        let popped = match self.queue.as_mut() {
            Some(queue) => {
                queue
                    .pop_blocking(&self.config.queue_key, self.config.poll_timeout)
                    .await
            }
            None => return self.reconnect().await,
        };

        match popped {
            Ok(None) => Ok(PollOutcome::Idle),
            Ok(Some(message)) => Ok(self.handle_message(message).await),
            Err(QueueError::ConnectionLost(reason)) => {
                warn!(
                    error = %reason,
                    retry_in = ?self.config.reconnect_policy.delay_for_attempt(1),
                    "Queue connection lost, reconnecting"
                );
                self.queue = None;
                self.state = DispatcherState::Connecting;
                self.reconnect_attempt = 0;
                self.reconnect().await
            }
            Err(e @ QueueError::Command(_)) => {
                error!(error = %e, "Unexpected worker error");
                tokio::time::sleep(self.config.transient_error_pause).await;
                Ok(PollOutcome::TransientError)
            }
        }
    }

    async fn reconnect(&mut self) -> Result<PollOutcome, DispatchError> {
        let policy = &self.config.reconnect_policy;
        if !policy.has_attempts_remaining(self.reconnect_attempt) {
            return Err(DispatchError::ReconnectExhausted(self.reconnect_attempt));
        }

        self.reconnect_attempt += 1;
        let delay = policy.delay_for_attempt(self.reconnect_attempt);
        debug!(attempt = self.reconnect_attempt, ?delay, "Waiting before reconnect");
        tokio::time::sleep(delay).await;

        match self.connector.connect().await {
            Some(queue) => {
                info!(attempt = self.reconnect_attempt, "Reconnected to task queue");
                self.queue = Some(queue);
                self.state = DispatcherState::IdleWaiting;
                self.reconnect_attempt = 0;
                self.stats.reconnects += 1;
                Ok(PollOutcome::Reconnected)
            }
            None => {
                warn!(attempt = self.reconnect_attempt, "Reconnect failed, will retry");
                Ok(PollOutcome::ReconnectFailed)
            }
        }
    }

    async fn handle_message(&mut self, message: RawMessage) -> PollOutcome {
        self.state = DispatcherState::Processing;
        let outcome = self.process_message(message).await;
        self.state = DispatcherState::IdleWaiting;

        match &outcome {
            PollOutcome::Processed { .. } => self.stats.processed += 1,
            PollOutcome::Failed { .. } => self.stats.failed += 1,
            PollOutcome::Dropped(_) => self.stats.dropped += 1,
            _ => {}
        }
        outcome
    }

    async fn process_message(&self, message: RawMessage) -> PollOutcome {
        let delivery_id = Uuid::now_v7();
        info!(%delivery_id, queue = %message.queue, body = %message.body_text(), "Received task");

        let task = match Task::parse(&message.body) {
            Ok(task) => task,
            Err(e) => {
                match &e {
                    TaskError::MissingSubjectId => {
                        warn!(%delivery_id, "Received task with no userId")
                    }
                    _ => error!(
                        %delivery_id,
                        error = %e,
                        body = %message.body_text(),
                        "Failed to decode task"
                    ),
                }
                return PollOutcome::Dropped(e);
            }
        };

        let span = info_span!("task", %delivery_id, user_id = task.user_id);
        run_processor(self.processor.as_ref(), &task)
            .instrument(span)
            .await
    }
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicTrace>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Where a processor panic happened, recorded by the panic hook
struct PanicTrace {
    location: String,
    backtrace: Backtrace,
}

/// Chain a panic hook that records location and backtrace for the
/// panicking thread, so the boundary can log them after `catch_unwind`
fn record_panic_traces() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = PanicTrace {
                location: info
                    .location()
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "unknown location".to_string()),
                backtrace: Backtrace::force_capture(),
            };
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

fn take_panic_trace() -> Option<PanicTrace> {
    LAST_PANIC.with(|slot| slot.borrow_mut().take())
}

/// Processing boundary: nothing the processor does escapes as an error
async fn run_processor(processor: &dyn TaskProcessor, task: &Task) -> PollOutcome {
    record_panic_traces();
    take_panic_trace();
    let user_id = task.user_id;
    info!(user_id, "Starting processor");

    match AssertUnwindSafe(processor.process(task)).catch_unwind().await {
        Ok(Ok(result)) => {
            info!(user_id, summary = %summarize(&result), "Task completed");
            PollOutcome::Processed { user_id }
        }
        Ok(Err(e)) => {
            let e = anyhow::Error::new(e);
            let error_chain: Vec<String> = e.chain().map(|err| err.to_string()).collect();
            error!(
                user_id,
                error = %e,
                error_chain = ?error_chain,
                trace = ?e,
                "Error processing task"
            );
            PollOutcome::Failed {
                user_id,
                error: format!("{:#}", e),
            }
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            match take_panic_trace() {
                Some(trace) => {
                    error!(
                        user_id,
                        panic = %message,
                        location = %trace.location,
                        backtrace = %trace.backtrace,
                        "Processor panicked"
                    );
                    PollOutcome::Failed {
                        user_id,
                        error: format!("panic at {}: {}", trace.location, message),
                    }
                }
                None => {
                    error!(user_id, panic = %message, "Processor panicked");
                    PollOutcome::Failed {
                        user_id,
                        error: format!("panic: {}", message),
                    }
                }
            }
        }
    }
}

/// First characters of the serialized result
fn summarize(result: &Value) -> String {
    let text = result.to_string();
    if text.chars().count() <= SUMMARY_CHARS {
        return text;
    }
    let mut short: String = text.chars().take(SUMMARY_CHARS).collect();
    short.push_str("...");
    short
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
