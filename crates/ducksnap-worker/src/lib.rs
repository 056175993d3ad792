pub mod config;
pub mod dispatcher;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod task;

// Re-export main types
pub use config::WorkerConfig;
pub use dispatcher::{
    DispatchError, DispatcherConfig, DispatcherState, DispatcherStats, PollOutcome,
    TaskDispatcher,
};
pub use processor::{ProcessError, SubjectSyncProcessor, TaskProcessor};
pub use queue::{QueueConnector, QueueError, RawMessage, RedisConnector, TaskQueue};
pub use retry::ReconnectPolicy;
pub use task::{Task, TaskError};
