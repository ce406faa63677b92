//! # Activity Runner
//!
//! A worker harness for long-poll task queues. Callers supply a processing
//! function; the harness polls, fans out, times, reports and retries.
//!
//! ## Features
//!
//! - **Worker pool**: N independent long-poll loops on the Tokio runtime
//! - **Two retry regimes**: polling retries forever, reporting retries 20 times and then gives up quietly
//! - **Failure capture**: processor errors become failure reports with a capped summary
//! - **Observer hooks**: every lifecycle event goes through a pluggable [`WorkerObserver`]
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use activity_runner::prelude::*;
//! use serde_json::{json, Value};
//!
//! let config = RunnerConfig::from_env()?;
//! let pool = WorkerPool::new(Arc::new(client), config.pool_config());
//!
//! pool.run(|input: Value| async move {
//!     Ok::<_, anyhow::Error>(json!({ "seen": input }))
//! })
//! .await?;
//! ```

pub mod config;
pub mod observer;
pub mod queue;
pub mod reliability;
pub mod telemetry;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, RunnerConfig};
    pub use crate::observer::{TracingObserver, WorkerObserver};
    pub use crate::queue::{
        AccountContext, ActivityTask, QueueError, QueueIdentity, QueueService, WorkerIdentity,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::worker::{TaskProcessor, WorkerPool, WorkerPoolConfig, WorkerPoolError};
}

// Re-export key types at crate root
pub use config::{ConfigError, RunnerConfig};
pub use observer::{
    CompositeObserver, NoopObserver, ObservedEvent, RecordingObserver, TracingObserver,
    WorkerObserver,
};
pub use queue::{
    AccountContext, ActivityTask, InMemoryQueueService, QueueError, QueueIdentity, QueueService,
    ReportedOutcome, WorkerIdentity,
};
pub use reliability::RetryPolicy;
pub use worker::{
    FailureDescriptor, ProcessingTimer, RunningPool, TaskOutcome, TaskProcessor, Worker,
    WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerStep,
};
