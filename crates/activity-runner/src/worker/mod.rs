//! Worker loops and the pool that runs them
//!
//! This module provides:
//! - [`WorkerPool`] - Verifies the queue, then runs N workers concurrently
//! - [`Worker`] - One poll → process → report loop
//! - [`ProcessingTimer`] - Times the processing function
//! - [`TaskProcessor`] - The caller-supplied processing function
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │   account_context → QueueIdentity → describe_queue (fatal)   │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌──────────┐ ┌──────────┐            ┌──────────┐          │
//! │  │ Worker 1 │ │ Worker 2 │    ...     │ Worker N │          │
//! │  └────┬─────┘ └──────────┘            └──────────┘          │
//! │       │                                                      │
//! │       ├─ get_task          (unbounded retry)                 │
//! │       ├─ ProcessingTimer   (TaskProcessor)                   │
//! │       └─ report_*          (bounded retry, then swallow)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod pool;
mod processor;
mod runner;
mod timer;

pub use pool::{RunningPool, WorkerPool, WorkerPoolConfig, WorkerPoolError, DEFAULT_WORKER_COUNT};
pub use processor::{FailureDescriptor, TaskOutcome, TaskProcessor, MAX_ERROR_SUMMARY_CHARS};
pub use runner::{Worker, WorkerStep};
pub use timer::ProcessingTimer;
