//! Task-queue service abstraction
//!
//! This module provides:
//! - [`QueueService`] - The client interface the harness polls and reports through
//! - [`InMemoryQueueService`] - In-process implementation for tests and local runs

mod memory;
mod service;

pub use memory::{InMemoryQueueService, ReportedOutcome};
pub use service::{
    AccountContext, ActivityTask, QueueError, QueueIdentity, QueueService, WorkerIdentity,
};
