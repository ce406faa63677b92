//! QueueService trait definition

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error type for queue operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue (activity) does not exist
    #[error("queue not found: {0}")]
    NotFound(String),

    /// The service could not be reached or returned a transient error
    #[error("queue service unreachable: {0}")]
    Unreachable(String),

    /// The task token is unknown or already reported
    #[error("invalid task token: {0}")]
    InvalidToken(String),
}

/// Account and region the queue client is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContext {
    pub account_id: String,
    pub region: String,
}

/// Fully qualified name of the queue a pool serves
///
/// Resolved once at startup and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueIdentity(String);

impl QueueIdentity {
    /// Build the activity ARN for `task_name` in the given account/region.
    pub fn resolve(task_name: &str, context: &AccountContext) -> Self {
        Self(format!(
            "arn:aws:states:{}:{}:activity:{}",
            context.region, context.account_id, task_name
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one poll loop to the queue service
///
/// Only used for the service's visibility/ownership bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub host: String,
    /// 1-based position of the loop within its pool
    pub index: usize,
}

impl WorkerIdentity {
    pub fn new(host: impl Into<String>, index: usize) -> Self {
        Self {
            host: host.into(),
            index,
        }
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-coroutine-{}", self.host, self.index)
    }
}

/// Response of a long poll
///
/// Either field may be absent, which means no task was available before the
/// poll timed out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTask {
    pub task_token: Option<String>,
    pub input: Option<String>,
}

impl ActivityTask {
    pub fn new(task_token: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            task_token: Some(task_token.into()),
            input: Some(input.into()),
        }
    }

    /// An empty poll result
    pub fn empty() -> Self {
        Self::default()
    }

    /// Token and input, if both are present
    pub fn claimed(&self) -> Option<(&str, &str)> {
        match (&self.task_token, &self.input) {
            (Some(token), Some(input)) if !token.is_empty() && !input.is_empty() => {
                Some((token.as_str(), input.as_str()))
            }
            _ => None,
        }
    }
}

/// Client for the external task-queue service
///
/// Implementations must be safe to call from many worker loops at once.
/// Polling and reporting may be repeated by the retry layer, so they must
/// tolerate redundant invocation.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Account and region this client talks to
    async fn account_context(&self) -> Result<AccountContext, QueueError>;

    /// Check that the queue exists
    async fn describe_queue(&self, queue: &QueueIdentity) -> Result<(), QueueError>;

    /// Long-poll for the next task
    async fn get_task(
        &self,
        queue: &QueueIdentity,
        worker: &WorkerIdentity,
    ) -> Result<ActivityTask, QueueError>;

    /// Report a successful result; `output` is serialized JSON
    async fn report_success(&self, task_token: &str, output: &str) -> Result<(), QueueError>;

    /// Report a failed task
    async fn report_failure(
        &self,
        task_token: &str,
        cause: &str,
        error: &str,
    ) -> Result<(), QueueError>;
}
