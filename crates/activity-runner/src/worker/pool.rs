//! Worker pool
//!
//! Verifies the queue once, then fans out into independent worker loops.

use std::convert::Infallible;
use std::sync::Arc;

use futures::future::select_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, instrument, Instrument};

use super::processor::TaskProcessor;
use super::runner::Worker;
use crate::observer::{TracingObserver, WorkerObserver};
use crate::queue::{QueueError, QueueIdentity, QueueService, WorkerIdentity};
use crate::reliability::RetryPolicy;

/// Default number of concurrent worker loops
pub const DEFAULT_WORKER_COUNT: usize = 10;

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfig {
    /// Task (activity) name the pool serves
    pub task_name: String,

    /// Number of concurrent worker loops
    pub worker_count: usize,

    /// Host part of every worker identity
    pub host: String,

    /// Retry policy around polling
    pub poll_policy: RetryPolicy,

    /// Retry policy around result reporting
    pub report_policy: RetryPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            task_name: String::new(),
            worker_count: DEFAULT_WORKER_COUNT,
            host: local_host_name(),
            poll_policy: RetryPolicy::unbounded(),
            report_policy: RetryPolicy::bounded_then_swallow(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a new worker pool configuration
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            ..Default::default()
        }
    }

    /// Set the number of worker loops (at least 1)
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Set the host name used in worker identities
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the polling retry policy
    pub fn with_poll_policy(mut self, policy: RetryPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    /// Set the reporting retry policy
    pub fn with_report_policy(mut self, policy: RetryPolicy) -> Self {
        self.report_policy = policy;
        self
    }
}

fn local_host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Worker pool errors
///
/// All of them are fatal; steady-state failures never leave a worker loop.
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// The account/region context could not be resolved
    #[error("failed to resolve queue account context: {0}")]
    AccountContext(#[source] QueueError),

    /// The queue does not exist or could not be described
    #[error("queue {queue} is unavailable: {source}")]
    QueueUnavailable {
        queue: QueueIdentity,
        #[source]
        source: QueueError,
    },

    /// A worker loop panicked
    #[error("worker loop terminated: {0}")]
    WorkerPanicked(String),
}

/// Pool of independent long-poll loops
///
/// # Example
///
/// ```ignore
/// use activity_runner::{WorkerPool, WorkerPoolConfig};
///
/// let config = WorkerPoolConfig::new("resize-images").with_worker_count(4);
/// let pool = WorkerPool::new(service, config);
///
/// // Only returns if startup fails
/// let err = pool.run(|input: Value| async move { resize(input).await }).await;
/// ```
pub struct WorkerPool {
    service: Arc<dyn QueueService>,
    config: WorkerPoolConfig,
    observer: Arc<dyn WorkerObserver>,
}

impl WorkerPool {
    /// Create a new worker pool
    pub fn new(service: Arc<dyn QueueService>, config: WorkerPoolConfig) -> Self {
        Self {
            service,
            config,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the default tracing observer
    pub fn with_observer(mut self, observer: Arc<dyn WorkerObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Resolve the queue identity and check that the queue exists
    pub async fn resolve_queue(&self) -> Result<QueueIdentity, WorkerPoolError> {
        let context = self
            .service
            .account_context()
            .await
            .map_err(WorkerPoolError::AccountContext)?;
        let queue = QueueIdentity::resolve(&self.config.task_name, &context);

        self.service
            .describe_queue(&queue)
            .await
            .map_err(|source| WorkerPoolError::QueueUnavailable {
                queue: queue.clone(),
                source,
            })?;

        Ok(queue)
    }

    /// Verify the queue and spawn the worker loops without awaiting them
    #[instrument(skip(self, processor), fields(task_name = %self.config.task_name))]
    pub async fn start(
        &self,
        processor: impl TaskProcessor,
    ) -> Result<RunningPool, WorkerPoolError> {
        let queue = self.resolve_queue().await?;
        let worker_count = self.config.worker_count.max(1);

        info!(
            queue = %queue,
            worker_count,
            host = %self.config.host,
            "Starting worker pool"
        );

        let processor: Arc<dyn TaskProcessor> = Arc::new(processor);
        let handles = (1..=worker_count)
            .map(|index| {
                let identity = WorkerIdentity::new(self.config.host.clone(), index);
                let span = info_span!("worker", worker = %identity);
                let worker = Worker::new(
                    identity,
                    queue.clone(),
                    Arc::clone(&self.service),
                    Arc::clone(&processor),
                    Arc::clone(&self.observer),
                )
                .with_poll_policy(self.config.poll_policy.clone())
                .with_report_policy(self.config.report_policy.clone());

                tokio::spawn(worker.run().instrument(span))
            })
            .collect();

        Ok(RunningPool { queue, handles })
    }

    /// Verify the queue and run the worker loops forever
    ///
    /// Only returns on a fatal error.
    pub async fn run(
        &self,
        processor: impl TaskProcessor,
    ) -> Result<Infallible, WorkerPoolError> {
        self.start(processor).await?.join().await
    }
}

/// Handles to the worker loops of a started pool
pub struct RunningPool {
    queue: QueueIdentity,
    handles: Vec<JoinHandle<Infallible>>,
}

impl RunningPool {
    pub fn queue(&self) -> &QueueIdentity {
        &self.queue
    }

    /// Number of worker loops spawned
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Number of worker loops still running
    pub fn active_workers(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Abort every worker loop, dropping any in-flight task
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }

    /// Wait on the worker loops; returns as soon as one of them dies
    pub async fn join(self) -> Result<Infallible, WorkerPoolError> {
        let (result, index, _rest) = select_all(self.handles).await;
        let reason = match result {
            Ok(never) => match never {},
            Err(e) if e.is_panic() => format!("worker {} panicked", index + 1),
            Err(e) => format!("worker {}: {e}", index + 1),
        };
        error!(queue = %self.queue, reason = %reason, "Worker loop terminated");
        Err(WorkerPoolError::WorkerPanicked(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueueService;

    #[test]
    fn test_default_config() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.worker_count, 10);
        assert!(!config.host.is_empty());
        assert_eq!(config.poll_policy, RetryPolicy::unbounded());
        assert_eq!(config.report_policy, RetryPolicy::bounded_then_swallow());
    }

    #[test]
    fn test_config_builder() {
        let config = WorkerPoolConfig::new("resize-images")
            .with_worker_count(0)
            .with_host("build-01");

        assert_eq!(config.task_name, "resize-images");
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.host, "build-01");
    }

    #[tokio::test]
    async fn test_missing_queue_is_fatal() {
        let service = Arc::new(InMemoryQueueService::new("123456789012", "eu-west-1"));
        let pool = WorkerPool::new(service, WorkerPoolConfig::new("missing"));

        let err = pool
            .start(|_: serde_json::Value| async { Ok::<_, anyhow::Error>(serde_json::Value::Null) })
            .await
            .err()
            .unwrap();

        match err {
            WorkerPoolError::QueueUnavailable { queue, source } => {
                assert_eq!(
                    queue.as_str(),
                    "arn:aws:states:eu-west-1:123456789012:activity:missing"
                );
                assert!(matches!(source, QueueError::NotFound(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
