//! In-memory implementation of QueueService for testing

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use super::service::*;

/// A result reported back to the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedOutcome {
    Success {
        task_token: String,
        output: String,
    },
    Failure {
        task_token: String,
        cause: String,
        error: String,
    },
}

impl ReportedOutcome {
    pub fn task_token(&self) -> &str {
        match self {
            Self::Success { task_token, .. } | Self::Failure { task_token, .. } => task_token,
        }
    }
}

/// Internal task state while a worker holds it
struct InFlight {
    queue: QueueIdentity,
    worker: WorkerIdentity,
}

#[derive(Default)]
struct QueueState {
    queues: HashMap<QueueIdentity, VecDeque<ActivityTask>>,
    in_flight: HashMap<String, InFlight>,
    reported: Vec<ReportedOutcome>,
    pollers: HashSet<WorkerIdentity>,
    get_task_calls: usize,
    report_calls: usize,
    fail_gets: u32,
    fail_reports: u32,
}

/// In-memory implementation of QueueService
///
/// Provides the semantics the harness relies on: blocking long polls that
/// hand each task to exactly one worker, token-checked reporting, and
/// injectable transient failures.
///
/// # Example
///
/// ```
/// use activity_runner::InMemoryQueueService;
///
/// let service = InMemoryQueueService::new("123456789012", "eu-west-1");
/// let queue = service.create_queue("resize-images");
/// service.push_task(&queue, r#"{"x":1}"#);
/// assert_eq!(service.pending_task_count(&queue), 1);
/// ```
pub struct InMemoryQueueService {
    context: AccountContext,
    poll_timeout: Duration,
    state: Mutex<QueueState>,
    task_available: Notify,
}

impl InMemoryQueueService {
    /// Create a service bound to the given account and region
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            context: AccountContext {
                account_id: account_id.into(),
                region: region.into(),
            },
            poll_timeout: Duration::from_secs(60),
            state: Mutex::new(QueueState::default()),
            task_available: Notify::new(),
        }
    }

    /// Set how long an empty poll blocks before returning no task
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Create a queue for `task_name` and return its identity
    pub fn create_queue(&self, task_name: &str) -> QueueIdentity {
        let queue = QueueIdentity::resolve(task_name, &self.context);
        self.state.lock().queues.entry(queue.clone()).or_default();
        queue
    }

    /// Enqueue a task and return its token
    pub fn push_task(&self, queue: &QueueIdentity, input: impl Into<String>) -> String {
        let token = Uuid::now_v7().to_string();
        self.push_raw(queue, ActivityTask::new(token.clone(), input));
        token
    }

    /// Enqueue a poll response as-is, including ones without token or input
    pub fn push_raw(&self, queue: &QueueIdentity, task: ActivityTask) {
        self.state
            .lock()
            .queues
            .entry(queue.clone())
            .or_default()
            .push_back(task);
        self.task_available.notify_one();
    }

    /// Make the next `count` calls to `get_task` fail as unreachable
    pub fn fail_next_gets(&self, count: u32) {
        self.state.lock().fail_gets = count;
    }

    /// Make the next `count` report calls fail as unreachable
    pub fn fail_reports(&self, count: u32) {
        self.state.lock().fail_reports = count;
    }

    /// Number of tasks waiting to be polled
    pub fn pending_task_count(&self, queue: &QueueIdentity) -> usize {
        self.state.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Number of tasks handed out but not yet reported
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Worker that currently holds `task_token`
    pub fn holder_of(&self, task_token: &str) -> Option<WorkerIdentity> {
        self.state
            .lock()
            .in_flight
            .get(task_token)
            .map(|t| t.worker.clone())
    }

    /// Distinct worker identities that have polled so far
    pub fn distinct_pollers(&self) -> usize {
        self.state.lock().pollers.len()
    }

    /// Total `get_task` calls, failed ones included
    pub fn get_task_calls(&self) -> usize {
        self.state.lock().get_task_calls
    }

    /// Total report calls, failed ones included
    pub fn report_calls(&self) -> usize {
        self.state.lock().report_calls
    }

    /// Outcomes accepted so far, in order
    pub fn reported(&self) -> Vec<ReportedOutcome> {
        self.state.lock().reported.clone()
    }

    fn take_task(&self, queue: &QueueIdentity, worker: &WorkerIdentity) -> Option<ActivityTask> {
        let mut state = self.state.lock();
        let task = state.queues.get_mut(queue)?.pop_front()?;
        if let Some(token) = &task.task_token {
            state.in_flight.insert(
                token.clone(),
                InFlight {
                    queue: queue.clone(),
                    worker: worker.clone(),
                },
            );
        }
        Some(task)
    }

    fn begin_report(&self, task_token: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        state.report_calls += 1;
        if state.fail_reports > 0 {
            state.fail_reports -= 1;
            return Err(QueueError::Unreachable("injected report failure".to_string()));
        }
        if !state.in_flight.contains_key(task_token) {
            return Err(QueueError::InvalidToken(task_token.to_string()));
        }
        Ok(())
    }

    fn finish_report(&self, outcome: ReportedOutcome) {
        let mut state = self.state.lock();
        if let Some(task) = state.in_flight.remove(outcome.task_token()) {
            tracing::trace!(queue = %task.queue, worker = %task.worker, "Task reported");
        }
        state.reported.push(outcome);
    }
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn account_context(&self) -> Result<AccountContext, QueueError> {
        Ok(self.context.clone())
    }

    async fn describe_queue(&self, queue: &QueueIdentity) -> Result<(), QueueError> {
        if self.state.lock().queues.contains_key(queue) {
            Ok(())
        } else {
            Err(QueueError::NotFound(queue.to_string()))
        }
    }

    async fn get_task(
        &self,
        queue: &QueueIdentity,
        worker: &WorkerIdentity,
    ) -> Result<ActivityTask, QueueError> {
        {
            let mut state = self.state.lock();
            state.get_task_calls += 1;
            state.pollers.insert(worker.clone());
            if state.fail_gets > 0 {
                state.fail_gets -= 1;
                return Err(QueueError::Unreachable("injected poll failure".to_string()));
            }
            if !state.queues.contains_key(queue) {
                return Err(QueueError::NotFound(queue.to_string()));
            }
        }

        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            if let Some(task) = self.take_task(queue, worker) {
                return Ok(task);
            }
            if tokio::time::timeout_at(deadline, self.task_available.notified())
                .await
                .is_err()
            {
                return Ok(ActivityTask::empty());
            }
        }
    }

    async fn report_success(&self, task_token: &str, output: &str) -> Result<(), QueueError> {
        self.begin_report(task_token)?;
        self.finish_report(ReportedOutcome::Success {
            task_token: task_token.to_string(),
            output: output.to_string(),
        });
        Ok(())
    }

    async fn report_failure(
        &self,
        task_token: &str,
        cause: &str,
        error: &str,
    ) -> Result<(), QueueError> {
        self.begin_report(task_token)?;
        self.finish_report(ReportedOutcome::Failure {
            task_token: task_token.to_string(),
            cause: cause.to_string(),
            error: error.to_string(),
        });
        Ok(())
    }
}
