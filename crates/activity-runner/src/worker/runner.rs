//! One long-poll loop: poll → process → report, forever

use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use super::processor::{TaskOutcome, TaskProcessor};
use super::timer::ProcessingTimer;
use crate::observer::WorkerObserver;
use crate::queue::{QueueIdentity, QueueService, WorkerIdentity};
use crate::reliability::RetryPolicy;

/// What one iteration of a worker loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStep {
    /// The poll returned no task
    Idle,
    /// The processor succeeded and the success report was attempted
    Succeeded,
    /// Decoding or processing failed and the failure report was attempted
    Failed,
}

/// A single worker loop
///
/// Workers share nothing mutable: the queue client, the processor and the
/// observer are shared read-only through `Arc`s.
pub struct Worker {
    identity: WorkerIdentity,
    queue: QueueIdentity,
    service: Arc<dyn QueueService>,
    processor: Arc<dyn TaskProcessor>,
    observer: Arc<dyn WorkerObserver>,
    poll_policy: RetryPolicy,
    report_policy: RetryPolicy,
}

impl Worker {
    pub fn new(
        identity: WorkerIdentity,
        queue: QueueIdentity,
        service: Arc<dyn QueueService>,
        processor: Arc<dyn TaskProcessor>,
        observer: Arc<dyn WorkerObserver>,
    ) -> Self {
        Self {
            identity,
            queue,
            service,
            processor,
            observer,
            poll_policy: RetryPolicy::unbounded(),
            report_policy: RetryPolicy::bounded_then_swallow(),
        }
    }

    /// Set the policy wrapping `get_task`; its attempt ceiling is ignored
    pub fn with_poll_policy(mut self, policy: RetryPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    /// Set the policy wrapping result reporting
    pub fn with_report_policy(mut self, policy: RetryPolicy) -> Self {
        self.report_policy = policy;
        self
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Run the loop until the process ends
    pub async fn run(self) -> Infallible {
        self.observer.worker_started(&self.identity, &self.queue);
        loop {
            self.run_once().await;
        }
    }

    /// Run exactly one poll → process → report iteration
    pub async fn run_once(&self) -> WorkerStep {
        let task = self
            .poll_policy
            .retry_forever("get_task", self.observer.as_ref(), || {
                self.service.get_task(&self.queue, &self.identity)
            })
            .await;

        let Some((token, input)) = task.claimed() else {
            debug!(worker = %self.identity, "No task available, polling again");
            return WorkerStep::Idle;
        };

        self.observer.task_received(&self.identity, input);

        let outcome = match self.process(input).await {
            Ok(value) => TaskOutcome::success(value),
            Err(err) => {
                self.observer.processing_failed(&self.identity, &err);
                TaskOutcome::failure(&err)
            }
        };

        self.report(token, &outcome).await;

        if outcome.is_success() {
            WorkerStep::Succeeded
        } else {
            WorkerStep::Failed
        }
    }

    /// Decode and process; a panicking processor counts as a failed task
    async fn process(&self, input: &str) -> anyhow::Result<Value> {
        let input: Value = serde_json::from_str(input)?;
        let timer = ProcessingTimer::new(&self.identity, self.observer.as_ref());
        AssertUnwindSafe(timer.run(self.processor.as_ref(), input))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(anyhow!("processor panicked: {}", panic_message(&*payload)))
            })
    }

    /// Report `outcome`; a report that keeps failing is dropped
    async fn report(&self, token: &str, outcome: &TaskOutcome) {
        let observer = self.observer.as_ref();
        match outcome {
            TaskOutcome::Success(value) => {
                let output = value.to_string();
                self.report_policy
                    .retry_else_swallow("report_success", observer, || {
                        self.service.report_success(token, &output)
                    })
                    .await;
            }
            TaskOutcome::Failure(failure) => {
                self.report_policy
                    .retry_else_swallow("report_failure", observer, || {
                        self.service
                            .report_failure(token, &failure.cause, &failure.error)
                    })
                    .await;
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{ObservedEvent, RecordingObserver};
    use crate::queue::{ActivityTask, InMemoryQueueService, ReportedOutcome};
    use serde_json::json;

    struct Fixture {
        service: Arc<InMemoryQueueService>,
        observer: Arc<RecordingObserver>,
        queue: QueueIdentity,
    }

    impl Fixture {
        fn new() -> Self {
            let service = InMemoryQueueService::new("123456789012", "eu-west-1");
            let queue = service.create_queue("test");
            Self {
                service: Arc::new(service),
                observer: Arc::new(RecordingObserver::new()),
                queue,
            }
        }

        fn worker(&self, processor: impl TaskProcessor) -> Worker {
            Worker::new(
                WorkerIdentity::new("host", 1),
                self.queue.clone(),
                self.service.clone(),
                Arc::new(processor),
                self.observer.clone(),
            )
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_reported() {
        let fx = Fixture::new();
        let token = fx.service.push_task(&fx.queue, r#"{"x":1}"#);
        let worker = fx.worker(|input: Value| async move {
            assert_eq!(input, json!({"x": 1}));
            Ok::<_, anyhow::Error>(json!({"y": 2}))
        });

        assert_eq!(worker.run_once().await, WorkerStep::Succeeded);
        assert_eq!(
            fx.service.reported(),
            vec![ReportedOutcome::Success {
                task_token: token,
                output: r#"{"y":2}"#.to_string(),
            }]
        );
        assert_eq!(
            fx.observer
                .count(|e| matches!(e, ObservedEvent::ProcessingComplete { .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_output_reported_as_empty_object() {
        let fx = Fixture::new();
        fx.service.push_task(&fx.queue, "{}");
        let worker = fx.worker(|_: Value| async { Ok::<_, anyhow::Error>(Value::Null) });

        worker.run_once().await;

        match &fx.service.reported()[..] {
            [ReportedOutcome::Success { output, .. }] => assert_eq!(output, "{}"),
            other => panic!("unexpected reports: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_processor_error_is_reported_as_failure() {
        let fx = Fixture::new();
        let token = fx.service.push_task(&fx.queue, "{}");
        let worker =
            fx.worker(|_: Value| async { Err::<Value, _>(anyhow::anyhow!("Error: boom")) });

        assert_eq!(worker.run_once().await, WorkerStep::Failed);

        match &fx.service.reported()[..] {
            [ReportedOutcome::Failure {
                task_token,
                cause,
                error,
            }] => {
                assert_eq!(task_token, &token);
                assert_eq!(error, "Error: boom");
                assert!(cause.starts_with("Error: boom"));
            }
            other => panic!("unexpected reports: {other:?}"),
        }
        assert_eq!(
            fx.observer
                .count(|e| matches!(e, ObservedEvent::ProcessingComplete { .. })),
            0
        );
        assert_eq!(
            fx.observer
                .count(|e| matches!(e, ObservedEvent::ProcessingFailed { .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_json_input_is_a_task_failure() {
        let fx = Fixture::new();
        fx.service.push_task(&fx.queue, "not json");
        let worker = fx.worker(|_: Value| async { Ok::<_, anyhow::Error>(json!({})) });

        assert_eq!(worker.run_once().await, WorkerStep::Failed);
        assert!(matches!(
            &fx.service.reported()[..],
            [ReportedOutcome::Failure { .. }]
        ));
        assert_eq!(
            fx.observer
                .count(|e| matches!(e, ObservedEvent::ProcessingComplete { .. })),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_processor_is_a_task_failure() {
        let fx = Fixture::new();
        fx.service.push_task(&fx.queue, "{}");
        let worker = fx.worker(|_: Value| async {
            if true {
                panic!("kaboom");
            }
            Ok::<_, anyhow::Error>(Value::Null)
        });

        assert_eq!(worker.run_once().await, WorkerStep::Failed);
        match &fx.service.reported()[..] {
            [ReportedOutcome::Failure { error, .. }] => {
                assert_eq!(error, "processor panicked: kaboom")
            }
            other => panic!("unexpected reports: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_poll_reports_nothing() {
        let fx = Fixture::new();
        fx.service.push_raw(&fx.queue, ActivityTask::empty());
        fx.service.push_raw(
            &fx.queue,
            ActivityTask {
                task_token: Some("t1".to_string()),
                input: None,
            },
        );
        let worker = fx.worker(|_: Value| async { Ok::<_, anyhow::Error>(Value::Null) });

        assert_eq!(worker.run_once().await, WorkerStep::Idle);
        assert_eq!(worker.run_once().await, WorkerStep::Idle);
        assert!(fx.service.reported().is_empty());
        assert_eq!(fx.service.report_calls(), 0);
        assert!(fx.observer.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failures_are_retried() {
        let fx = Fixture::new();
        let token = fx.service.push_task(&fx.queue, "{}");
        fx.service.fail_next_gets(3);
        let worker = fx.worker(|_: Value| async { Ok::<_, anyhow::Error>(json!({})) });

        assert_eq!(worker.run_once().await, WorkerStep::Succeeded);
        assert_eq!(fx.service.get_task_calls(), 4);
        assert_eq!(fx.service.reported()[0].task_token(), token);
    }

    #[tokio::test(start_paused = true)]
    async fn test_swallowed_report_does_not_stop_the_loop() {
        let fx = Fixture::new();
        fx.service.push_task(&fx.queue, "{}");
        let second = fx.service.push_task(&fx.queue, "{}");
        fx.service.fail_reports(21);
        let worker =
            fx.worker(|_: Value| async { Err::<Value, _>(anyhow::anyhow!("Error: boom")) });

        assert_eq!(worker.run_once().await, WorkerStep::Failed);
        assert_eq!(fx.service.report_calls(), 21);
        assert!(fx.service.reported().is_empty());
        assert_eq!(
            fx.observer
                .count(|e| matches!(e, ObservedEvent::RetrySwallowed { .. })),
            1
        );

        assert_eq!(worker.run_once().await, WorkerStep::Failed);
        assert_eq!(fx.service.reported()[0].task_token(), second);
    }
}
