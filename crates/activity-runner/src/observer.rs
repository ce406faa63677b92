// Worker Observers
//
// The harness reports everything it does through the WorkerObserver trait.
// The default observer writes structured `tracing` events; tests swap in a
// recording observer to assert on what was emitted.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::queue::{QueueIdentity, WorkerIdentity};

// ============================================================================
// WorkerObserver Trait
// ============================================================================

/// Sink for the lifecycle events of the worker harness.
///
/// Observers are called inline from the worker loops and must be cheap.
/// Nothing an observer does affects the outcome of a task.
pub trait WorkerObserver: Send + Sync {
    /// A worker loop started and is about to poll `queue`.
    fn worker_started(&self, worker: &WorkerIdentity, queue: &QueueIdentity);

    /// A worker received a task carrying `input`.
    fn task_received(&self, worker: &WorkerIdentity, input: &str);

    /// The processing function returned successfully after `elapsed`.
    fn processing_complete(&self, worker: &WorkerIdentity, elapsed: Duration);

    /// The processing function (or input decoding) failed.
    fn processing_failed(&self, worker: &WorkerIdentity, error: &anyhow::Error);

    /// Attempt `attempt` of `op` failed; the next attempt runs after `delay`.
    fn retry_attempt(&self, op: &str, attempt: u32, delay: Duration, error: &dyn fmt::Display);

    /// All attempts of `op` failed and the last error is being discarded.
    fn retry_swallowed(&self, op: &str, attempts: u32, error: &dyn fmt::Display);

    /// Human-readable name for logging/debugging.
    fn name(&self) -> &'static str {
        "WorkerObserver"
    }
}

// ============================================================================
// TracingObserver
// ============================================================================

/// Default observer: emits `tracing` events.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver;

impl WorkerObserver for TracingObserver {
    fn worker_started(&self, worker: &WorkerIdentity, queue: &QueueIdentity) {
        info!(worker = %worker, queue = %queue, "Awaiting activity task");
    }

    fn task_received(&self, worker: &WorkerIdentity, input: &str) {
        info!(worker = %worker, input = %input, "Got activity task");
    }

    fn processing_complete(&self, worker: &WorkerIdentity, elapsed: Duration) {
        info!(
            worker = %worker,
            elapsed_secs = elapsed.as_secs_f64(),
            "Processing complete"
        );
    }

    fn processing_failed(&self, worker: &WorkerIdentity, error: &anyhow::Error) {
        error!(worker = %worker, error = %format!("{error:#}"), "Processing failed");
    }

    fn retry_attempt(&self, op: &str, attempt: u32, delay: Duration, error: &dyn fmt::Display) {
        warn!(
            op,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Operation failed (will retry)"
        );
    }

    fn retry_swallowed(&self, op: &str, attempts: u32, error: &dyn fmt::Display) {
        error!(op, attempts, error = %error, "Operation failed (swallowed)");
    }

    fn name(&self) -> &'static str {
        "TracingObserver"
    }
}

// ============================================================================
// NoopObserver
// ============================================================================

/// Observer that discards every event.
#[derive(Debug, Clone, Default)]
pub struct NoopObserver;

impl WorkerObserver for NoopObserver {
    fn worker_started(&self, _worker: &WorkerIdentity, _queue: &QueueIdentity) {}
    fn task_received(&self, _worker: &WorkerIdentity, _input: &str) {}
    fn processing_complete(&self, _worker: &WorkerIdentity, _elapsed: Duration) {}
    fn processing_failed(&self, _worker: &WorkerIdentity, _error: &anyhow::Error) {}
    fn retry_attempt(&self, _op: &str, _attempt: u32, _delay: Duration, _error: &dyn fmt::Display) {
    }
    fn retry_swallowed(&self, _op: &str, _attempts: u32, _error: &dyn fmt::Display) {}

    fn name(&self) -> &'static str {
        "NoopObserver"
    }
}

// ============================================================================
// CompositeObserver
// ============================================================================

/// Forwards every event to each inner observer, in order.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn WorkerObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn WorkerObserver>>) -> Self {
        Self { observers }
    }

    pub fn add(&mut self, observer: Arc<dyn WorkerObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl WorkerObserver for CompositeObserver {
    fn worker_started(&self, worker: &WorkerIdentity, queue: &QueueIdentity) {
        for o in &self.observers {
            o.worker_started(worker, queue);
        }
    }

    fn task_received(&self, worker: &WorkerIdentity, input: &str) {
        for o in &self.observers {
            o.task_received(worker, input);
        }
    }

    fn processing_complete(&self, worker: &WorkerIdentity, elapsed: Duration) {
        for o in &self.observers {
            o.processing_complete(worker, elapsed);
        }
    }

    fn processing_failed(&self, worker: &WorkerIdentity, error: &anyhow::Error) {
        for o in &self.observers {
            o.processing_failed(worker, error);
        }
    }

    fn retry_attempt(&self, op: &str, attempt: u32, delay: Duration, error: &dyn fmt::Display) {
        for o in &self.observers {
            o.retry_attempt(op, attempt, delay, error);
        }
    }

    fn retry_swallowed(&self, op: &str, attempts: u32, error: &dyn fmt::Display) {
        for o in &self.observers {
            o.retry_swallowed(op, attempts, error);
        }
    }

    fn name(&self) -> &'static str {
        "CompositeObserver"
    }
}

// ============================================================================
// RecordingObserver
// ============================================================================

/// Events captured by [`RecordingObserver`]; used by tests to assert on what
/// a worker emitted.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    WorkerStarted { worker: String },
    TaskReceived { worker: String, input: String },
    ProcessingComplete { worker: String },
    ProcessingFailed { worker: String, error: String },
    RetryAttempt { op: String, attempt: u32, error: String },
    RetrySwallowed { op: String, attempts: u32, error: String },
}

/// Observer that keeps every event in memory.
///
/// A testing aid, like [`InMemoryQueueService`](crate::queue::InMemoryQueueService):
/// it grows without bound and is not meant for production pools.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: parking_lot::Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&ObservedEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    fn push(&self, event: ObservedEvent) {
        self.events.lock().push(event);
    }
}

impl WorkerObserver for RecordingObserver {
    fn worker_started(&self, worker: &WorkerIdentity, _queue: &QueueIdentity) {
        self.push(ObservedEvent::WorkerStarted {
            worker: worker.to_string(),
        });
    }

    fn task_received(&self, worker: &WorkerIdentity, input: &str) {
        self.push(ObservedEvent::TaskReceived {
            worker: worker.to_string(),
            input: input.to_string(),
        });
    }

    fn processing_complete(&self, worker: &WorkerIdentity, _elapsed: Duration) {
        self.push(ObservedEvent::ProcessingComplete {
            worker: worker.to_string(),
        });
    }

    fn processing_failed(&self, worker: &WorkerIdentity, error: &anyhow::Error) {
        self.push(ObservedEvent::ProcessingFailed {
            worker: worker.to_string(),
            error: error.to_string(),
        });
    }

    fn retry_attempt(&self, op: &str, attempt: u32, _delay: Duration, error: &dyn fmt::Display) {
        self.push(ObservedEvent::RetryAttempt {
            op: op.to_string(),
            attempt,
            error: error.to_string(),
        });
    }

    fn retry_swallowed(&self, op: &str, attempts: u32, error: &dyn fmt::Display) {
        self.push(ObservedEvent::RetrySwallowed {
            op: op.to_string(),
            attempts,
            error: error.to_string(),
        });
    }

    fn name(&self) -> &'static str {
        "RecordingObserver"
    }
}
