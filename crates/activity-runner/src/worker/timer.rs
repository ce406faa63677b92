//! Wall-clock timing around the processing function

use std::time::Instant;

use serde_json::Value;

use super::processor::TaskProcessor;
use crate::observer::WorkerObserver;
use crate::queue::WorkerIdentity;

/// Times one call to a [`TaskProcessor`]
///
/// Completion is only reported on success; an error from the processor
/// propagates before the timer reports anything.
pub struct ProcessingTimer<'a> {
    worker: &'a WorkerIdentity,
    observer: &'a dyn WorkerObserver,
}

impl<'a> ProcessingTimer<'a> {
    pub fn new(worker: &'a WorkerIdentity, observer: &'a dyn WorkerObserver) -> Self {
        Self { worker, observer }
    }

    pub async fn run(&self, processor: &dyn TaskProcessor, input: Value) -> anyhow::Result<Value> {
        let start = Instant::now();
        let result = processor.process(input).await?;
        self.observer.processing_complete(self.worker, start.elapsed());
        Ok(result)
    }
}
