//! Processing function contract and task outcomes

use std::backtrace::BacktraceStatus;
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum length, in characters, of [`FailureDescriptor::error`]
pub const MAX_ERROR_SUMMARY_CHARS: usize = 256;

/// Caller-supplied processing function
///
/// Receives the decoded task input and returns the task output. Returning
/// `Value::Null` reports an empty object. Any error is reported as a task
/// failure; the harness never retries the processor itself.
///
/// Closures of the shape `Fn(Value) -> impl Future<Output = anyhow::Result<Value>>`
/// implement this trait directly.
///
/// # Example
///
/// ```ignore
/// use activity_runner::TaskProcessor;
/// use serde_json::{json, Value};
///
/// let processor = |input: Value| async move {
///     let x = input["x"].as_i64().unwrap_or_default();
///     Ok::<_, anyhow::Error>(json!({ "y": x + 1 }))
/// };
/// ```
#[async_trait]
pub trait TaskProcessor: Send + Sync + 'static {
    async fn process(&self, input: Value) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> TaskProcessor for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn process(&self, input: Value) -> anyhow::Result<Value> {
        (self)(input).await
    }
}

/// Failure report for a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDescriptor {
    /// Full error detail: the backtrace rendering when one was captured,
    /// otherwise the error chain
    pub cause: String,

    /// Human summary, at most [`MAX_ERROR_SUMMARY_CHARS`] characters
    pub error: String,
}

impl FailureDescriptor {
    pub fn from_error(err: &anyhow::Error) -> Self {
        let captured = err.backtrace().status() == BacktraceStatus::Captured;
        Self {
            cause: render_cause(err, captured),
            error: truncate_chars(&err.to_string(), MAX_ERROR_SUMMARY_CHARS),
        }
    }
}

/// `{:?}` carries the chain and the stack trace; `{:#}` is the chain alone
fn render_cause(err: &anyhow::Error, backtrace_captured: bool) -> String {
    if backtrace_captured {
        format!("{err:?}")
    } else {
        format!("{err:#}")
    }
}

/// Outcome of processing one task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success(Value),
    Failure(FailureDescriptor),
}

impl TaskOutcome {
    /// Successful outcome; `null` becomes `{}`
    pub fn success(value: Value) -> Self {
        match value {
            Value::Null => Self::Success(Value::Object(Default::default())),
            other => Self::Success(other),
        }
    }

    pub fn failure(err: &anyhow::Error) -> Self {
        Self::Failure(FailureDescriptor::from_error(err))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_becomes_empty_object() {
        assert_eq!(TaskOutcome::success(Value::Null), TaskOutcome::Success(json!({})));
        assert_eq!(
            TaskOutcome::success(json!({"y": 2})),
            TaskOutcome::Success(json!({"y": 2}))
        );
    }

    #[test]
    fn test_error_summary_is_truncated() {
        let err = anyhow::anyhow!("{}", "x".repeat(300));
        let failure = FailureDescriptor::from_error(&err);
        assert_eq!(failure.error.chars().count(), MAX_ERROR_SUMMARY_CHARS);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let err = anyhow::anyhow!("{}", "é".repeat(300));
        let failure = FailureDescriptor::from_error(&err);
        assert_eq!(failure.error, "é".repeat(256));
    }

    #[test]
    fn test_cause_without_backtrace_is_error_chain() {
        let err = anyhow::anyhow!("disk full").context("Error: boom");
        let failure = FailureDescriptor::from_error(&err);

        assert_eq!(failure.error, "Error: boom");
        if err.backtrace().status() != BacktraceStatus::Captured {
            assert_eq!(failure.cause, "Error: boom: disk full");
        } else {
            assert!(failure.cause.starts_with("Error: boom"));
        }
    }

    #[test]
    fn test_cause_rendering_by_backtrace_status() {
        let err = anyhow::anyhow!("disk full").context("Error: boom");

        assert_eq!(render_cause(&err, false), "Error: boom: disk full");

        let detailed = render_cause(&err, true);
        assert!(detailed.starts_with("Error: boom\n\nCaused by:"));
        assert!(detailed.contains("disk full"));
    }

    #[tokio::test]
    async fn test_closure_processor() {
        let processor =
            |input: Value| async move { Ok::<_, anyhow::Error>(json!({ "echo": input })) };
        let out = processor.process(json!(1)).await.unwrap();
        assert_eq!(out, json!({"echo": 1}));
    }
}
