//! Retry policy implementation

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::observer::WorkerObserver;

/// Ceiling on the delay between two attempts: 30 minutes.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Retries after the initial call for [`RetryPolicy::bounded_then_swallow`].
pub const DEFAULT_REPORT_RETRIES: u32 = 20;

/// Retry configuration for queue interactions
///
/// The same backoff curve backs both ways of running an operation:
/// [`RetryPolicy::retry_forever`] ignores `max_retries` and only returns on
/// success, [`RetryPolicy::retry_else_swallow`] gives up once `max_retries`
/// retries have failed and discards the last error.
///
/// # Example
///
/// ```
/// use activity_runner::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::bounded_then_swallow()
///     .with_max_retries(5)
///     .with_initial_interval(Duration::from_millis(500));
///
/// assert_eq!(policy.delay_for_retry(1), Duration::from_millis(500));
/// assert_eq!(policy.delay_for_retry(2), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial call; `None` retries forever
    pub max_retries: Option<u32>,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential); values below 1.0 act as 1.0
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0) to add randomness
    ///
    /// A value of 0.1 means ±10% randomness.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RetryPolicy {
    /// Policy for polling: never gives up
    ///
    /// - no attempt ceiling
    /// - 1 second initial interval, doubling
    /// - 30 minute max interval
    /// - no jitter
    pub fn unbounded() -> Self {
        Self {
            max_retries: None,
            initial_interval: Duration::from_secs(1),
            max_interval: DEFAULT_MAX_INTERVAL,
            backoff_coefficient: 2.0,
            jitter: 0.0,
        }
    }

    /// Policy for reporting results: 1 call plus 20 retries, then the error is
    /// swallowed
    pub fn bounded_then_swallow() -> Self {
        Self {
            max_retries: Some(DEFAULT_REPORT_RETRIES),
            ..Self::unbounded()
        }
    }

    /// Set the maximum number of retries; 0 means a single call
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Remove the retry ceiling
    pub fn with_unlimited_retries(mut self) -> Self {
        self.max_retries = None;
        self
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `retry` (1-based)
    ///
    /// `min(initial * coefficient^(retry-1), max_interval)`, then jittered.
    /// Fields set outside the builder are clamped here too.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let max = self.max_interval.as_secs_f64();
        let coefficient = if self.backoff_coefficient.is_finite() {
            self.backoff_coefficient.max(1.0)
        } else {
            1.0
        };
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let base = self.initial_interval.as_secs_f64() * coefficient.powi(exponent);
        let capped = if base.is_nan() { 0.0 } else { base.clamp(0.0, max) };

        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let jittered = if jitter > 0.0 && capped > 0.0 {
            let jitter_range = capped * jitter;
            let offset = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            (capped + offset).clamp(0.0, max)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Check if call number `attempt` (1-based) may still be followed by a retry
    pub fn has_retries_remaining(&self, attempt: u32) -> bool {
        self.max_retries.map_or(true, |max| attempt <= max)
    }

    /// Run `op` until it succeeds
    ///
    /// `max_retries` is ignored. Every failure is reported to `observer`,
    /// followed by a backoff sleep; `op` is then invoked again from scratch.
    pub async fn retry_forever<T, E, F, Fut>(
        &self,
        op_name: &str,
        observer: &dyn WorkerObserver,
        mut op: F,
    ) -> T
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => return value,
                Err(err) => {
                    let delay = self.delay_for_retry(attempt);
                    observer.retry_attempt(op_name, attempt, delay, &err);
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Run `op` once plus up to `max_retries` retries, then give up quietly
    ///
    /// Returns `None` when every call failed; the last error only goes to
    /// [`WorkerObserver::retry_swallowed`] together with the total call count.
    pub async fn retry_else_swallow<T, E, F, Fut>(
        &self,
        op_name: &str,
        observer: &dyn WorkerObserver,
        mut op: F,
    ) -> Option<T>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => return Some(value),
                Err(err) if self.has_retries_remaining(attempt) => {
                    let delay = self.delay_for_retry(attempt);
                    observer.retry_attempt(op_name, attempt, delay, &err);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    observer.retry_swallowed(op_name, attempt, &err);
                    return None;
                }
            }
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{ObservedEvent, RecordingObserver};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_policy_defaults() {
        let poll = RetryPolicy::unbounded();
        assert_eq!(poll.max_retries, None);
        assert_eq!(poll.initial_interval, Duration::from_secs(1));
        assert_eq!(poll.max_interval, Duration::from_secs(1800));
        assert_eq!(poll.backoff_coefficient, 2.0);

        let report = RetryPolicy::bounded_then_swallow();
        assert_eq!(report.max_retries, Some(20));
        assert_eq!(report.max_interval, poll.max_interval);
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::unbounded();

        assert_eq!(policy.delay_for_retry(0), Duration::ZERO);
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(4));
    }

    #[test]
    fn test_max_interval_cap() {
        let policy = RetryPolicy::unbounded();

        // 2^11 s already exceeds 30 min
        assert_eq!(policy.delay_for_retry(12), DEFAULT_MAX_INTERVAL);
        assert_eq!(policy.delay_for_retry(u32::MAX), DEFAULT_MAX_INTERVAL);
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        let policy = RetryPolicy::unbounded()
            .with_jitter(0.5)
            .with_max_interval(Duration::from_secs(10));

        for retry in 1..30 {
            assert!(policy.delay_for_retry(retry) <= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_has_retries_remaining() {
        let policy = RetryPolicy::bounded_then_swallow().with_max_retries(2);
        assert!(policy.has_retries_remaining(1));
        assert!(policy.has_retries_remaining(2));
        assert!(!policy.has_retries_remaining(3));

        let once = RetryPolicy::bounded_then_swallow().with_max_retries(0);
        assert!(!once.has_retries_remaining(1));

        assert!(RetryPolicy::unbounded().has_retries_remaining(u32::MAX));
    }

    #[test]
    fn test_deserialized_out_of_range_fields_are_clamped() {
        let policy: RetryPolicy = serde_json::from_value(serde_json::json!({
            "max_retries": null,
            "initial_interval": 1000,
            "max_interval": 10_000,
            "backoff_coefficient": -2.0,
            "jitter": 7.5,
        }))
        .unwrap();

        for retry in 1..40 {
            let delay = policy.delay_for_retry(retry);
            assert!(delay <= Duration::from_secs(10), "retry {retry}: {delay:?}");
        }

        let flat = RetryPolicy {
            backoff_coefficient: 0.5,
            ..RetryPolicy::unbounded()
        };
        assert_eq!(flat.delay_for_retry(5), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_coefficient_keeps_retrying() {
        let observer = RecordingObserver::new();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            backoff_coefficient: -2.0,
            ..RetryPolicy::unbounded()
        };

        let value = policy
            .retry_forever("get_task", &observer, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= 5 {
                    Err("unreachable")
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(value, 6);
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::bounded_then_swallow().with_max_retries(7);

        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["max_interval"], 1_800_000);

        let parsed: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(policy, parsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_forever_eventually_succeeds() {
        let observer = RecordingObserver::new();
        let calls = AtomicU32::new(0);

        let value = RetryPolicy::unbounded()
            .retry_forever("get_task", &observer, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= 15 {
                    Err(format!("unreachable #{n}"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(value, 16);
        assert_eq!(calls.load(Ordering::SeqCst), 16);
        assert_eq!(
            observer.count(|e| matches!(e, ObservedEvent::RetryAttempt { .. })),
            15
        );
        assert_eq!(
            observer.count(|e| matches!(e, ObservedEvent::RetrySwallowed { .. })),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_forever_sleeps_along_the_curve() {
        let observer = RecordingObserver::new();
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        RetryPolicy::unbounded()
            .retry_forever("get_task", &observer, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err("down")
                } else {
                    Ok(())
                }
            })
            .await;

        // 1 + 2 + 4 seconds of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_else_swallow_gives_up() {
        let observer = RecordingObserver::new();
        let calls = AtomicU32::new(0);

        let result: Option<()> = RetryPolicy::bounded_then_swallow()
            .retry_else_swallow("report_failure", &observer, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("still down")
            })
            .await;

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 21);
        assert_eq!(
            observer.count(|e| matches!(e, ObservedEvent::RetryAttempt { .. })),
            20
        );
        let swallowed: Vec<_> = observer
            .events()
            .into_iter()
            .filter(|e| matches!(e, ObservedEvent::RetrySwallowed { .. }))
            .collect();
        assert_eq!(
            swallowed,
            vec![ObservedEvent::RetrySwallowed {
                op: "report_failure".to_string(),
                attempts: 21,
                error: "still down".to_string(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_else_swallow_returns_value() {
        let observer = RecordingObserver::new();
        let calls = AtomicU32::new(0);

        let result = RetryPolicy::bounded_then_swallow()
            .retry_else_swallow("report_success", &observer, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("flaky")
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result, Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
