// Runner configuration
// Decision: Read the environment once at startup into an explicit value; the pool never reads env vars
// Decision: Region falls back AWS_REGION -> AWS_DEFAULT_REGION -> eu-west-1

use crate::worker::{WorkerPoolConfig, DEFAULT_WORKER_COUNT};

/// Region used when neither `AWS_REGION` nor `AWS_DEFAULT_REGION` is set
pub const DEFAULT_REGION: &str = "eu-west-1";

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Startup configuration assembled by the bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Activity name the pool serves
    pub task_name: String,
    /// Number of worker loops
    pub worker_count: usize,
    /// Region the queue client is bound to
    pub region: String,
    /// Outbound proxy for the queue client, if any
    pub https_proxy: Option<String>,
}

impl RunnerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `TASK_NAME`: Activity name (required)
    /// - `NR_COROUTINES`: Number of worker loops (default: 10)
    /// - `AWS_REGION` or `AWS_DEFAULT_REGION`: Region (default: eu-west-1)
    /// - `HTTPS_PROXY`: Outbound proxy
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let task_name = non_empty("TASK_NAME").ok_or(ConfigError::Missing("TASK_NAME"))?;

        let worker_count = match non_empty("NR_COROUTINES") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "NR_COROUTINES",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_WORKER_COUNT,
        };

        let region = non_empty("AWS_REGION")
            .or_else(|| non_empty("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Ok(Self {
            task_name,
            worker_count,
            region,
            https_proxy: non_empty("HTTPS_PROXY"),
        })
    }

    /// Pool configuration for this runner
    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.task_name.clone()).with_worker_count(self.worker_count)
    }
}
