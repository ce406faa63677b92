use std::sync::Arc;

use activity_runner::telemetry::{init_tracing, TelemetryConfig};
use activity_runner::{InMemoryQueueService, RunnerConfig, WorkerPool};
use anyhow::{Context, Result};
use serde_json::Value;

/// Account id of the local in-memory queue
const LOCAL_ACCOUNT_ID: &str = "000000000000";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - TASK_NAME (required), NR_COROUTINES, AWS_REGION / AWS_DEFAULT_REGION, HTTPS_PROXY
    // - SEED_TASKS: JSON-lines file whose lines are enqueued as task inputs
    // - RUST_LOG or LOG_LEVEL, LOG_FORMAT=json
    init_tracing(&TelemetryConfig::from_env()).context("Failed to initialize tracing")?;

    let config = RunnerConfig::from_env().context("Invalid runner configuration")?;
    if let Some(proxy) = &config.https_proxy {
        tracing::info!(proxy = %proxy, "HTTPS_PROXY set; the in-memory queue does not use it");
    }

    let service = InMemoryQueueService::new(LOCAL_ACCOUNT_ID, config.region.clone());
    let queue = service.create_queue(&config.task_name);

    if let Ok(path) = std::env::var("SEED_TASKS") {
        let seed = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read SEED_TASKS file {path}"))?;
        let lines: Vec<&str> = seed.lines().filter(|l| !l.trim().is_empty()).collect();
        for line in &lines {
            service.push_task(&queue, *line);
        }
        tracing::info!(count = lines.len(), queue = %queue, "Seeded tasks");
    }

    tracing::info!(
        task_name = %config.task_name,
        worker_count = config.worker_count,
        region = %config.region,
        "activity-runner starting"
    );

    let pool = WorkerPool::new(Arc::new(service), config.pool_config());
    let err = match pool.run(echo).await {
        Ok(never) => match never {},
        Err(e) => e,
    };

    tracing::error!(error = %err, "Worker pool stopped");
    Err(err.into())
}

/// Returns the task input unchanged
async fn echo(input: Value) -> Result<Value> {
    Ok(input)
}
