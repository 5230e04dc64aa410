// Queue Worker Entrypoint
// Drains the analysis-request queue continuously, idling briefly whenever
// the queue is empty.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::RedisQueue;
use execution::{
    AlpacaBroker, HttpDecisionEngine, QueueWorker, RedisOrderStore, RedisResultStore, WorkerConfig,
};
use tracing::{error, info, Level};
use tracing_subscriber::fmt;

const IDLE_SLEEP: Duration = Duration::from_secs(10);
const ERROR_SLEEP: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_max_level(Level::INFO).init();

    let config = WorkerConfig::from_env();
    info!(
        queue = config.queue_name,
        dead_letter = config.dead_letter_queue_name,
        "starting queue worker"
    );

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    let queue = RedisQueue::connect(&redis_url, &config.queue_name).await?;
    let dead_letter = RedisQueue::connect(&redis_url, &config.dead_letter_queue_name).await?;

    let dry_run = std::env::var("DRY_RUN")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    let broker = AlpacaBroker::new(config.confidence_threshold, dry_run)?;
    if broker.is_dry_run() {
        info!("broker running in dry-run mode, no orders will reach the exchange");
    }

    let engine = HttpDecisionEngine::from_env()?;

    let result_store: Option<Arc<dyn execution::ResultStore>> = if config.save_results {
        Some(Arc::new(RedisResultStore::connect(&redis_url).await?))
    } else {
        None
    };
    let order_store = Arc::new(RedisOrderStore::connect(&redis_url).await?);

    let worker = QueueWorker::new(
        Arc::new(queue),
        Some(Arc::new(dead_letter)),
        Arc::new(broker),
        Arc::new(engine),
        result_store,
        order_store,
        config,
    );

    loop {
        match worker.run().await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(IDLE_SLEEP).await,
            Err(err) => {
                error!(error = %err, "worker iteration failed");
                tokio::time::sleep(ERROR_SLEEP).await;
            }
        }
    }
}
