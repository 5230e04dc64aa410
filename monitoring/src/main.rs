// Market Monitor
// Long-running scheduler driving the three monitor passes: 1-minute fast
// scan, 5-minute confirmation, 15-minute validation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use common::RedisQueue;
use market_data::{MultiSourceClient, PriceDataClient};
use monitoring::passes::{run_confirm_pass, run_fast_pass, run_validation_pass};
use monitoring::{MonitorConfig, MonitorContext, RedisCandidateStore, RedisCooldownStore};
use tokio::time::interval;
use tracing::{error, info, Level};
use tracing_subscriber::fmt;

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_max_level(Level::INFO).init();

    let config = MonitorConfig::from_env();
    info!(watchlist = ?config.watchlist, "starting market monitor");

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let queue_name = std::env::var("MARKET_MONITOR_QUEUE_NAME")
        .unwrap_or_else(|_| "analysis-requests".to_string());

    let history = PriceDataClient::new(std::env::var("FINANCIAL_DATASETS_API_KEY").ok())?;
    let intraday = MultiSourceClient::from_env()?;
    let queue = RedisQueue::connect(&redis_url, &queue_name).await?;
    let cooldowns = RedisCooldownStore::connect(&redis_url).await?;
    let candidates = RedisCandidateStore::connect(&redis_url).await?;

    let ctx = Arc::new(MonitorContext {
        config,
        history: Arc::new(history),
        intraday: Arc::new(intraday),
        queue: Arc::new(queue),
        cooldowns: Arc::new(cooldowns),
        candidates: Arc::new(candidates),
    });

    let fast_ctx = ctx.clone();
    let fast_task = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            if let Err(err) = run_fast_pass(&fast_ctx, Utc::now()).await {
                error!(error = %err, "fast pass failed");
            }
        }
    });

    let confirm_ctx = ctx.clone();
    let confirm_task = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            match run_confirm_pass(&confirm_ctx, Utc::now()).await {
                Ok(enqueued) if enqueued > 0 => info!(enqueued, "confirmation pass complete"),
                Ok(_) => {}
                Err(err) => error!(error = %err, "confirmation pass failed"),
            }
        }
    });

    let validate_ctx = ctx.clone();
    let validate_task = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(900));
        loop {
            ticker.tick().await;
            if let Err(err) = run_validation_pass(&validate_ctx, Utc::now()).await {
                error!(error = %err, "validation pass failed");
            }
        }
    });

    let _ = tokio::try_join!(fast_task, confirm_task, validate_task)?;
    Ok(())
}
