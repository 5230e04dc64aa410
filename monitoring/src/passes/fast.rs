// Fast Pass (1-minute)
// Real-time quote scan for instantaneous moves. Stores pending candidates
// for the 5-minute pass to confirm; never enqueues on its own.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use common::FastCandidate;
use market_data::is_market_open;
use tracing::{info, warn};

use super::MonitorContext;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Run one fast scan over the watchlist. Returns the number of candidates
/// stored.
pub async fn run_fast_pass(ctx: &MonitorContext, now: DateTime<Utc>) -> Result<usize> {
    if !is_market_open(now) {
        return Ok(0);
    }

    let config = &ctx.config;
    let cooldown = Duration::seconds(config.fast_cooldown_seconds);
    let mut stored = 0;

    for ticker in &config.watchlist {
        let quote = match ctx.intraday.get_quote(ticker).await {
            Some(quote) if quote.price > 0.0 => quote,
            _ => {
                warn!(ticker, "no valid quote");
                continue;
            }
        };

        let bars = ctx.intraday.get_intraday_bars(ticker, 1, 60).await;
        if bars.len() < 5 {
            warn!(ticker, bars = bars.len(), "insufficient intraday data");
            continue;
        }

        let previous_price = bars[bars.len() - 1].close;
        if previous_price <= 0.0 {
            continue;
        }

        // Signed change, so confirmation and validation know the direction
        let instant_change = (quote.price - previous_price) / previous_price;
        if instant_change.abs() < config.fast_percent_threshold {
            continue;
        }

        match ctx.cooldowns.get_last_trigger(ticker).await {
            Ok(Some(last)) if now - last < cooldown => {
                info!(ticker, %last, "in cooldown, skipping fast candidate");
                continue;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(ticker, error = %err, "cooldown lookup failed");
                continue;
            }
        }

        let confidence = round2((instant_change.abs() / config.fast_percent_threshold).min(1.0) * 0.65);
        let candidate = FastCandidate::new(
            ticker,
            now,
            quote.price,
            round6(instant_change),
            confidence,
        );

        match ctx.candidates.upsert(&candidate).await {
            Ok(()) => {
                info!(
                    ticker,
                    change_pct = instant_change * 100.0,
                    confidence,
                    source = quote.source,
                    "stored fast candidate"
                );
                stored += 1;
            }
            Err(err) => warn!(ticker, error = %err, "failed to store fast candidate"),
        }
    }

    Ok(stored)
}
