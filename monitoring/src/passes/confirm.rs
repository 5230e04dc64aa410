// Confirmation Pass (5-minute)
// The main detection cadence: full indicator battery per ticker, fast
// candidate escalation, cooldown gating, and the enqueue decision.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use common::{CandidateStatus, FastCandidate, SignalResult};
use market_data::{eastern_date, is_market_open, previous_trading_day};
use signal_detection::detect;
use tracing::{error, info, warn};

use super::MonitorContext;
use crate::payload::compose_analysis_request;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// Best-effort status update; enqueue decisions never hinge on it.
async fn update_candidate(ctx: &MonitorContext, candidate: &FastCandidate) {
    if let Err(err) = ctx.candidates.upsert(candidate).await {
        warn!(
            ticker = candidate.ticker,
            id = candidate.id,
            error = %err,
            "failed to update fast candidate"
        );
    }
}

/// Run one confirmation sweep over the watchlist. Returns the number of
/// analysis requests enqueued.
pub async fn run_confirm_pass(ctx: &MonitorContext, now: DateTime<Utc>) -> Result<usize> {
    if !is_market_open(now) {
        return Ok(0);
    }

    let config = &ctx.config;
    let today = eastern_date(now);
    let start_date = (today - Duration::days(config.history_days))
        .format("%Y-%m-%d")
        .to_string();
    let end_date = today.format("%Y-%m-%d").to_string();
    let cooldown = Duration::seconds(config.cooldown_seconds);
    let mut enqueued = 0;

    for ticker in &config.watchlist {
        // Fast candidate from the last 5 minutes upgrades the detection path
        let fast_candidate = match ctx
            .candidates
            .pending_since(ticker, now - Duration::minutes(5))
            .await
        {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(ticker, error = %err, "fast candidate lookup failed");
                None
            }
        };
        let detection_method = if fast_candidate.is_some() {
            "fast_confirm"
        } else {
            "enhanced"
        };

        let bars = match ctx
            .history
            .get_prices(
                ticker,
                &start_date,
                &end_date,
                &config.interval,
                config.interval_multiplier,
            )
            .await
        {
            Ok(bars) => bars,
            Err(err) => {
                error!(ticker, error = %err, "price fetch failed");
                continue;
            }
        };

        // Previous session close for gap detection; best effort
        let prev_day = previous_trading_day(today).format("%Y-%m-%d").to_string();
        let previous_close = match ctx
            .history
            .get_prices(ticker, &prev_day, &prev_day, "day", 1)
            .await
        {
            Ok(daily) => daily.last().map(|bar| bar.close),
            Err(err) => {
                warn!(ticker, error = %err, "previous close fetch failed");
                None
            }
        };

        let mut result: SignalResult = detect(ticker, &bars, previous_close, &config.detection);

        let mut confirmed = None;
        if let Some(mut candidate) = fast_candidate {
            // 40% fast preliminary, 60% full battery
            let combined = candidate.confidence * 0.4 + result.confidence * 0.6;
            result.confidence = round2(combined);
            result.priority = result.priority.from_combined_confidence(combined);
            info!(
                ticker,
                combined = result.confidence,
                fast = candidate.confidence,
                "combined fast and enhanced confidence"
            );

            candidate.status = CandidateStatus::Confirmed;
            candidate.confirmed_at = Some(now);
            candidate.final_confidence = Some(combined);
            update_candidate(ctx, &candidate).await;
            confirmed = Some(candidate);
        }

        if !result.triggered {
            if let Some(mut candidate) = confirmed {
                candidate.status = CandidateStatus::RejectedNoConfirmation;
                update_candidate(ctx, &candidate).await;
            }
            continue;
        }

        if result.confidence < config.min_confidence {
            info!(
                ticker,
                confidence = result.confidence,
                threshold = config.min_confidence,
                "signals triggered but confidence too low"
            );
            if let Some(mut candidate) = confirmed {
                candidate.status = CandidateStatus::RejectedLowConfidence;
                update_candidate(ctx, &candidate).await;
            }
            continue;
        }

        match ctx.cooldowns.get_last_trigger(ticker).await {
            Ok(Some(last)) if now - last < cooldown => {
                info!(ticker, %last, "skipped due to cooldown");
                continue;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(ticker, error = %err, "cooldown lookup failed");
                continue;
            }
        }

        let request =
            compose_analysis_request(ticker, now, &result, &bars, detection_method, config);
        let payload = serde_json::to_string(&request)?;

        match ctx.queue.send(&payload).await {
            Ok(()) => {
                info!(
                    ticker,
                    reasons = ?result.reasons,
                    confidence = result.confidence,
                    priority = %result.priority,
                    "enqueued analysis request"
                );
                enqueued += 1;
                if let Err(err) = ctx.cooldowns.upsert_trigger(ticker, now, &result.reasons).await
                {
                    warn!(ticker, error = %err, "failed to record trigger cooldown");
                }
            }
            Err(err) => error!(ticker, error = %err, "failed to enqueue analysis request"),
        }
    }

    Ok(enqueued)
}
