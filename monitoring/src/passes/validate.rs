// Validation Pass (15-minute)
// Re-scores recently confirmed candidates against fresh bars. A score under
// the exit threshold invalidates the candidate and enqueues an exit message.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use common::CandidateStatus;
use market_data::is_market_open;
use signal_detection::{assess_confirmation, Direction};
use tracing::{info, warn};

use super::MonitorContext;
use crate::payload::compose_exit_signal;

/// Run one validation sweep. Returns the number of candidates scored.
pub async fn run_validation_pass(ctx: &MonitorContext, now: DateTime<Utc>) -> Result<usize> {
    if !is_market_open(now) {
        return Ok(0);
    }

    let config = &ctx.config;
    let confirmed = ctx
        .candidates
        .confirmed_since(now - Duration::minutes(15))
        .await?;
    info!(count = confirmed.len(), "confirmed signals to validate");

    let mut scored = 0;
    for mut candidate in confirmed {
        let ticker = candidate.ticker.clone();

        // Last hour of 5-minute bars
        let bars = ctx.intraday.get_intraday_bars(&ticker, 5, 12).await;
        if bars.len() < 6 {
            warn!(ticker, bars = bars.len(), "insufficient data for validation");
            continue;
        }

        let direction = Direction::from_instant_change(candidate.instant_change);
        let assessment = assess_confirmation(&ticker, &bars, candidate.trigger_price, direction);

        candidate.validation_score = Some(assessment.score);
        candidate.validated_at = Some(now);
        candidate.validation_rsi = Some(assessment.rsi);
        candidate.validation_price = Some(assessment.current_price);
        candidate.validation_price_change = Some(assessment.price_change);

        if assessment.score < config.validation_exit_threshold {
            warn!(
                ticker,
                score = assessment.score,
                threshold = config.validation_exit_threshold,
                "validation failed, sending exit signal"
            );
            candidate.status = CandidateStatus::Invalidated;

            let exit = compose_exit_signal(&ticker, assessment.score, now, config);
            match serde_json::to_string(&exit) {
                Ok(payload) => {
                    if let Err(err) = ctx.queue.send(&payload).await {
                        warn!(ticker, error = %err, "failed to send exit signal");
                    }
                }
                Err(err) => warn!(ticker, error = %err, "failed to serialize exit signal"),
            }
        } else {
            info!(ticker, score = assessment.score, "validation passed");
            candidate.status = CandidateStatus::Validated;
        }

        if let Err(err) = ctx.candidates.upsert(&candidate).await {
            warn!(ticker, error = %err, "failed to persist validation result");
        }
        scored += 1;
    }

    Ok(scored)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use common::{ExitSignal, FastCandidate, InMemoryQueue, PriceBar};
    use market_data::{IntradaySource, PriceHistorySource, Quote};

    use super::*;
    use crate::config::MonitorConfig;
    use crate::stores::{CandidateStore, InMemoryCandidateStore, InMemoryCooldownStore};

    struct StubIntraday {
        bars: Vec<PriceBar>,
    }

    #[async_trait]
    impl IntradaySource for StubIntraday {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn get_quote(&self, _ticker: &str) -> Option<Quote> {
            None
        }

        async fn get_intraday_bars(
            &self,
            _ticker: &str,
            _interval_minutes: u32,
            _limit: usize,
        ) -> Vec<PriceBar> {
            self.bars.clone()
        }
    }

    struct EmptyHistory;

    #[async_trait]
    impl PriceHistorySource for EmptyHistory {
        async fn get_prices(
            &self,
            _ticker: &str,
            _start_date: &str,
            _end_date: &str,
            _interval: &str,
            _interval_multiplier: u32,
        ) -> Result<Vec<PriceBar>> {
            Ok(Vec::new())
        }
    }

    fn session_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 16, 0, 0).unwrap()
    }

    fn bars(closes: &[f64], volume: u64) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                open: close,
                high: close + 0.1,
                low: close - 0.1,
                close,
                volume,
                timestamp: start + Duration::minutes(i as i64 * 5),
            })
            .collect()
    }

    struct Harness {
        ctx: MonitorContext,
        queue: Arc<InMemoryQueue>,
        candidates: Arc<InMemoryCandidateStore>,
    }

    fn harness(intraday_bars: Vec<PriceBar>) -> Harness {
        let queue = Arc::new(InMemoryQueue::new());
        let candidates = Arc::new(InMemoryCandidateStore::new());
        let ctx = MonitorContext {
            config: MonitorConfig::default(),
            history: Arc::new(EmptyHistory),
            intraday: Arc::new(StubIntraday {
                bars: intraday_bars,
            }),
            queue: queue.clone(),
            cooldowns: Arc::new(InMemoryCooldownStore::new()),
            candidates: candidates.clone(),
        };
        Harness {
            ctx,
            queue,
            candidates,
        }
    }

    async fn seed_confirmed(store: &InMemoryCandidateStore, now: DateTime<Utc>) -> FastCandidate {
        let mut candidate =
            FastCandidate::new("AAPL", now - Duration::minutes(12), 100.0, 0.008, 0.65);
        candidate.status = CandidateStatus::Confirmed;
        candidate.confirmed_at = Some(now - Duration::minutes(10));
        candidate.final_confidence = Some(0.8);
        store.upsert(&candidate).await.unwrap();
        candidate
    }

    #[tokio::test]
    async fn healthy_continuation_marks_candidate_validated() {
        // Bullish trigger at 100, price ground higher with steady volume
        let closes = vec![
            100.2, 100.4, 100.3, 100.6, 100.5, 100.8, 100.7, 101.0, 100.9, 101.2, 101.1, 101.4,
        ];
        let h = harness(bars(&closes, 10_000));
        let now = session_time();
        let seeded = seed_confirmed(&h.candidates, now).await;

        assert_eq!(run_validation_pass(&h.ctx, now).await.unwrap(), 1);

        let stored = h.candidates.get(&seeded.id).await.unwrap();
        assert_eq!(stored.status, CandidateStatus::Validated);
        assert_eq!(stored.validated_at, Some(now));
        let score = stored.validation_score.unwrap();
        assert!(score >= 30, "score {score} should clear the exit threshold");
        assert!(stored.validation_price_change.unwrap() > 0.0);
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn failed_validation_sends_exit_signal() {
        // Bullish trigger at 100 but the tape reversed and chopped
        let closes = vec![
            99.8, 99.6, 99.7, 99.5, 99.6, 99.4, 99.5, 99.3, 99.4, 99.2, 99.3, 99.1,
        ];
        let mut history = bars(&closes, 10_000);
        // Volume collapse in the most recent bars
        let len = history.len();
        for bar in history.iter_mut().skip(len - 3) {
            bar.volume = 1_000;
        }
        let h = harness(history);
        let now = session_time();
        let seeded = seed_confirmed(&h.candidates, now).await;

        run_validation_pass(&h.ctx, now).await.unwrap();

        let stored = h.candidates.get(&seeded.id).await.unwrap();
        assert_eq!(stored.status, CandidateStatus::Invalidated);
        assert!(stored.validation_score.unwrap() < 30);

        let contents = h.queue.contents().await;
        assert_eq!(contents.len(), 1);
        let exit: ExitSignal = serde_json::from_str(&contents[0]).unwrap();
        assert_eq!(exit.action, "exit_position");
        assert_eq!(exit.tickers, vec!["AAPL"]);
        assert_eq!(exit.reason, "signal_invalidated");
    }

    #[tokio::test]
    async fn short_history_leaves_candidate_untouched() {
        let h = harness(bars(&[100.0, 100.1, 100.2], 10_000));
        let now = session_time();
        let seeded = seed_confirmed(&h.candidates, now).await;

        assert_eq!(run_validation_pass(&h.ctx, now).await.unwrap(), 0);
        let stored = h.candidates.get(&seeded.id).await.unwrap();
        assert_eq!(stored.status, CandidateStatus::Confirmed);
        assert!(stored.validation_score.is_none());
    }

    #[tokio::test]
    async fn stale_confirmations_are_not_revalidated() {
        let closes = vec![100.2; 12];
        let h = harness(bars(&closes, 10_000));
        let now = session_time();

        let mut stale = FastCandidate::new("AAPL", now - Duration::hours(3), 100.0, 0.008, 0.65);
        stale.status = CandidateStatus::Confirmed;
        stale.confirmed_at = Some(now - Duration::hours(2));
        h.candidates.upsert(&stale).await.unwrap();

        assert_eq!(run_validation_pass(&h.ctx, now).await.unwrap(), 0);
    }
}
