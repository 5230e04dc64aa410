// Queue Payload Composition
// Builds the analysis request and exit messages the downstream worker
// consumes. The analysis window is a calendar-date range in Eastern time so
// daily indicators downstream get a long enough runway.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use common::{AnalysisRequest, AnalysisWindow, CorrelationHints, ExitSignal, SignalResult};
use common::PriceBar;
use market_data::eastern_date;

use crate::config::MonitorConfig;

fn isoformat(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Compose the enqueue payload for a triggered ticker.
pub fn compose_analysis_request(
    ticker: &str,
    triggered_at: DateTime<Utc>,
    result: &SignalResult,
    bars: &[PriceBar],
    detection_method: &str,
    config: &MonitorConfig,
) -> AnalysisRequest {
    let end = eastern_date(triggered_at);
    let start = end - Duration::days(config.analysis_lookback_days);

    let mut market_snapshot = result.metrics.clone();
    market_snapshot.insert(
        "latest_close".to_string(),
        bars.last().map(|b| b.close).unwrap_or(0.0),
    );
    market_snapshot.insert(
        "previous_close".to_string(),
        if bars.len() > 1 {
            bars[bars.len() - 2].close
        } else {
            0.0
        },
    );
    market_snapshot.insert(
        "latest_volume".to_string(),
        bars.last().map(|b| b.volume as f64).unwrap_or(0.0),
    );

    AnalysisRequest {
        tickers: vec![ticker.to_string()],
        analysis_window: AnalysisWindow {
            start: start.format("%Y-%m-%d").to_string(),
            end: end.format("%Y-%m-%d").to_string(),
        },
        user_id: config.user_id.clone(),
        strategy_id: config.strategy_id.clone(),
        confidence: result.confidence,
        priority: result.priority,
        detection_method: detection_method.to_string(),
        market_snapshot,
        signals: result.reasons.clone(),
        triggered_at: isoformat(triggered_at),
        correlation_hints: CorrelationHints {
            related_watchlist: config
                .watchlist
                .iter()
                .filter(|symbol| symbol.as_str() != ticker)
                .cloned()
                .collect(),
            basis: result.reasons.clone(),
        },
    }
}

/// Compose the exit message for a candidate that failed validation.
pub fn compose_exit_signal(
    ticker: &str,
    validation_score: u32,
    now: DateTime<Utc>,
    config: &MonitorConfig,
) -> ExitSignal {
    ExitSignal {
        action: "exit_position".to_string(),
        tickers: vec![ticker.to_string()],
        reason: "signal_invalidated".to_string(),
        validation_score,
        triggered_at: isoformat(now),
        detection_method: "validation_exit".to_string(),
        user_id: config.user_id.clone(),
        strategy_id: config.strategy_id.clone(),
    }
}
