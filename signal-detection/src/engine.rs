// Detection Engine
// Runs the full indicator battery over one ticker's bars and folds the
// triggered checks into a single weighted SignalResult.

use common::{Priority, SignalResult};
use common::PriceBar;
use tracing::debug;

use crate::indicators::{
    atr, bollinger_position, detect_gap, detect_intraday_breakout, detect_vwap_deviation,
    price_velocity, round2, round4, volatility_expansion, volume_velocity, vwap,
};

/// Tunable thresholds for the detection battery.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Minimum bar-over-bar close change, as a fraction (0.02 = 2%).
    pub percent_threshold: f64,
    /// Volume spike multiple against the trailing average.
    pub volume_multiplier: f64,
    /// VWAP deviation trigger, in standard deviations.
    pub vwap_std_threshold: f64,
    /// Price velocity trigger, as a fraction per minute.
    pub velocity_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            percent_threshold: 0.02,
            volume_multiplier: 1.5,
            vwap_std_threshold: 2.0,
            velocity_threshold: 0.001,
        }
    }
}

/// Evaluate every detection check against the bar history. Confidence is the
/// mean of the triggered checks' weighted scores; priority derives from how
/// many checks fired and how strongly.
pub fn detect(
    ticker: &str,
    bars: &[PriceBar],
    previous_day_close: Option<f64>,
    config: &DetectionConfig,
) -> SignalResult {
    if bars.len() < 2 {
        return SignalResult::neutral();
    }

    let latest = &bars[bars.len() - 1];
    let previous = &bars[bars.len() - 2];

    let mut reasons: Vec<String> = Vec::new();
    let mut scores: Vec<f64> = Vec::new();
    let mut result = SignalResult::neutral();

    // 1. Bar-over-bar price change
    if previous.close > 0.0 {
        let percent_change = (latest.close - previous.close) / previous.close;
        result
            .metrics
            .insert("percent_change".into(), round2(percent_change * 100.0));

        if percent_change.abs() >= config.percent_threshold {
            reasons.push("price_breakout".into());
            scores.push((percent_change.abs() / config.percent_threshold).min(1.0));
        }
    }

    // 2. Volume spike
    if bars.len() >= 10 {
        let volume_ratio = volume_velocity(bars);
        result
            .metrics
            .insert("volume_ratio".into(), round2(volume_ratio));

        if volume_ratio >= config.volume_multiplier {
            reasons.push("volume_spike".into());
            scores.push((volume_ratio / config.volume_multiplier).min(1.0) * 0.8);
        }
    }

    // 3. Rapid movement (price velocity)
    let velocity = price_velocity(bars, 5);
    result
        .metrics
        .insert("price_velocity".into(), round4(velocity * 100.0));

    if velocity >= config.velocity_threshold {
        reasons.push("rapid_movement".into());
        scores.push((velocity / config.velocity_threshold).min(1.0) * 0.9);
    }

    // 4. Gap against the previous session's close
    if let Some(prev_close) = previous_day_close {
        if prev_close > 0.0 {
            if let Some(gap_signal) = detect_gap(latest, prev_close, 0.015) {
                let gap_pct = (latest.open - prev_close).abs() / prev_close;
                reasons.push(gap_signal.into());
                result
                    .metrics
                    .insert("gap_percent".into(), round2(gap_pct * 100.0));
                scores.push((gap_pct / 0.02).min(1.0) * 0.95);
            }
        }
    }

    // 5. Intraday breakout over the trailing session (~6.5h of 5-min bars)
    if let Some(breakout_signal) = detect_intraday_breakout(bars, 78) {
        reasons.push(breakout_signal.into());
        scores.push(0.85);
    }

    // 6. VWAP deviation
    let vwap_value = vwap(bars);
    if let Some(vwap_signal) = detect_vwap_deviation(bars, config.vwap_std_threshold) {
        reasons.push(vwap_signal.into());
        result.metrics.insert("vwap".into(), round2(vwap_value));
        result.metrics.insert(
            "vwap_deviation".into(),
            round2((latest.close - vwap_value) / vwap_value * 100.0),
        );
        scores.push(0.75);
    }

    // 7. Bollinger band extremes
    let bb_position = bollinger_position(bars, 20);
    result
        .metrics
        .insert("bollinger_position".into(), round2(bb_position));

    if bb_position <= 0.1 || bb_position >= 0.9 {
        reasons.push("bollinger_extreme".into());
        scores.push(0.7);
    }

    // 8. Volatility expansion
    if volatility_expansion(bars, 20, 1.5) {
        reasons.push("volatility_expansion".into());
        scores.push(0.8);
    }

    // 9. ATR, published as a metric only
    let atr_value = atr(bars, 14);
    if latest.close > 0.0 {
        result
            .metrics
            .insert("atr_percent".into(), round2(atr_value / latest.close * 100.0));
    }

    let confidence = if scores.is_empty() {
        0.0
    } else {
        (scores.iter().sum::<f64>() / scores.len() as f64).min(1.0)
    };

    result.triggered = !reasons.is_empty();
    result.confidence = round2(confidence);
    result.priority = Priority::from_signals(reasons.len(), result.confidence);
    result.reasons = reasons;

    if result.triggered {
        debug!(
            ticker,
            confidence = result.confidence,
            reasons = ?result.reasons,
            "detection triggered"
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn quiet_bars(count: usize) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap();
        (0..count)
            .map(|i| PriceBar {
                open: 100.0,
                high: 100.2,
                low: 99.8,
                close: 100.0,
                volume: 10_000,
                timestamp: start + Duration::minutes(i as i64 * 5),
            })
            .collect()
    }

    #[test]
    fn short_history_is_neutral() {
        let bars = quiet_bars(1);
        let result = detect("AAPL", &bars, None, &DetectionConfig::default());
        assert!(!result.triggered);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.priority, Priority::Low);
        assert!(result.metrics.is_empty());
    }

    #[test]
    fn quiet_tape_does_not_trigger() {
        let bars = quiet_bars(30);
        let result = detect("AAPL", &bars, Some(100.0), &DetectionConfig::default());
        assert!(!result.triggered);
        assert_eq!(result.reasons, Vec::<String>::new());
        // Neutral metrics are still reported
        assert_eq!(result.metrics.get("percent_change"), Some(&0.0));
        assert_eq!(result.metrics.get("bollinger_position"), Some(&0.5));
    }

    #[test]
    fn price_breakout_fires_over_threshold() {
        let mut bars = quiet_bars(30);
        let last = bars.len() - 1;
        bars[last].close = 103.0; // +3% over the previous close
        bars[last].high = 103.5;

        let result = detect("NVDA", &bars, None, &DetectionConfig::default());
        assert!(result.triggered);
        assert!(result.reasons.iter().any(|r| r == "price_breakout"));
        assert_eq!(result.metrics.get("percent_change"), Some(&3.0));
    }

    #[test]
    fn gap_up_scores_against_two_percent_scale() {
        let mut bars = quiet_bars(5);
        let last = bars.len() - 1;
        bars[last].open = 102.0; // 2% gap over yesterday's 100.0 close

        let result = detect("MSFT", &bars, Some(100.0), &DetectionConfig::default());
        assert!(result.reasons.iter().any(|r| r == "gap_up"));
        assert_eq!(result.metrics.get("gap_percent"), Some(&2.0));
        // Gap check alone: confidence = min(0.02/0.02, 1) * 0.95
        assert_eq!(result.confidence, 0.95);
    }

    #[test]
    fn more_signals_never_lower_priority() {
        // A lone gap signal stays low priority no matter how wide the gap
        let mut one = quiet_bars(5);
        let last = one.len() - 1;
        one[last].open = 103.0;
        let weak = detect("T", &one, Some(100.0), &DetectionConfig::default());
        assert_eq!(weak.reasons, vec!["gap_up".to_string()]);
        assert_eq!(weak.priority, Priority::Low);

        // Gap + breakout + volume + price change stack up the ladder
        let mut many = quiet_bars(100);
        let last = many.len() - 1;
        many[last].open = 103.0;
        many[last].close = 106.0;
        many[last].high = 106.5;
        many[last].volume = 50_000;
        let strong = detect("T", &many, Some(100.0), &DetectionConfig::default());
        assert!(strong.reasons.len() > weak.reasons.len());
        assert!(strong.priority >= weak.priority);
        // Confidence averages per-signal scores, so a lone wide gap can
        // still outscore a multi-signal mean; only priority is monotone.
        assert!(strong.confidence > 0.6);
    }

    #[test]
    fn raising_threshold_removes_breakout_without_raising_confidence() {
        let mut bars = quiet_bars(30);
        let last = bars.len() - 1;
        bars[last].close = 103.0;
        bars[last].high = 103.5;

        let loose = detect("NVDA", &bars, None, &DetectionConfig::default());
        assert!(loose.reasons.iter().any(|r| r == "price_breakout"));

        let config = DetectionConfig {
            percent_threshold: 0.05,
            ..DetectionConfig::default()
        };
        let strict = detect("NVDA", &bars, None, &config);
        assert!(!strict.reasons.iter().any(|r| r == "price_breakout"));
        assert!(strict.confidence <= loose.confidence);
    }

    #[test]
    fn confidence_is_capped_at_one() {
        let mut bars = quiet_bars(30);
        let last = bars.len() - 1;
        bars[last].open = 110.0;
        bars[last].close = 115.0;
        bars[last].high = 116.0;
        bars[last].volume = 500_000;

        let result = detect("GME", &bars, Some(100.0), &DetectionConfig::default());
        assert!(result.confidence <= 1.0);
    }
}
