// Indicator Library
// Pure, deterministic functions over ordered OHLCV bars. Every function
// fails soft: short history yields a neutral sentinel instead of an error,
// which keeps the detection engine total.

use common::PriceBar;

/// Volume Weighted Average Price over the given bars. 0 when total volume
/// is 0.
pub fn vwap(bars: &[PriceBar]) -> f64 {
    let total_volume: u64 = bars.iter().map(|b| b.volume).sum();
    if total_volume == 0 {
        return 0.0;
    }
    let weighted: f64 = bars.iter().map(|b| b.close * b.volume as f64).sum();
    weighted / total_volume as f64
}

/// Absolute price change per minute over the lookback window.
pub fn price_velocity(bars: &[PriceBar], lookback_minutes: usize) -> f64 {
    if bars.len() < 2 {
        return 0.0;
    }
    let latest = &bars[bars.len() - 1];
    let lookback_idx = bars.len().saturating_sub(lookback_minutes + 1);
    let previous = &bars[lookback_idx];
    if previous.close == 0.0 {
        return 0.0;
    }
    let time_diff = if lookback_minutes > 0 {
        lookback_minutes as f64
    } else {
        1.0
    };
    let price_change = (latest.close - previous.close).abs() / previous.close;
    price_change / time_diff
}

/// Latest volume relative to the mean of the prior 9 bars. Neutral 1.0 with
/// fewer than 10 bars or a zero prior average.
pub fn volume_velocity(bars: &[PriceBar]) -> f64 {
    if bars.len() < 10 {
        return 1.0;
    }
    let latest_volume = bars[bars.len() - 1].volume as f64;
    let prior = &bars[bars.len() - 10..bars.len() - 1];
    let avg_volume: f64 = prior.iter().map(|b| b.volume as f64).sum::<f64>() / 9.0;
    if avg_volume == 0.0 {
        return 1.0;
    }
    latest_volume / avg_volume
}

/// Average True Range: mean of the last `period` true ranges, or of all
/// available true ranges when history is shorter.
pub fn atr(bars: &[PriceBar], period: usize) -> f64 {
    if bars.len() < 2 || period == 0 {
        return 0.0;
    }
    let true_ranges: Vec<f64> = bars
        .windows(2)
        .map(|pair| {
            let prev_close = pair[0].close;
            let bar = &pair[1];
            let high_low = bar.high - bar.low;
            let high_close = (bar.high - prev_close).abs();
            let low_close = (bar.low - prev_close).abs();
            high_low.max(high_close).max(low_close)
        })
        .collect();
    let count = period.min(true_ranges.len());
    let sum: f64 = true_ranges[true_ranges.len() - count..].iter().sum();
    sum / count as f64
}

/// Relative Strength Index over the last `period` deltas, rounded to two
/// decimals. 50.0 (neutral) with insufficient history; 100.0 when the window
/// has no losses.
pub fn rsi(bars: &[PriceBar], period: usize) -> f64 {
    if period == 0 || bars.len() < period + 1 {
        return 50.0;
    }
    let mut gains = Vec::with_capacity(bars.len() - 1);
    let mut losses = Vec::with_capacity(bars.len() - 1);
    for pair in bars.windows(2) {
        let change = pair[1].close - pair[0].close;
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }
    let avg_gain: f64 = gains[gains.len() - period..].iter().sum::<f64>() / period as f64;
    let avg_loss: f64 = losses[losses.len() - period..].iter().sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    round2(100.0 - (100.0 / (1.0 + rs)))
}

/// Gap at the open versus the previous day's close.
pub fn detect_gap(latest: &PriceBar, previous_close: f64, threshold: f64) -> Option<&'static str> {
    if previous_close == 0.0 {
        return None;
    }
    let gap = (latest.open - previous_close) / previous_close;
    if gap >= threshold {
        Some("gap_up")
    } else if gap <= -threshold {
        Some("gap_down")
    } else {
        None
    }
}

/// Break of the trailing intraday high/low, latest bar excluded from the
/// reference window.
pub fn detect_intraday_breakout(bars: &[PriceBar], lookback_bars: usize) -> Option<&'static str> {
    if bars.len() < lookback_bars + 1 {
        return None;
    }
    let historical = &bars[bars.len() - lookback_bars - 1..bars.len() - 1];
    let latest = &bars[bars.len() - 1];

    let intraday_high = historical.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let intraday_low = historical.iter().map(|b| b.low).fold(f64::MAX, f64::min);

    if latest.high > intraday_high {
        Some("breakout_high")
    } else if latest.low < intraday_low {
        Some("breakout_low")
    } else {
        None
    }
}

/// Z-score of the latest close against VWAP using the population std-dev of
/// close-VWAP deviations. Requires at least 20 bars.
pub fn detect_vwap_deviation(bars: &[PriceBar], std_threshold: f64) -> Option<&'static str> {
    if bars.len() < 20 {
        return None;
    }
    let vwap_value = vwap(bars);
    if vwap_value == 0.0 {
        return None;
    }

    let deviations: Vec<f64> = bars.iter().map(|b| b.close - vwap_value).collect();
    let mean: f64 = deviations.iter().sum::<f64>() / deviations.len() as f64;
    let variance: f64 =
        deviations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / deviations.len() as f64;
    let std_dev = variance.sqrt();

    let latest = bars[bars.len() - 1].close;
    let zscore = if std_dev > 0.0 {
        (latest - vwap_value) / std_dev
    } else {
        0.0
    };

    if zscore > std_threshold {
        Some("above_vwap")
    } else if zscore < -std_threshold {
        Some("below_vwap")
    } else {
        None
    }
}

/// Position of the latest close within the Bollinger bands (mean ± 2σ over
/// the trailing `period` closes), clamped to [0, 1]. 0.5 is neutral.
pub fn bollinger_position(bars: &[PriceBar], period: usize) -> f64 {
    if period == 0 || bars.len() < period {
        return 0.5;
    }
    let closes: Vec<f64> = bars[bars.len() - period..].iter().map(|b| b.close).collect();
    let mean: f64 = closes.iter().sum::<f64>() / closes.len() as f64;
    let variance: f64 =
        closes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / closes.len() as f64;
    let std_dev = variance.sqrt();

    let upper = mean + 2.0 * std_dev;
    let lower = mean - 2.0 * std_dev;
    if upper == lower {
        return 0.5;
    }
    let latest = bars[bars.len() - 1].close;
    ((latest - lower) / (upper - lower)).clamp(0.0, 1.0)
}

/// True when the recent-window ATR is at least `threshold` times the prior
/// window's ATR.
pub fn volatility_expansion(bars: &[PriceBar], lookback: usize, threshold: f64) -> bool {
    if lookback == 0 || bars.len() < lookback * 2 {
        return false;
    }
    let recent_atr = atr(&bars[bars.len() - lookback..], lookback);
    let historical_atr = atr(&bars[bars.len() - lookback * 2..bars.len() - lookback], lookback);
    if historical_atr == 0.0 {
        return false;
    }
    recent_atr / historical_atr >= threshold
}

/// Trend agreement across the 1/5/15-minute timeframes
#[derive(Debug, Clone, PartialEq)]
pub struct TrendAlignment {
    pub aligned: bool,
    pub direction: &'static str,
    pub confidence: f64,
}

impl TrendAlignment {
    fn unaligned() -> Self {
        Self {
            aligned: false,
            direction: "neutral",
            confidence: 0.0,
        }
    }
}

// Sign of recent 5-bar average close vs the prior 10-bar average, with a
// 0.5% deadband.
fn trend_direction(bars: &[PriceBar]) -> i8 {
    let recent: f64 = bars[bars.len() - 5..].iter().map(|b| b.close).sum::<f64>() / 5.0;
    let earlier: f64 = bars[bars.len() - 15..bars.len() - 5]
        .iter()
        .map(|b| b.close)
        .sum::<f64>()
        / 10.0;
    if recent > earlier * 1.005 {
        1
    } else if recent < earlier * 0.995 {
        -1
    } else {
        0
    }
}

/// Full three-way alignment scores 0.9; a pairwise agreement scores 0.6.
pub fn timeframe_alignment(
    bars_1m: &[PriceBar],
    bars_5m: &[PriceBar],
    bars_15m: &[PriceBar],
) -> TrendAlignment {
    if bars_1m.len() < 20 || bars_5m.len() < 20 || bars_15m.len() < 20 {
        return TrendAlignment::unaligned();
    }

    let t1 = trend_direction(bars_1m);
    let t5 = trend_direction(bars_5m);
    let t15 = trend_direction(bars_15m);

    if t1 == t5 && t5 == t15 && t1 != 0 {
        TrendAlignment {
            aligned: true,
            direction: if t1 > 0 { "bullish" } else { "bearish" },
            confidence: 0.9,
        }
    } else if (t1 == t5 && t1 != 0) || (t5 == t15 && t5 != 0) {
        TrendAlignment {
            aligned: true,
            direction: if t1.max(t5).max(t15) > 0 {
                "bullish"
            } else {
                "bearish"
            },
            confidence: 0.6,
        }
    } else {
        TrendAlignment::unaligned()
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_from_closes(closes: &[f64]) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: 1_000,
                timestamp: start + Duration::minutes(i as i64),
            })
            .collect()
    }

    #[test]
    fn vwap_weights_by_volume() {
        let mut bars = bars_from_closes(&[10.0, 20.0]);
        bars[0].volume = 100;
        bars[1].volume = 300;
        // (10*100 + 20*300) / 400 = 17.5
        assert_eq!(vwap(&bars), 17.5);
    }

    #[test]
    fn vwap_zero_when_no_volume() {
        let mut bars = bars_from_closes(&[10.0, 20.0]);
        bars[0].volume = 0;
        bars[1].volume = 0;
        assert_eq!(vwap(&bars), 0.0);
    }

    #[test]
    fn rsi_is_100_for_monotonic_gains() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&bars_from_closes(&closes), 14), 100.0);
    }

    #[test]
    fn rsi_is_0_for_monotonic_losses() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert_eq!(rsi(&bars_from_closes(&closes), 14), 0.0);
    }

    #[test]
    fn rsi_neutral_with_short_history() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&bars_from_closes(&closes), 14), 50.0);
    }

    #[test]
    fn volume_velocity_neutral_below_ten_bars() {
        let bars = bars_from_closes(&[1.0; 9]);
        assert_eq!(volume_velocity(&bars), 1.0);
    }

    #[test]
    fn volume_velocity_ratio_against_prior_nine() {
        let mut bars = bars_from_closes(&[1.0; 10]);
        for bar in bars.iter_mut().take(9) {
            bar.volume = 100;
        }
        bars[9].volume = 300;
        assert_eq!(volume_velocity(&bars), 3.0);
    }

    #[test]
    fn gap_detection_thresholds() {
        let mut bar = bars_from_closes(&[100.0]).remove(0);
        bar.open = 102.0;
        assert_eq!(detect_gap(&bar, 100.0, 0.015), Some("gap_up"));
        bar.open = 98.0;
        assert_eq!(detect_gap(&bar, 100.0, 0.015), Some("gap_down"));
        bar.open = 100.5;
        assert_eq!(detect_gap(&bar, 100.0, 0.015), None);
        assert_eq!(detect_gap(&bar, 0.0, 0.015), None);
    }

    #[test]
    fn breakout_excludes_latest_bar_from_window() {
        let mut bars = bars_from_closes(&[100.0; 11]);
        bars[10].high = 101.0;
        assert_eq!(detect_intraday_breakout(&bars, 10), Some("breakout_high"));
        bars[10].high = 100.5; // equals the trailing window high
        assert_eq!(detect_intraday_breakout(&bars, 10), None);
        bars[10].low = 99.0;
        assert_eq!(detect_intraday_breakout(&bars, 10), Some("breakout_low"));
    }

    #[test]
    fn bollinger_position_neutral_and_extreme() {
        // Flat closes: zero std-dev, neutral position
        assert_eq!(bollinger_position(&bars_from_closes(&[50.0; 25]), 20), 0.5);
        // Strong rally ends near the upper band
        let closes: Vec<f64> = (0..25).map(|i| 100.0 + i as f64).collect();
        assert!(bollinger_position(&bars_from_closes(&closes), 20) > 0.9);
    }

    #[test]
    fn volatility_expansion_detects_range_growth() {
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap();
        let bars: Vec<PriceBar> = (0..40)
            .map(|i| {
                let range = if i < 20 { 0.5 } else { 2.0 };
                PriceBar {
                    open: 100.0,
                    high: 100.0 + range,
                    low: 100.0 - range,
                    close: 100.0,
                    volume: 1_000,
                    timestamp: start + Duration::minutes(i),
                }
            })
            .collect();
        assert!(volatility_expansion(&bars, 20, 1.5));
        // Flat volatility does not expand
        assert!(!volatility_expansion(&bars_from_closes(&[100.0; 40]), 20, 1.5));
    }

    #[test]
    fn timeframe_alignment_levels() {
        let up: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let down: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        let flat = vec![100.0; 20];

        let up_bars = bars_from_closes(&up);
        let down_bars = bars_from_closes(&down);
        let flat_bars = bars_from_closes(&flat);

        let full = timeframe_alignment(&up_bars, &up_bars, &up_bars);
        assert!(full.aligned);
        assert_eq!(full.direction, "bullish");
        assert_eq!(full.confidence, 0.9);

        let partial = timeframe_alignment(&down_bars, &down_bars, &flat_bars);
        assert!(partial.aligned);
        assert_eq!(partial.direction, "bearish");
        assert_eq!(partial.confidence, 0.6);

        let none = timeframe_alignment(&up_bars, &flat_bars, &down_bars);
        assert!(!none.aligned);
        assert_eq!(none.confidence, 0.0);
    }

    #[test]
    fn atr_uses_true_range_against_previous_close() {
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap();
        let bars = vec![
            PriceBar {
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1,
                timestamp: start,
            },
            // Gapped bar: true range stretches back to the previous close
            PriceBar {
                open: 105.0,
                high: 106.0,
                low: 104.0,
                close: 105.0,
                volume: 1,
                timestamp: start + Duration::minutes(1),
            },
        ];
        // max(106-104, |106-100|, |104-100|) = 6
        assert_eq!(atr(&bars, 14), 6.0);
    }
}
