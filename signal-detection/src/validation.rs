// Post-Confirmation Validation
// Scores a confirmed candidate 0-100 against fresh bars. Candidates scoring
// under the exit threshold get an exit signal rather than a trade request.

use common::PriceBar;
use tracing::debug;

use crate::indicators::rsi;

/// Direction implied by the candidate's instant change at detection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    pub fn from_instant_change(instant_change: f64) -> Self {
        if instant_change > 0.0 {
            Direction::Bullish
        } else {
            Direction::Bearish
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Bullish => "bullish",
            Direction::Bearish => "bearish",
        }
    }
}

/// Outcome of the validation scoring pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationAssessment {
    /// 0-100; sum of the four component awards.
    pub score: u32,
    pub rsi: f64,
    pub current_price: f64,
    /// Fractional change from the trigger price, rounded to 6 decimals.
    pub price_change: f64,
}

/// Score a confirmed candidate against 5-minute bars covering the last hour.
///
/// Components: price continued in the trigger direction (+30), directional
/// bar count over the last 5 transitions at least 3 (+20), RSI inside the
/// 30-70 neutral band (+20), recent volume at least 80% of the earlier
/// window (+30). Caller is expected to supply at least 6 bars.
pub fn assess_confirmation(
    ticker: &str,
    bars: &[PriceBar],
    trigger_price: f64,
    direction: Direction,
) -> ValidationAssessment {
    let current_price = bars.last().map(|b| b.close).unwrap_or(0.0);
    let mut score = 0u32;

    // 1. Price continued in the expected direction
    let price_change = if trigger_price > 0.0 {
        let change = (current_price - trigger_price) / trigger_price;
        let continued = match direction {
            Direction::Bullish => change > 0.0,
            Direction::Bearish => change < 0.0,
        };
        if continued {
            score += 30;
        }
        (change * 1_000_000.0).round() / 1_000_000.0
    } else {
        0.0
    };

    // 2. Momentum: directional bar count over the last 5 transitions
    if bars.len() >= 6 {
        let tail = &bars[bars.len() - 6..];
        let trend: i32 = tail
            .windows(2)
            .map(|pair| if pair[1].close > pair[0].close { 1 } else { -1 })
            .sum();
        if trend.abs() >= 3 {
            score += 20;
        }
    }

    // 3. RSI inside the neutral band
    let rsi_value = rsi(bars, 14);
    if rsi_value > 30.0 && rsi_value < 70.0 {
        score += 20;
    }

    // 4. Volume held up against the earlier window
    if bars.len() >= 9 {
        let recent: f64 =
            bars[bars.len() - 3..].iter().map(|b| b.volume as f64).sum::<f64>() / 3.0;
        let earlier: f64 = bars[bars.len() - 9..bars.len() - 3]
            .iter()
            .map(|b| b.volume as f64)
            .sum::<f64>()
            / 6.0;
        if earlier > 0.0 && recent / earlier >= 0.8 {
            score += 30;
        }
    }

    debug!(
        ticker,
        score,
        rsi = rsi_value,
        price_change,
        direction = direction.as_str(),
        "validation assessed"
    );

    ValidationAssessment {
        score,
        rsi: rsi_value,
        current_price,
        price_change,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(closes: &[f64], volumes: &[u64]) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap();
        closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (&close, &volume))| PriceBar {
                open: close,
                high: close + 0.1,
                low: close - 0.1,
                close,
                volume,
                timestamp: start + Duration::minutes(i as i64 * 5),
            })
            .collect()
    }

    #[test]
    fn sustained_bullish_move_scores_full_marks() {
        // Steady climb, healthy volume: direction 30 + momentum 20 + rsi 20 + volume 30
        let closes: Vec<f64> = (0..12).map(|i| 100.0 + i as f64 * 0.2).collect();
        let volumes = vec![10_000u64; 12];
        let history = bars(&closes, &volumes);

        // Zig-zag the early tape so RSI stays off the 100 rail
        let mut history = history;
        history[2].close -= 0.3;
        history[5].close -= 0.3;
        history[8].close -= 0.25;

        let assessment = assess_confirmation("AAPL", &history, 100.0, Direction::Bullish);
        assert_eq!(assessment.score, 100);
        assert!(assessment.rsi > 30.0 && assessment.rsi < 70.0);
        assert!(assessment.price_change > 0.0);
    }

    #[test]
    fn reversal_with_fading_volume_scores_below_exit_threshold() {
        // Bullish trigger at 102 but price sagged and volume dried up
        let closes = vec![
            101.8, 101.6, 101.7, 101.5, 101.6, 101.4, 101.5, 101.3, 101.4, 101.2, 101.3, 101.1,
        ];
        let volumes = vec![
            20_000, 20_000, 20_000, 19_000, 19_000, 18_000, 18_000, 17_000, 4_000, 4_000, 4_000,
            4_000,
        ];
        let history = bars(&closes, &volumes);

        let assessment = assess_confirmation("AAPL", &history, 102.0, Direction::Bullish);
        // Direction failed (price below trigger), momentum alternates,
        // volume collapsed; only RSI can contribute.
        assert!(assessment.score < 30);
        assert!(assessment.price_change < 0.0);
    }

    #[test]
    fn bearish_continuation_earns_direction_points() {
        let closes = vec![99.0, 98.8, 98.9, 98.6, 98.7, 98.4, 98.5, 98.2, 98.3, 98.0];
        let volumes = vec![10_000u64; 10];
        let history = bars(&closes, &volumes);

        let assessment = assess_confirmation("TSLA", &history, 100.0, Direction::Bearish);
        assert!(assessment.score >= 30);
        assert!(assessment.price_change < 0.0);
    }

    #[test]
    fn zero_trigger_price_reports_zero_change() {
        let closes = vec![100.0; 10];
        let volumes = vec![10_000u64; 10];
        let assessment =
            assess_confirmation("X", &bars(&closes, &volumes), 0.0, Direction::Bullish);
        assert_eq!(assessment.price_change, 0.0);
        assert_eq!(assessment.current_price, 100.0);
    }
}
