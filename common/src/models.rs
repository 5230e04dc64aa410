// Core Data Model
// Shared between the monitor orchestrator and the queue worker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single OHLCV bar. Sequences of bars are ordered non-decreasing by
/// timestamp; callers must skip bars with a zero close before doing
/// percent-change math.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
}

/// Priority tier assigned to a detected signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Deterministic tier from the number of triggered reasons and the
    /// overall confidence.
    pub fn from_signals(reason_count: usize, confidence: f64) -> Self {
        if reason_count >= 4 && confidence > 0.8 {
            Priority::Critical
        } else if reason_count >= 3 && confidence > 0.7 {
            Priority::High
        } else if reason_count >= 2 && confidence > 0.6 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    /// Re-tier after a fast-candidate confidence merge.
    pub fn from_combined_confidence(self, combined: f64) -> Self {
        if combined > 0.85 {
            Priority::Critical
        } else if combined > 0.75 {
            Priority::High
        } else {
            self
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Outcome of one signal-detection evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResult {
    pub triggered: bool,
    pub reasons: Vec<String>,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub metrics: BTreeMap<String, f64>,
    pub priority: Priority,
}

impl SignalResult {
    /// Neutral result for insufficient history.
    pub fn neutral() -> Self {
        Self {
            triggered: false,
            reasons: Vec::new(),
            confidence: 0.0,
            metrics: BTreeMap::new(),
            priority: Priority::Low,
        }
    }
}

/// Lifecycle of a fast-pass candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    PendingConfirmation,
    Confirmed,
    RejectedNoConfirmation,
    RejectedLowConfidence,
    Validated,
    Invalidated,
}

/// Provisional signal produced by the 1-minute fast pass, confirmed or
/// rejected by the 5-minute main pass, then validated by the 15-minute
/// validation pass. Keyed by a synthetic id of ticker + detection epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastCandidate {
    pub id: String,
    pub ticker: String,
    pub detected_at: DateTime<Utc>,
    pub trigger_price: f64,
    pub instant_change: f64,
    pub confidence: f64,
    pub status: CandidateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_rsi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_price_change: Option<f64>,
}

impl FastCandidate {
    pub fn new(
        ticker: &str,
        detected_at: DateTime<Utc>,
        trigger_price: f64,
        instant_change: f64,
        confidence: f64,
    ) -> Self {
        Self {
            id: format!("{}_fast_{}", ticker, detected_at.timestamp()),
            ticker: ticker.to_string(),
            detected_at,
            trigger_price,
            instant_change,
            confidence,
            status: CandidateStatus::PendingConfirmation,
            confirmed_at: None,
            final_confidence: None,
            validation_score: None,
            validated_at: None,
            validation_rsi: None,
            validation_price: None,
            validation_price_change: None,
        }
    }

    /// Direction implied by the original instantaneous move.
    pub fn is_bullish(&self) -> bool {
        self.instant_change > 0.0
    }
}

/// Per-ticker cooldown state. At most one record per ticker; written only
/// after a successful enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownRecord {
    pub ticker: String,
    pub last_triggered_utc: DateTime<Utc>,
    pub last_reasons: Vec<String>,
}

/// ISO date range for a downstream analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationHints {
    pub related_watchlist: Vec<String>,
    pub basis: Vec<String>,
}

/// Analysis request enqueued by the monitor and consumed by the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub tickers: Vec<String>,
    pub analysis_window: AnalysisWindow,
    pub user_id: String,
    pub strategy_id: String,
    pub confidence: f64,
    pub priority: Priority,
    pub detection_method: String,
    pub market_snapshot: BTreeMap<String, f64>,
    pub signals: Vec<String>,
    pub triggered_at: String,
    pub correlation_hints: CorrelationHints,
}

/// Exit message enqueued when a confirmed signal fails validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitSignal {
    pub action: String,
    pub tickers: Vec<String>,
    pub reason: String,
    pub validation_score: u32,
    pub triggered_at: String,
    pub detection_method: String,
    pub user_id: String,
    pub strategy_id: String,
}

/// Envelope for messages that can never succeed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    #[serde(rename = "originalMessageId")]
    pub original_message_id: Option<String>,
    pub reason: String,
    pub content: Option<String>,
    #[serde(rename = "deadLetteredAt")]
    pub dead_lettered_at: String,
}

/// Order actions understood by the broker seam
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Short,
    Cover,
}

impl TradeAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action.to_ascii_lowercase().as_str() {
            "buy" => Some(TradeAction::Buy),
            "sell" => Some(TradeAction::Sell),
            "short" => Some(TradeAction::Short),
            "cover" => Some(TradeAction::Cover),
            _ => None,
        }
    }

    /// Broker-side order side for this action. Shorts are sells and covers
    /// are buys at the wire level.
    pub fn side(&self) -> &'static str {
        match self {
            TradeAction::Buy | TradeAction::Cover => "buy",
            TradeAction::Sell | TradeAction::Short => "sell",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
            TradeAction::Short => "short",
            TradeAction::Cover => "cover",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

/// Broker position snapshot. Long and short are mutually exclusive by broker
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub long: i64,
    pub short: i64,
    pub side: PositionSide,
}

impl Position {
    pub fn flat() -> Self {
        Self {
            long: 0,
            short: 0,
            side: PositionSide::Flat,
        }
    }

    /// Derive the side from quantities: flat iff both are zero.
    pub fn from_quantities(long: i64, short: i64) -> Self {
        let side = if long == 0 && short == 0 {
            PositionSide::Flat
        } else if long > 0 {
            PositionSide::Long
        } else {
            PositionSide::Short
        };
        Self { long, short, side }
    }
}

/// Per-ticker decision produced by the trade-decision collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioDecision {
    pub action: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Paper,
    Analysis,
}

impl Default for TradeMode {
    fn default() -> Self {
        TradeMode::Analysis
    }
}

/// Record of one broker submission. Immutable after creation except status
/// and error, which reflect the broker response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub ticker: String,
    pub action: String,
    pub quantity: i64,
    pub side: String,
    pub order_id: Option<String>,
    pub status: String,
    pub submitted_at: Option<String>,
    pub filled_at: Option<String>,
    pub error: Option<String>,
    pub dry_run: bool,
}

impl BrokerOrder {
    /// Order record for a business-rule skip (non-positive quantity, low
    /// confidence, unsupported action, ...). Not an error.
    pub fn skipped(ticker: &str, action: &str, quantity: i64, status: &str, error: &str) -> Self {
        let side = TradeAction::parse(action)
            .map(|a| a.side().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            ticker: ticker.to_string(),
            action: action.to_string(),
            quantity,
            side,
            order_id: None,
            status: status.to_string(),
            submitted_at: None,
            filled_at: None,
            error: Some(error.to_string()),
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ladder() {
        assert_eq!(Priority::from_signals(4, 0.85), Priority::Critical);
        assert_eq!(Priority::from_signals(3, 0.75), Priority::High);
        assert_eq!(Priority::from_signals(2, 0.65), Priority::Medium);
        assert_eq!(Priority::from_signals(1, 0.95), Priority::Low);
        // Confidence alone is not enough to escalate
        assert_eq!(Priority::from_signals(4, 0.8), Priority::High);
    }

    #[test]
    fn position_side_derivation() {
        assert_eq!(Position::from_quantities(0, 0).side, PositionSide::Flat);
        assert_eq!(Position::from_quantities(10, 0).side, PositionSide::Long);
        assert_eq!(Position::from_quantities(0, 5).side, PositionSide::Short);
    }

    #[test]
    fn candidate_synthetic_id() {
        let at = DateTime::parse_from_rfc3339("2025-06-02T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let candidate = FastCandidate::new("AAPL", at, 187.5, 0.006, 0.65);
        assert_eq!(candidate.id, format!("AAPL_fast_{}", at.timestamp()));
        assert_eq!(candidate.status, CandidateStatus::PendingConfirmation);
        assert!(candidate.is_bullish());
    }

    #[test]
    fn trade_action_sides() {
        assert_eq!(TradeAction::Buy.side(), "buy");
        assert_eq!(TradeAction::Cover.side(), "buy");
        assert_eq!(TradeAction::Sell.side(), "sell");
        assert_eq!(TradeAction::Short.side(), "sell");
        assert_eq!(TradeAction::parse("HOLD"), None);
    }

    #[test]
    fn dead_letter_serializes_with_wire_field_names() {
        let msg = DeadLetterMessage {
            original_message_id: Some("abc".into()),
            reason: "invalid json".into(),
            content: None,
            dead_lettered_at: "2025-06-02T14:30:00+00:00".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("originalMessageId").is_some());
        assert!(json.get("deadLetteredAt").is_some());
    }
}
