// Message Parsing
// Normalizes the loose payload shapes that reach the queue: full analysis
// requests from the monitor, minimal hand-pushed messages, and everything in
// between. Anything unprocessable is a poison error, never a retry.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use common::TradeMode;
use serde_json::Value;

use crate::errors::WorkerError;

/// Optional processing knobs carried in the message's `overrides` object.
#[derive(Debug, Clone)]
pub struct Overrides {
    pub trade_mode: TradeMode,
    pub dry_run: bool,
    pub confidence_threshold: Option<f64>,
    pub show_reasoning: bool,
    pub selected_analysts: Vec<String>,
    pub model_name: String,
    pub model_provider: String,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            trade_mode: TradeMode::default(),
            dry_run: false,
            confidence_threshold: None,
            show_reasoning: false,
            selected_analysts: Vec::new(),
            model_name: "gpt-4.1".to_string(),
            model_provider: "OpenAI".to_string(),
        }
    }
}

/// A validated, normalized analysis request.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub tickers: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub overrides: Overrides,
    pub user_id: String,
    pub strategy_id: String,
    /// Original payload, kept for result records.
    pub raw: Value,
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn first_string(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.is_empty())
    })
}

fn parse_overrides(payload: &Value) -> Result<Overrides, WorkerError> {
    let raw = match payload.get("overrides") {
        None | Some(Value::Null) => return Ok(Overrides::default()),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(WorkerError::Poison(
                "'overrides' must be a JSON object when provided".to_string(),
            ))
        }
    };

    let defaults = Overrides::default();
    let trade_mode = match raw.get("trade_mode").and_then(Value::as_str) {
        Some("paper") => TradeMode::Paper,
        _ => TradeMode::Analysis,
    };

    Ok(Overrides {
        trade_mode,
        dry_run: raw.get("dry_run").and_then(Value::as_bool).unwrap_or(false),
        confidence_threshold: raw.get("confidence_threshold").and_then(Value::as_f64),
        show_reasoning: raw
            .get("show_reasoning")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        selected_analysts: raw
            .get("selected_analysts")
            .map(string_list)
            .unwrap_or_default(),
        model_name: raw
            .get("model_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(defaults.model_name),
        model_provider: raw
            .get("model_provider")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(defaults.model_provider),
    })
}

/// Parse and validate one queue message. Every rejection is a
/// [`WorkerError::Poison`] carrying the reason recorded on the dead letter.
pub fn parse_message(
    content: &str,
    now: DateTime<Utc>,
    default_lookback_days: i64,
) -> Result<ParsedRequest, WorkerError> {
    let payload: Value = serde_json::from_str(content)
        .map_err(|_| WorkerError::Poison("Message content is not valid JSON".to_string()))?;

    if !payload.is_object() {
        return Err(WorkerError::Poison(
            "Queue message payload must be a JSON object".to_string(),
        ));
    }

    let mut tickers = payload.get("tickers").map(string_list).unwrap_or_default();
    if tickers.is_empty() {
        if let Some(single) = first_string(&payload, &["ticker", "symbol", "asset"]) {
            tickers = vec![single];
        }
    }
    if tickers.is_empty() {
        return Err(WorkerError::Poison(
            "Queue message must include 'tickers' or a single 'ticker'/'symbol'".to_string(),
        ));
    }

    let tickers: Vec<String> = tickers
        .iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect();
    if tickers.is_empty() {
        return Err(WorkerError::Poison(
            "Queue message included an empty ticker list".to_string(),
        ));
    }

    let window = payload
        .get("analysis_window")
        .filter(|v| v.is_object())
        .cloned()
        .unwrap_or(Value::Null);

    let start_date = first_string(&window, &["start", "start_date"])
        .or_else(|| first_string(&payload, &["start", "start_date"]));
    let end_date = first_string(&window, &["end", "end_date"])
        .or_else(|| first_string(&payload, &["end", "end_date"]));

    let (start_date, end_date) = match (start_date, end_date) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            let lookback = payload
                .get("lookback_days")
                .or_else(|| payload.get("lookback"))
                .and_then(Value::as_i64)
                .unwrap_or(default_lookback_days);
            (
                (now - Duration::days(lookback)).to_rfc3339_opts(SecondsFormat::Micros, true),
                now.to_rfc3339_opts(SecondsFormat::Micros, true),
            )
        }
    };

    let overrides = parse_overrides(&payload)?;
    let user_id = first_string(&payload, &["user_id"]).unwrap_or_else(|| "queue-worker".into());
    let strategy_id = first_string(&payload, &["strategy_id"]).unwrap_or_else(|| "default".into());

    Ok(ParsedRequest {
        tickers,
        start_date,
        end_date,
        overrides,
        user_id,
        strategy_id,
        raw: payload,
    })
}
