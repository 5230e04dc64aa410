// Broker Seam
// Trait boundary over the paper-trading REST API plus the production Alpaca
// implementation. Missing credentials degrade to dry-run instead of failing.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use common::{BrokerOrder, PortfolioDecision, Position, TradeAction};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{error, warn};

use crate::errors::WorkerError;

const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";
const DRY_RUN_CASH: f64 = 100_000.0;
// Default margin requirement for pattern day traders
const MARGIN_REQUIREMENT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct ShortableInfo {
    pub shortable: bool,
    pub easy_to_borrow: bool,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PositionDetail {
    pub long: i64,
    pub short: i64,
    pub long_cost_basis: f64,
    pub short_cost_basis: f64,
    pub short_margin_used: f64,
}

/// Account-wide snapshot shaped for the decision collaborator.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PortfolioSnapshot {
    pub cash: f64,
    pub portfolio_value: f64,
    pub margin_requirement: f64,
    pub margin_used: f64,
    pub positions: BTreeMap<String, PositionDetail>,
}

impl PortfolioSnapshot {
    /// Empty snapshot with zeroed entries for the requested tickers.
    pub fn empty(cash: f64, tickers: &[String]) -> Self {
        Self {
            cash,
            portfolio_value: cash,
            margin_requirement: MARGIN_REQUIREMENT,
            margin_used: 0.0,
            positions: tickers
                .iter()
                .map(|t| (t.clone(), PositionDetail::default()))
                .collect(),
        }
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn get_portfolio(&self, tickers: &[String]) -> Result<PortfolioSnapshot, WorkerError>;
    async fn get_current_position(&self, ticker: &str) -> Result<Position, WorkerError>;
    async fn check_shortable(&self, ticker: &str) -> Result<ShortableInfo, WorkerError>;
    /// Submit one market order. Failures are folded into the returned
    /// record's status rather than surfaced as errors.
    async fn submit_order(&self, ticker: &str, decision: &PortfolioDecision) -> BrokerOrder;
    /// Best-effort status poll for a previously submitted order.
    async fn order_status(&self, order_id: &str) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    cash: String,
    portfolio_value: String,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    symbol: String,
    qty: String,
    avg_entry_price: String,
    market_value: String,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    shortable: bool,
    easy_to_borrow: bool,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    submitted_at: Option<String>,
    filled_at: Option<String>,
}

fn parse_num(raw: &str) -> f64 {
    raw.parse().unwrap_or(0.0)
}

pub struct AlpacaBroker {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    secret: String,
    confidence_threshold: f64,
    dry_run: bool,
}

impl AlpacaBroker {
    pub fn new(confidence_threshold: f64, dry_run: bool) -> Result<Self, WorkerError> {
        Self::with_base_url(PAPER_BASE_URL, confidence_threshold, dry_run)
    }

    pub fn with_base_url(
        base_url: &str,
        confidence_threshold: f64,
        mut dry_run: bool,
    ) -> Result<Self, WorkerError> {
        let key_id = std::env::var("APCA_API_KEY_ID")
            .or_else(|_| std::env::var("ALPACA_API_KEY_ID"))
            .unwrap_or_default();
        let secret = std::env::var("APCA_API_SECRET_KEY")
            .or_else(|_| std::env::var("ALPACA_API_SECRET_KEY"))
            .unwrap_or_default();

        if !dry_run && (key_id.is_empty() || secret.is_empty()) {
            warn!("missing broker credentials, falling back to dry-run mode");
            dry_run = true;
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| WorkerError::Fatal(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id,
            secret,
            confidence_threshold,
            dry_run,
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .header("APCA-API-KEY-ID", &self.key_id)
            .header("APCA-API-SECRET-KEY", &self.secret)
    }
}

fn dry_run_order(ticker: &str, action: TradeAction, quantity: i64) -> BrokerOrder {
    let now = Utc::now();
    BrokerOrder {
        ticker: ticker.to_string(),
        action: action.to_string(),
        quantity,
        side: action.side().to_string(),
        order_id: Some(format!("dry-{}-{}", ticker, now.timestamp_millis())),
        status: "accepted_dry_run".to_string(),
        submitted_at: Some(now.to_rfc3339()),
        filled_at: None,
        error: None,
        dry_run: true,
    }
}

fn submitted_order(
    ticker: &str,
    action: TradeAction,
    quantity: i64,
    response: OrderResponse,
) -> BrokerOrder {
    BrokerOrder {
        ticker: ticker.to_string(),
        action: action.to_string(),
        quantity,
        side: action.side().to_string(),
        order_id: Some(response.id),
        status: response.status,
        submitted_at: response.submitted_at,
        filled_at: response.filled_at,
        error: None,
        dry_run: false,
    }
}

#[async_trait]
impl Broker for AlpacaBroker {
    async fn get_portfolio(&self, tickers: &[String]) -> Result<PortfolioSnapshot, WorkerError> {
        if self.dry_run {
            return Ok(PortfolioSnapshot::empty(DRY_RUN_CASH, tickers));
        }

        let account: AccountResponse = self
            .get("/v2/account")
            .send()
            .await?
            .error_for_status()
            .map_err(|e| WorkerError::Transient(e.to_string()))?
            .json()
            .await?;
        let positions: Vec<PositionResponse> = self
            .get("/v2/positions")
            .send()
            .await?
            .error_for_status()
            .map_err(|e| WorkerError::Transient(e.to_string()))?
            .json()
            .await?;

        let mut snapshot = PortfolioSnapshot::empty(parse_num(&account.cash), tickers);
        snapshot.portfolio_value = parse_num(&account.portfolio_value);

        for position in positions {
            let qty: i64 = position.qty.parse().unwrap_or(0);
            let entry = snapshot.positions.entry(position.symbol.clone()).or_default();
            if qty > 0 {
                entry.long = qty;
                entry.long_cost_basis = parse_num(&position.avg_entry_price);
            } else if qty < 0 {
                entry.short = qty.abs();
                entry.short_cost_basis = parse_num(&position.avg_entry_price);
                entry.short_margin_used =
                    parse_num(&position.market_value).abs() * snapshot.margin_requirement;
                snapshot.margin_used += entry.short_margin_used;
            }
        }

        Ok(snapshot)
    }

    async fn get_current_position(&self, ticker: &str) -> Result<Position, WorkerError> {
        if self.dry_run {
            return Ok(Position::flat());
        }

        let response = self.get(&format!("/v2/positions/{ticker}")).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Position::flat());
        }
        let position: PositionResponse = response
            .error_for_status()
            .map_err(|e| WorkerError::Transient(e.to_string()))?
            .json()
            .await?;

        let qty: i64 = position.qty.parse().unwrap_or(0);
        Ok(Position::from_quantities(qty.max(0), (-qty).max(0)))
    }

    async fn check_shortable(&self, ticker: &str) -> Result<ShortableInfo, WorkerError> {
        if self.dry_run {
            return Ok(ShortableInfo {
                shortable: true,
                easy_to_borrow: true,
            });
        }

        let asset: AssetResponse = self
            .get(&format!("/v2/assets/{ticker}"))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| WorkerError::Transient(e.to_string()))?
            .json()
            .await?;
        Ok(ShortableInfo {
            shortable: asset.shortable,
            easy_to_borrow: asset.easy_to_borrow,
        })
    }

    async fn submit_order(&self, ticker: &str, decision: &PortfolioDecision) -> BrokerOrder {
        let action = match TradeAction::parse(&decision.action) {
            Some(action) => action,
            None => {
                return BrokerOrder::skipped(
                    ticker,
                    &decision.action,
                    decision.quantity,
                    "skipped",
                    &format!("Unsupported action: {}", decision.action),
                )
            }
        };

        if decision.quantity <= 0 {
            return BrokerOrder::skipped(
                ticker,
                &decision.action,
                decision.quantity,
                "skipped",
                "Non-positive quantity",
            );
        }

        if decision.confidence < self.confidence_threshold {
            return BrokerOrder::skipped(
                ticker,
                &decision.action,
                decision.quantity,
                "skipped_confidence",
                "Decision confidence below threshold",
            );
        }

        if self.dry_run {
            return dry_run_order(ticker, action, decision.quantity);
        }

        let body = serde_json::json!({
            "symbol": ticker,
            "qty": decision.quantity.to_string(),
            "side": action.side(),
            "type": "market",
            "time_in_force": "day",
        });

        let result = self
            .http
            .post(format!("{}/v2/orders", self.base_url))
            .header("APCA-API-KEY-ID", &self.key_id)
            .header("APCA-API-SECRET-KEY", &self.secret)
            .json(&body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                error!(ticker, error = %err, "order submission failed");
                return BrokerOrder::skipped(
                    ticker,
                    &decision.action,
                    decision.quantity,
                    "error",
                    &err.to_string(),
                );
            }
        };

        match response.error_for_status() {
            Ok(ok) => match ok.json::<OrderResponse>().await {
                Ok(parsed) => submitted_order(ticker, action, decision.quantity, parsed),
                Err(err) => BrokerOrder::skipped(
                    ticker,
                    &decision.action,
                    decision.quantity,
                    "error",
                    &err.to_string(),
                ),
            },
            Err(err) => {
                error!(ticker, error = %err, "order rejected by broker");
                BrokerOrder::skipped(
                    ticker,
                    &decision.action,
                    decision.quantity,
                    "error",
                    &err.to_string(),
                )
            }
        }
    }

    async fn order_status(&self, order_id: &str) -> Option<String> {
        if self.dry_run {
            return Some("filled".to_string());
        }
        let response = self
            .get(&format!("/v2/orders/{order_id}"))
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;
        let order: OrderResponse = response.json().await.ok()?;
        Some(order.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_response_maps_into_broker_order() {
        let response = OrderResponse {
            id: "abc-123".to_string(),
            status: "accepted".to_string(),
            submitted_at: Some("2025-06-02T16:00:00Z".to_string()),
            filled_at: None,
        };
        let order = submitted_order("AAPL", TradeAction::Buy, 10, response);
        assert_eq!(order.order_id.as_deref(), Some("abc-123"));
        assert_eq!(order.status, "accepted");
        assert_eq!(order.side, "buy");
        assert!(!order.dry_run);
        assert!(order.error.is_none());
    }

    #[test]
    fn dry_run_order_is_marked() {
        let order = dry_run_order("NVDA", TradeAction::Short, 5);
        assert_eq!(order.status, "accepted_dry_run");
        assert_eq!(order.side, "sell");
        assert!(order.dry_run);
        assert!(order.order_id.unwrap().starts_with("dry-NVDA-"));
    }

    #[test]
    fn empty_snapshot_seeds_requested_tickers() {
        let snapshot = PortfolioSnapshot::empty(50_000.0, &["AAPL".into(), "MSFT".into()]);
        assert_eq!(snapshot.cash, 50_000.0);
        assert_eq!(snapshot.positions.len(), 2);
        assert_eq!(snapshot.positions["AAPL"].long, 0);
    }
}
