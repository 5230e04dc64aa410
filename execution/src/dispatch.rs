// Order Dispatch
// Applies confidence and risk gates, reconciles position conflicts, and
// submits the resulting order sequence with settle delays between steps.

use std::collections::BTreeMap;
use std::time::Duration;

use common::{BrokerOrder, PortfolioDecision, TradeAction};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::errors::WorkerError;
use crate::persist::OrderStore;
use crate::reconcile::reconcile;

/// Delay between sub-orders of one reconciliation sequence, so the broker
/// releases shares held by the previous order before the next submission.
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Pull per-ticker risk limits out of the analyst signal map. Only entries
/// from risk-management agents count.
pub fn extract_risk_limits(analyst_signals: &Value) -> BTreeMap<String, Value> {
    let mut limits = BTreeMap::new();
    let Some(agents) = analyst_signals.as_object() else {
        return limits;
    };
    for (agent_id, payload) in agents {
        if !agent_id.starts_with("risk_management_agent") {
            continue;
        }
        let Some(tickers) = payload.as_object() else {
            continue;
        };
        for (ticker, details) in tickers {
            if details.is_object() {
                limits.insert(ticker.clone(), details.clone());
            }
        }
    }
    limits
}

async fn record(store: &dyn OrderStore, order: &BrokerOrder, metadata: &Value) {
    if let Err(err) = store.record_order(order, metadata).await {
        warn!(ticker = order.ticker, error = %err, "failed to record order");
    }
}

/// Dispatch paper orders for every decision. Infrastructure failures while
/// reading positions propagate; per-order submission failures become order
/// records with an error status.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch_paper_orders(
    broker: &dyn Broker,
    order_store: &dyn OrderStore,
    decisions: &BTreeMap<String, Value>,
    analyst_signals: &Value,
    current_prices: &BTreeMap<String, f64>,
    confidence_threshold: f64,
    settle_delay: Duration,
) -> Result<Vec<BrokerOrder>, WorkerError> {
    let risk_limits = extract_risk_limits(analyst_signals);
    let mut orders: Vec<BrokerOrder> = Vec::new();

    info!(
        decisions = decisions.len(),
        confidence_threshold, "dispatching paper orders"
    );

    for (ticker, raw_decision) in decisions {
        let decision: PortfolioDecision = match serde_json::from_value(raw_decision.clone()) {
            Ok(decision) => decision,
            Err(err) => {
                error!(ticker, error = %err, "invalid decision payload");
                let skipped = BrokerOrder::skipped(
                    ticker,
                    "unknown",
                    0,
                    "invalid_decision",
                    "Decision payload could not be parsed",
                );
                record(order_store, &skipped, &Value::Null).await;
                orders.push(skipped);
                continue;
            }
        };

        let action_str = decision.action.to_lowercase();
        if action_str == "hold" {
            info!(ticker, "action is hold, skipping order");
            continue;
        }
        let Some(action) = TradeAction::parse(&action_str) else {
            warn!(ticker, action = action_str, "unsupported action, skipping");
            let skipped = BrokerOrder::skipped(
                ticker,
                &action_str,
                decision.quantity,
                "skipped",
                &format!("Unsupported action: {action_str}"),
            );
            record(order_store, &skipped, &Value::Null).await;
            orders.push(skipped);
            continue;
        };

        let requested_quantity = decision.quantity;
        if requested_quantity <= 0 {
            info!(ticker, action = action_str, "non-positive quantity, skipping");
            let skipped = BrokerOrder::skipped(
                ticker,
                &action_str,
                requested_quantity,
                "skipped",
                "Non-positive quantity",
            );
            record(order_store, &skipped, &Value::Null).await;
            orders.push(skipped);
            continue;
        }

        if decision.confidence < confidence_threshold {
            warn!(
                ticker,
                confidence = decision.confidence,
                threshold = confidence_threshold,
                "confidence below threshold, skipping"
            );
            let skipped = BrokerOrder::skipped(
                ticker,
                &action_str,
                requested_quantity,
                "skipped_confidence",
                &format!(
                    "Confidence {:.1} below threshold {:.1}",
                    decision.confidence, confidence_threshold
                ),
            );
            record(order_store, &skipped, &Value::Null).await;
            orders.push(skipped);
            continue;
        }

        let position = broker.get_current_position(ticker).await?;
        info!(
            ticker,
            long = position.long,
            short = position.short,
            side = ?position.side,
            "current position"
        );

        if action == TradeAction::Short {
            let shortable = broker.check_shortable(ticker).await?;
            if !shortable.shortable {
                warn!(ticker, "cannot short, ticker is not shortable");
                let rejected = BrokerOrder::skipped(
                    ticker,
                    &action_str,
                    requested_quantity,
                    "rejected",
                    "Ticker not shortable",
                );
                record(
                    order_store,
                    &rejected,
                    &serde_json::json!({ "shortable_check": {
                        "shortable": shortable.shortable,
                        "easy_to_borrow": shortable.easy_to_borrow,
                    }}),
                )
                .await;
                orders.push(rejected);
                continue;
            }
        }

        // Risk limit cap: remaining dollar limit divided by current price
        let remaining_limit = risk_limits
            .get(ticker)
            .and_then(|details| details.get("remaining_position_limit"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let price = current_prices.get(ticker).copied().unwrap_or(0.0);
        let mut allowed_quantity = requested_quantity;

        if remaining_limit > 0.0 && price > 0.0 {
            let max_qty = (remaining_limit / price).floor() as i64;
            if max_qty <= 0 {
                info!(ticker, action = action_str, "risk limit allows zero shares, skipping");
                let skipped = BrokerOrder::skipped(
                    ticker,
                    &action_str,
                    requested_quantity,
                    "skipped",
                    "Risk limit allows zero shares",
                );
                record(
                    order_store,
                    &skipped,
                    &serde_json::json!({
                        "risk_remaining_limit": remaining_limit,
                        "current_price": price,
                    }),
                )
                .await;
                orders.push(skipped);
                continue;
            }
            allowed_quantity = requested_quantity.min(max_qty);
            if allowed_quantity < requested_quantity {
                info!(
                    ticker,
                    requested = requested_quantity,
                    allowed = allowed_quantity,
                    "risk limit reduced quantity"
                );
            }
        }

        let sequence = reconcile(ticker, &position, action, allowed_quantity);
        if sequence.is_empty() {
            warn!(ticker, "no orders generated after reconciliation");
            continue;
        }

        let total_steps = sequence.len();
        for (idx, sub_order) in sequence.iter().enumerate() {
            info!(
                ticker,
                step = idx + 1,
                total_steps,
                action = %sub_order.action,
                quantity = sub_order.quantity,
                reasoning = sub_order.reasoning,
                "executing order"
            );

            let order_decision = PortfolioDecision {
                action: sub_order.action.to_string(),
                quantity: sub_order.quantity,
                confidence: decision.confidence,
                reasoning: format!(
                    "{} | Reconciliation: {}",
                    decision.reasoning, sub_order.reasoning
                ),
            };

            let broker_order = broker.submit_order(ticker, &order_decision).await;
            if broker_order.status == "error" {
                error!(
                    ticker,
                    step = idx + 1,
                    error = ?broker_order.error,
                    "order submission failed"
                );
            } else {
                info!(
                    ticker,
                    step = idx + 1,
                    order_id = ?broker_order.order_id,
                    status = broker_order.status,
                    "order submitted"
                );
            }

            // Let each step settle before the next, and confirm the broker
            // has released the held shares.
            if idx < total_steps - 1 {
                tokio::time::sleep(settle_delay).await;
                if let Some(order_id) = broker_order
                    .order_id
                    .as_deref()
                    .filter(|_| !broker_order.dry_run)
                {
                    match broker.order_status(order_id).await {
                        Some(status) => info!(ticker, order_id, status, "previous order status"),
                        None => warn!(ticker, order_id, "could not verify previous order status"),
                    }
                }
            }

            let metadata = serde_json::json!({
                "original_decision": {
                    "action": decision.action,
                    "quantity": requested_quantity,
                    "confidence": decision.confidence,
                },
                "reconciliation": {
                    "step": idx + 1,
                    "total_steps": total_steps,
                    "reasoning": sub_order.reasoning,
                },
                "position_before": position,
                "risk_remaining_limit": if remaining_limit > 0.0 { Some(remaining_limit) } else { None },
                "current_price": if price > 0.0 { Some(price) } else { None },
            });

            record(order_store, &broker_order, &metadata).await;
            orders.push(broker_order);
        }
    }

    let failed = orders
        .iter()
        .filter(|o| o.status == "error" || o.status == "rejected")
        .count();
    info!(
        total = orders.len(),
        succeeded = orders.len() - failed,
        failed,
        "dispatch complete"
    );

    Ok(orders)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use common::Position;
    use tokio::sync::Mutex;

    use super::*;
    use crate::broker::{PortfolioSnapshot, ShortableInfo};
    use crate::persist::InMemoryOrderStore;

    struct MockBroker {
        position: Position,
        shortable: bool,
        submitted: Mutex<Vec<PortfolioDecision>>,
    }

    impl MockBroker {
        fn new(position: Position) -> Self {
            Self {
                position,
                shortable: true,
                submitted: Mutex::new(Vec::new()),
            }
        }

        fn not_shortable(position: Position) -> Self {
            Self {
                shortable: false,
                ..Self::new(position)
            }
        }
    }

    #[async_trait]
    impl Broker for MockBroker {
        async fn get_portfolio(
            &self,
            tickers: &[String],
        ) -> Result<PortfolioSnapshot, WorkerError> {
            Ok(PortfolioSnapshot::empty(100_000.0, tickers))
        }

        async fn get_current_position(&self, _ticker: &str) -> Result<Position, WorkerError> {
            Ok(self.position)
        }

        async fn check_shortable(&self, _ticker: &str) -> Result<ShortableInfo, WorkerError> {
            Ok(ShortableInfo {
                shortable: self.shortable,
                easy_to_borrow: self.shortable,
            })
        }

        async fn submit_order(&self, ticker: &str, decision: &PortfolioDecision) -> BrokerOrder {
            self.submitted.lock().await.push(decision.clone());
            BrokerOrder {
                ticker: ticker.to_string(),
                action: decision.action.clone(),
                quantity: decision.quantity,
                side: TradeAction::parse(&decision.action)
                    .map(|a| a.side().to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                order_id: Some(format!("mock-{}", decision.action)),
                status: "accepted".to_string(),
                submitted_at: None,
                filled_at: None,
                error: None,
                dry_run: false,
            }
        }

        async fn order_status(&self, _order_id: &str) -> Option<String> {
            Some("filled".to_string())
        }
    }

    fn decision(action: &str, quantity: i64, confidence: f64) -> Value {
        serde_json::json!({
            "action": action,
            "quantity": quantity,
            "confidence": confidence,
            "reasoning": "test decision",
        })
    }

    fn decisions_for(ticker: &str, value: Value) -> BTreeMap<String, Value> {
        BTreeMap::from([(ticker.to_string(), value)])
    }

    async fn run(
        broker: &MockBroker,
        store: &InMemoryOrderStore,
        decisions: BTreeMap<String, Value>,
        analyst_signals: Value,
        prices: BTreeMap<String, f64>,
    ) -> Vec<BrokerOrder> {
        dispatch_paper_orders(
            broker,
            store,
            &decisions,
            &analyst_signals,
            &prices,
            60.0,
            Duration::ZERO,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn conflicting_buy_submits_cover_then_buy() {
        let broker = MockBroker::new(Position::from_quantities(0, 50));
        let store = InMemoryOrderStore::new();

        let orders = run(
            &broker,
            &store,
            decisions_for("AAPL", decision("buy", 30, 80.0)),
            Value::Null,
            BTreeMap::new(),
        )
        .await;

        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].action, "cover");
        assert_eq!(orders[0].quantity, 50);
        assert_eq!(orders[1].action, "buy");
        assert_eq!(orders[1].quantity, 30);

        let submitted = broker.submitted.lock().await;
        assert_eq!(submitted.len(), 2);
        assert!(submitted[0].reasoning.contains("Reconciliation:"));
        assert_eq!(store.orders().await.len(), 2);
    }

    #[tokio::test]
    async fn low_confidence_decision_is_skipped_before_broker_calls() {
        let broker = MockBroker::new(Position::flat());
        let store = InMemoryOrderStore::new();

        let orders = run(
            &broker,
            &store,
            decisions_for("AAPL", decision("buy", 10, 45.0)),
            Value::Null,
            BTreeMap::new(),
        )
        .await;

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, "skipped_confidence");
        assert!(broker.submitted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn hold_and_invalid_decisions_are_skipped() {
        let broker = MockBroker::new(Position::flat());
        let store = InMemoryOrderStore::new();

        let mut decisions = decisions_for("AAPL", decision("hold", 10, 90.0));
        decisions.insert("NVDA".into(), decision("buy", 0, 90.0));

        let orders = run(&broker, &store, decisions, Value::Null, BTreeMap::new()).await;
        // hold is a no-op; the zero-quantity buy leaves a skip record
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].ticker, "NVDA");
        assert_eq!(orders[0].status, "skipped");
        assert!(broker.submitted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unshortable_ticker_yields_rejected_record() {
        let broker = MockBroker::not_shortable(Position::flat());
        let store = InMemoryOrderStore::new();

        let orders = run(
            &broker,
            &store,
            decisions_for("GME", decision("short", 10, 90.0)),
            Value::Null,
            BTreeMap::new(),
        )
        .await;

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, "rejected");
        assert_eq!(orders[0].error.as_deref(), Some("Ticker not shortable"));
        assert!(broker.submitted.lock().await.is_empty());
        assert_eq!(store.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn risk_limit_caps_quantity() {
        let broker = MockBroker::new(Position::flat());
        let store = InMemoryOrderStore::new();

        let signals = serde_json::json!({
            "risk_management_agent": {
                "AAPL": { "remaining_position_limit": 1000.0 }
            },
            "sentiment_agent": {
                "AAPL": { "remaining_position_limit": 999999.0 }
            }
        });
        let prices = BTreeMap::from([("AAPL".to_string(), 200.0)]);

        let orders = run(
            &broker,
            &store,
            decisions_for("AAPL", decision("buy", 50, 90.0)),
            signals,
            prices,
        )
        .await;

        // 1000 / 200 = 5 shares max
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].quantity, 5);
    }

    #[tokio::test]
    async fn zero_share_risk_limit_skips_order() {
        let broker = MockBroker::new(Position::flat());
        let store = InMemoryOrderStore::new();

        let signals = serde_json::json!({
            "risk_management_agent": { "AAPL": { "remaining_position_limit": 100.0 } }
        });
        let prices = BTreeMap::from([("AAPL".to_string(), 200.0)]);

        let orders = run(
            &broker,
            &store,
            decisions_for("AAPL", decision("buy", 50, 90.0)),
            signals,
            prices,
        )
        .await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, "skipped");
        assert_eq!(orders[0].error.as_deref(), Some("Risk limit allows zero shares"));
        assert!(broker.submitted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn sell_without_position_generates_no_orders() {
        let broker = MockBroker::new(Position::flat());
        let store = InMemoryOrderStore::new();

        let orders = run(
            &broker,
            &store,
            decisions_for("AAPL", decision("sell", 10, 90.0)),
            Value::Null,
            BTreeMap::new(),
        )
        .await;
        assert!(orders.is_empty());
    }

    #[test]
    fn risk_limits_come_only_from_risk_agents() {
        let signals = serde_json::json!({
            "risk_management_agent_v2": { "AAPL": { "remaining_position_limit": 500.0 } },
            "momentum_agent": { "AAPL": { "remaining_position_limit": 9.0 } },
            "risk_management_agent": "not an object"
        });
        let limits = extract_risk_limits(&signals);
        assert_eq!(limits.len(), 1);
        assert_eq!(limits["AAPL"]["remaining_position_limit"], 500.0);
    }

    #[tokio::test]
    async fn no_decisions_yields_no_orders() {
        let broker: Arc<dyn Broker> = Arc::new(MockBroker::new(Position::flat()));
        let store = InMemoryOrderStore::new();
        let orders = dispatch_paper_orders(
            broker.as_ref(),
            &store,
            &BTreeMap::new(),
            &Value::Null,
            &BTreeMap::new(),
            60.0,
            Duration::ZERO,
        )
        .await
        .unwrap();
        assert!(orders.is_empty());
    }
}
