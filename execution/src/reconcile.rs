// Position Reconciliation
// Turns a desired action into the order sequence that gets there without
// ever holding long and short simultaneously: conflicting side is flattened
// first, reductions are capped at what is actually held.

use common::{Position, PositionSide, TradeAction};
use tracing::{info, warn};

/// One step of a reconciled order sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SubOrder {
    pub action: TradeAction,
    /// Quantity this step will submit.
    pub quantity: i64,
    /// Quantity the original decision asked for.
    pub requested: i64,
    pub reasoning: String,
}

impl SubOrder {
    fn new(action: TradeAction, quantity: i64, requested: i64, reasoning: String) -> Self {
        Self {
            action,
            quantity,
            requested,
            reasoning,
        }
    }
}

/// Reconcile the current position with a desired action. Returns the orders
/// to submit in sequence; empty when the action cannot apply (selling with
/// no long, covering with no short).
pub fn reconcile(
    ticker: &str,
    position: &Position,
    action: TradeAction,
    desired_quantity: i64,
) -> Vec<SubOrder> {
    let mut orders = Vec::new();

    match action {
        TradeAction::Buy => {
            if position.side == PositionSide::Short {
                info!(
                    ticker,
                    short = position.short,
                    desired = desired_quantity,
                    "position conflict, flattening short before buying"
                );
                orders.push(SubOrder::new(
                    TradeAction::Cover,
                    position.short,
                    desired_quantity,
                    format!(
                        "Closing {} SHORT shares before opening LONG position",
                        position.short
                    ),
                ));
                orders.push(SubOrder::new(
                    TradeAction::Buy,
                    desired_quantity,
                    desired_quantity,
                    format!("Opening {desired_quantity} LONG shares after closing SHORT"),
                ));
            } else if position.side == PositionSide::Long {
                orders.push(SubOrder::new(
                    TradeAction::Buy,
                    desired_quantity,
                    desired_quantity,
                    format!(
                        "Adding {desired_quantity} shares to existing LONG {}",
                        position.long
                    ),
                ));
            } else {
                orders.push(SubOrder::new(
                    TradeAction::Buy,
                    desired_quantity,
                    desired_quantity,
                    format!("Opening {desired_quantity} LONG shares from flat position"),
                ));
            }
        }

        TradeAction::Short => {
            if position.side == PositionSide::Long {
                info!(
                    ticker,
                    long = position.long,
                    desired = desired_quantity,
                    "position conflict, flattening long before shorting"
                );
                orders.push(SubOrder::new(
                    TradeAction::Sell,
                    position.long,
                    desired_quantity,
                    format!(
                        "Closing {} LONG shares before opening SHORT position",
                        position.long
                    ),
                ));
                orders.push(SubOrder::new(
                    TradeAction::Short,
                    desired_quantity,
                    desired_quantity,
                    format!("Opening {desired_quantity} SHORT shares after closing LONG"),
                ));
            } else if position.side == PositionSide::Short {
                orders.push(SubOrder::new(
                    TradeAction::Short,
                    desired_quantity,
                    desired_quantity,
                    format!(
                        "Adding {desired_quantity} shares to existing SHORT {}",
                        position.short
                    ),
                ));
            } else {
                orders.push(SubOrder::new(
                    TradeAction::Short,
                    desired_quantity,
                    desired_quantity,
                    format!("Opening {desired_quantity} SHORT shares from flat position"),
                ));
            }
        }

        TradeAction::Sell => {
            if position.side == PositionSide::Long {
                if desired_quantity <= position.long {
                    orders.push(SubOrder::new(
                        TradeAction::Sell,
                        desired_quantity,
                        desired_quantity,
                        format!("Selling {desired_quantity} from LONG {}", position.long),
                    ));
                } else {
                    warn!(
                        ticker,
                        requested = desired_quantity,
                        held = position.long,
                        "sell exceeds long position, selling all"
                    );
                    orders.push(SubOrder::new(
                        TradeAction::Sell,
                        position.long,
                        desired_quantity,
                        format!(
                            "Selling all {} LONG shares (requested {desired_quantity})",
                            position.long
                        ),
                    ));
                }
            } else {
                warn!(ticker, side = ?position.side, "sell requested with no long position");
            }
        }

        TradeAction::Cover => {
            if position.side == PositionSide::Short {
                if desired_quantity <= position.short {
                    orders.push(SubOrder::new(
                        TradeAction::Cover,
                        desired_quantity,
                        desired_quantity,
                        format!("Covering {desired_quantity} from SHORT {}", position.short),
                    ));
                } else {
                    warn!(
                        ticker,
                        requested = desired_quantity,
                        held = position.short,
                        "cover exceeds short position, covering all"
                    );
                    orders.push(SubOrder::new(
                        TradeAction::Cover,
                        position.short,
                        desired_quantity,
                        format!(
                            "Covering all {} SHORT shares (requested {desired_quantity})",
                            position.short
                        ),
                    ));
                }
            } else {
                warn!(ticker, side = ?position.side, "cover requested with no short position");
            }
        }
    }

    orders
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_while_short_flattens_first() {
        let position = Position::from_quantities(0, 50);
        let orders = reconcile("AAPL", &position, TradeAction::Buy, 30);

        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].action, TradeAction::Cover);
        assert_eq!(orders[0].quantity, 50);
        assert_eq!(orders[1].action, TradeAction::Buy);
        assert_eq!(orders[1].quantity, 30);
        assert_eq!(orders[1].requested, 30);
    }

    #[test]
    fn short_while_long_flattens_first() {
        let position = Position::from_quantities(80, 0);
        let orders = reconcile("AAPL", &position, TradeAction::Short, 20);

        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].action, TradeAction::Sell);
        assert_eq!(orders[0].quantity, 80);
        assert_eq!(orders[1].action, TradeAction::Short);
        assert_eq!(orders[1].quantity, 20);
    }

    #[test]
    fn additive_orders_on_matching_side() {
        let long = Position::from_quantities(40, 0);
        let add = reconcile("AAPL", &long, TradeAction::Buy, 10);
        assert_eq!(add, vec![SubOrder::new(
            TradeAction::Buy,
            10,
            10,
            "Adding 10 shares to existing LONG 40".to_string()
        )]);

        let short = Position::from_quantities(0, 15);
        let add_short = reconcile("AAPL", &short, TradeAction::Short, 5);
        assert_eq!(add_short.len(), 1);
        assert_eq!(add_short[0].action, TradeAction::Short);
        assert_eq!(add_short[0].quantity, 5);
    }

    #[test]
    fn flat_entry_orders() {
        let flat = Position::flat();
        let buy = reconcile("AAPL", &flat, TradeAction::Buy, 25);
        assert_eq!(buy.len(), 1);
        assert_eq!(buy[0].action, TradeAction::Buy);

        let short = reconcile("AAPL", &flat, TradeAction::Short, 25);
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].action, TradeAction::Short);
    }

    #[test]
    fn sell_is_capped_at_held_quantity() {
        let position = Position::from_quantities(30, 0);
        let orders = reconcile("AAPL", &position, TradeAction::Sell, 100);

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].quantity, 30);
        assert_eq!(orders[0].requested, 100);
    }

    #[test]
    fn cover_is_capped_at_short_quantity() {
        let position = Position::from_quantities(0, 12);
        let orders = reconcile("AAPL", &position, TradeAction::Cover, 40);

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].action, TradeAction::Cover);
        assert_eq!(orders[0].quantity, 12);
    }

    #[test]
    fn reductions_without_position_produce_nothing() {
        let flat = Position::flat();
        assert!(reconcile("AAPL", &flat, TradeAction::Sell, 10).is_empty());
        assert!(reconcile("AAPL", &flat, TradeAction::Cover, 10).is_empty());

        // Selling against a short produces nothing either
        let short = Position::from_quantities(0, 10);
        assert!(reconcile("AAPL", &short, TradeAction::Sell, 10).is_empty());
    }

    #[test]
    fn no_step_ever_exceeds_held_or_requested() {
        let cases = [
            (Position::from_quantities(0, 50), TradeAction::Buy, 30),
            (Position::from_quantities(80, 0), TradeAction::Short, 20),
            (Position::from_quantities(30, 0), TradeAction::Sell, 100),
            (Position::from_quantities(0, 12), TradeAction::Cover, 40),
            (Position::flat(), TradeAction::Buy, 10),
        ];
        for (position, action, desired) in cases {
            for order in reconcile("T", &position, action, desired) {
                let cap = match order.action {
                    TradeAction::Sell => position.long.max(desired),
                    TradeAction::Cover => position.short.max(desired),
                    _ => desired,
                };
                assert!(order.quantity <= cap);
                assert!(order.quantity > 0);
            }
        }
    }
}
