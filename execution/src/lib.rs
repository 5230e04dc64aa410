pub mod broker;
pub mod config;
pub mod decision;
pub mod dispatch;
pub mod errors;
pub mod parse;
pub mod persist;
pub mod reconcile;
pub mod worker;

pub use broker::{AlpacaBroker, Broker, PortfolioSnapshot, PositionDetail, ShortableInfo};
pub use config::WorkerConfig;
pub use decision::{DecisionEngine, DecisionRequest, HedgeFundOutcome, HttpDecisionEngine};
pub use dispatch::{dispatch_paper_orders, extract_risk_limits};
pub use errors::WorkerError;
pub use parse::{parse_message, Overrides, ParsedRequest};
pub use persist::{
    InMemoryOrderStore, InMemoryResultStore, OrderStore, RedisOrderStore, RedisResultStore,
    ResultStore,
};
pub use reconcile::{reconcile, SubOrder};
pub use worker::QueueWorker;
