// Shared types and infrastructure for the market-sentinel workspace

pub mod models;
pub mod queue;
pub mod retry;

pub use models::{
    AnalysisRequest, AnalysisWindow, BrokerOrder, CandidateStatus, CooldownRecord,
    CorrelationHints, DeadLetterMessage, ExitSignal, FastCandidate, PortfolioDecision, Position,
    PositionSide, PriceBar, Priority, SignalResult, TradeAction, TradeMode,
};
pub use queue::{InMemoryQueue, QueueError, QueueTransport, ReceivedMessage, RedisQueue};
pub use retry::{execute_with_backoff, Retryable, RetryPolicy};
