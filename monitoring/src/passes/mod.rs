// Monitor Passes
// Three cadences share one context: the 1-minute fast scan, the 5-minute
// confirmation pass, and the 15-minute validation sweep.

pub mod confirm;
pub mod fast;
pub mod validate;

use std::sync::Arc;

use common::QueueTransport;
use market_data::{IntradaySource, PriceHistorySource};

use crate::config::MonitorConfig;
use crate::stores::{CandidateStore, CooldownStore};

pub use confirm::run_confirm_pass;
pub use fast::run_fast_pass;
pub use validate::run_validation_pass;

/// Shared dependencies for all monitor passes.
pub struct MonitorContext {
    pub config: MonitorConfig,
    pub history: Arc<dyn PriceHistorySource>,
    pub intraday: Arc<dyn IntradaySource>,
    pub queue: Arc<dyn QueueTransport>,
    pub cooldowns: Arc<dyn CooldownStore>,
    pub candidates: Arc<dyn CandidateStore>,
}
