pub mod config;
pub mod passes;
pub mod payload;
pub mod stores;

pub use config::MonitorConfig;
pub use passes::MonitorContext;
pub use payload::{compose_analysis_request, compose_exit_signal};
pub use stores::{
    CandidateStore, CooldownStore, InMemoryCandidateStore, InMemoryCooldownStore,
    RedisCandidateStore, RedisCooldownStore,
};
