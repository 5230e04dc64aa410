// Decision Collaborator
// Seam to the analysis service that turns a parsed request plus portfolio
// snapshot into per-ticker decisions. The worker treats it as a black box.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::PortfolioSnapshot;
use crate::errors::WorkerError;

/// Inputs forwarded to the decision collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest {
    pub tickers: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub portfolio: PortfolioSnapshot,
    pub show_reasoning: bool,
    pub selected_analysts: Vec<String>,
    pub model_name: String,
    pub model_provider: String,
    pub user_id: String,
    pub strategy_id: String,
    pub run_id: String,
}

/// Outcome returned by the collaborator. Decisions are kept as raw JSON so
/// malformed entries can be skipped per ticker instead of failing the run.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HedgeFundOutcome {
    #[serde(default)]
    pub decisions: BTreeMap<String, Value>,
    #[serde(default)]
    pub analyst_signals: Value,
    #[serde(default)]
    pub current_prices: BTreeMap<String, f64>,
}

#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<HedgeFundOutcome, WorkerError>;
}

/// HTTP client for a remote decision service.
pub struct HttpDecisionEngine {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpDecisionEngine {
    pub fn new(endpoint: &str) -> Result<Self, WorkerError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| WorkerError::Fatal(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn from_env() -> Result<Self, WorkerError> {
        let endpoint = std::env::var("DECISION_SERVICE_URL")
            .map_err(|_| WorkerError::Fatal("DECISION_SERVICE_URL is not set".to_string()))?;
        Self::new(&endpoint)
    }
}

#[async_trait]
impl DecisionEngine for HttpDecisionEngine {
    async fn decide(&self, request: &DecisionRequest) -> Result<HedgeFundOutcome, WorkerError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| WorkerError::Transient(e.to_string()))?;
        Ok(response.json().await?)
    }
}
