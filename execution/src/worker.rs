// Queue Worker
// Drains analysis requests one at a time: receive, delete, parse, run the
// decision engine, dispatch paper orders, persist results. Poison messages
// and processing failures land on the dead-letter queue instead of looping.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use common::{
    execute_with_backoff, DeadLetterMessage, QueueTransport, ReceivedMessage, RetryPolicy,
    TradeMode,
};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::config::WorkerConfig;
use crate::decision::{DecisionEngine, DecisionRequest};
use crate::dispatch::{dispatch_paper_orders, SETTLE_DELAY};
use crate::errors::WorkerError;
use crate::parse::{parse_message, ParsedRequest};
use crate::persist::{OrderStore, ResultStore};

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn summarize_decisions(decisions: &BTreeMap<String, Value>) -> String {
    decisions
        .iter()
        .map(|(ticker, decision)| {
            let action = decision
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            format!("{ticker}:{action}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct QueueWorker {
    queue: Arc<dyn QueueTransport>,
    dead_letter: Option<Arc<dyn QueueTransport>>,
    broker: Arc<dyn Broker>,
    engine: Arc<dyn DecisionEngine>,
    result_store: Option<Arc<dyn ResultStore>>,
    order_store: Arc<dyn OrderStore>,
    config: WorkerConfig,
    retry: RetryPolicy,
    settle_delay: Duration,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<dyn QueueTransport>,
        dead_letter: Option<Arc<dyn QueueTransport>>,
        broker: Arc<dyn Broker>,
        engine: Arc<dyn DecisionEngine>,
        result_store: Option<Arc<dyn ResultStore>>,
        order_store: Arc<dyn OrderStore>,
        config: WorkerConfig,
    ) -> Self {
        let retry = RetryPolicy {
            max_attempts: config.max_attempts,
            base_backoff: Duration::from_secs_f64(config.base_backoff_seconds),
            max_backoff: Duration::from_secs_f64(config.max_backoff_seconds),
        };
        Self {
            queue,
            dead_letter,
            broker,
            engine,
            result_store,
            order_store,
            config,
            retry,
            settle_delay: SETTLE_DELAY,
        }
    }

    /// Shorten the delay between reconciliation sub-orders.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Process at most one message. Returns `Ok(false)` when the queue was
    /// empty, `Ok(true)` when a message was consumed (successfully or not).
    pub async fn run(&self) -> Result<bool> {
        let visibility = Duration::from_secs(self.config.visibility_timeout);
        let received = execute_with_backoff(&self.retry, "receive message", false, || {
            self.queue.receive(visibility)
        })
        .await?;
        let Some(message) = received.flatten() else {
            return Ok(false);
        };

        info!(message_id = message.id, "received message");

        // Delete up front so a slow or crashing run cannot make the message
        // reappear and double-submit orders.
        let _ = execute_with_backoff(&self.retry, "delete message", true, || {
            self.queue.delete(&message)
        })
        .await;

        let parsed = match parse_message(
            &message.content,
            Utc::now(),
            self.config.default_lookback_days,
        ) {
            Ok(parsed) => parsed,
            Err(err) => {
                let reason = match err {
                    WorkerError::Poison(reason) => reason,
                    other => other.to_string(),
                };
                error!(message_id = message.id, reason, "poison message");
                self.dead_letter(&message, &reason).await;
                return Ok(true);
            }
        };

        match self.process(&message.id, &parsed).await {
            Ok(()) => Ok(true),
            Err(WorkerError::Poison(reason)) => {
                error!(message_id = message.id, reason, "unprocessable message");
                self.dead_letter(&message, &reason).await;
                Ok(true)
            }
            Err(err) => {
                error!(message_id = message.id, error = %err, "processing failed");
                self.dead_letter(&message, &format!("processing_error: {err}"))
                    .await;
                Ok(true)
            }
        }
    }

    async fn process(&self, message_id: &str, parsed: &ParsedRequest) -> Result<(), WorkerError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            run_id,
            tickers = ?parsed.tickers,
            start_date = parsed.start_date,
            end_date = parsed.end_date,
            trade_mode = ?parsed.overrides.trade_mode,
            "processing analysis request"
        );

        let portfolio = self.broker.get_portfolio(&parsed.tickers).await?;
        let request = DecisionRequest {
            tickers: parsed.tickers.clone(),
            start_date: parsed.start_date.clone(),
            end_date: parsed.end_date.clone(),
            portfolio,
            show_reasoning: parsed.overrides.show_reasoning,
            selected_analysts: parsed.overrides.selected_analysts.clone(),
            model_name: parsed.overrides.model_name.clone(),
            model_provider: parsed.overrides.model_provider.clone(),
            user_id: parsed.user_id.clone(),
            strategy_id: parsed.strategy_id.clone(),
            run_id: run_id.clone(),
        };

        let outcome = self.engine.decide(&request).await?;
        info!(run_id, decisions = outcome.decisions.len(), "decision engine returned");

        let mut record = serde_json::json!({
            "id": run_id,
            "messageId": message_id,
            "tickers": parsed.tickers,
            "analysisWindow": {
                "start": parsed.start_date,
                "end": parsed.end_date,
            },
            "portfolioSnapshotId": Value::Null,
            "portfolioSource": "alpaca",
            "decisions": outcome.decisions,
            "analystSignals": outcome.analyst_signals,
            "processedAt": timestamp(),
            "metadata": { "rawMessage": parsed.raw },
            "trade_mode": parsed.overrides.trade_mode,
        });

        if parsed.overrides.trade_mode == TradeMode::Paper {
            let threshold = parsed
                .overrides
                .confidence_threshold
                .unwrap_or(self.config.confidence_threshold);
            let orders = dispatch_paper_orders(
                self.broker.as_ref(),
                self.order_store.as_ref(),
                &outcome.decisions,
                &outcome.analyst_signals,
                &outcome.current_prices,
                threshold,
                self.settle_delay,
            )
            .await?;
            record["broker_orders"] =
                serde_json::to_value(&orders).map_err(|e| WorkerError::Fatal(e.to_string()))?;
        }

        if self.config.save_results {
            if let Some(store) = &self.result_store {
                if let Err(err) = store.save_run_result(&run_id, &record).await {
                    warn!(run_id, error = %err, "failed to save run result");
                }
                let status = serde_json::json!({
                    "id": run_id,
                    "messageId": message_id,
                    "status": "completed",
                    "summary": summarize_decisions(&outcome.decisions),
                    "tickers": parsed.tickers,
                    "processedAt": timestamp(),
                });
                if let Err(err) = store.publish_status(&run_id, &status).await {
                    warn!(run_id, error = %err, "failed to publish status");
                }
            }
        }

        info!(run_id, "analysis request complete");
        Ok(())
    }

    async fn dead_letter(&self, message: &ReceivedMessage, reason: &str) {
        let Some(dead_letter) = &self.dead_letter else {
            warn!(
                message_id = message.id,
                reason, "no dead-letter queue configured, dropping message"
            );
            return;
        };
        let envelope = DeadLetterMessage {
            original_message_id: Some(message.id.clone()),
            reason: reason.to_string(),
            content: Some(message.content.clone()),
            dead_lettered_at: timestamp(),
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(err) => {
                error!(message_id = message.id, error = %err, "could not serialize dead letter");
                return;
            }
        };
        let sent = execute_with_backoff(&self.retry, "dead-letter message", true, || {
            dead_letter.send(&payload)
        })
        .await;
        if matches!(sent, Ok(Some(()))) {
            info!(message_id = message.id, reason, "message dead-lettered");
        }
    }
}
