// Result and Order Persistence
// Optional stores for run results, status records, and broker orders.
// Failures here are logged by callers, never fatal to message processing.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use common::BrokerOrder;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::RwLock;

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_run_result(&self, run_id: &str, record: &Value) -> Result<()>;
    async fn publish_status(&self, run_id: &str, status: &Value) -> Result<()>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn record_order(&self, order: &BrokerOrder, metadata: &Value) -> Result<()>;
}

const RESULTS_KEY: &str = "worker:results";
const STATUS_KEY: &str = "worker:status";
const ORDERS_KEY: &str = "worker:orders";

pub struct RedisResultStore {
    conn: ConnectionManager,
}

impl RedisResultStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("redis connection failed")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn save_run_result(&self, run_id: &str, record: &Value) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(RESULTS_KEY, run_id, serde_json::to_string(record)?)
            .await?;
        Ok(())
    }

    async fn publish_status(&self, run_id: &str, status: &Value) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(STATUS_KEY, run_id, serde_json::to_string(status)?)
            .await?;
        Ok(())
    }
}

pub struct RedisOrderStore {
    conn: ConnectionManager,
}

impl RedisOrderStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("redis connection failed")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl OrderStore for RedisOrderStore {
    async fn record_order(&self, order: &BrokerOrder, metadata: &Value) -> Result<()> {
        let entry = serde_json::json!({
            "order": order,
            "metadata": metadata,
            "recorded_at": Utc::now().to_rfc3339(),
        });
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(ORDERS_KEY, serde_json::to_string(&entry)?)
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryResultStore {
    results: RwLock<HashMap<String, Value>>,
    statuses: RwLock<HashMap<String, Value>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn result(&self, run_id: &str) -> Option<Value> {
        self.results.read().await.get(run_id).cloned()
    }

    pub async fn status(&self, run_id: &str) -> Option<Value> {
        self.statuses.read().await.get(run_id).cloned()
    }

    pub async fn all_results(&self) -> Vec<Value> {
        self.results.read().await.values().cloned().collect()
    }

    pub async fn all_statuses(&self) -> Vec<Value> {
        self.statuses.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save_run_result(&self, run_id: &str, record: &Value) -> Result<()> {
        self.results
            .write()
            .await
            .insert(run_id.to_string(), record.clone());
        Ok(())
    }

    async fn publish_status(&self, run_id: &str, status: &Value) -> Result<()> {
        self.statuses
            .write()
            .await
            .insert(run_id.to_string(), status.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<Vec<(BrokerOrder, Value)>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn orders(&self) -> Vec<(BrokerOrder, Value)> {
        self.orders.read().await.clone()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn record_order(&self, order: &BrokerOrder, metadata: &Value) -> Result<()> {
        self.orders
            .write()
            .await
            .push((order.clone(), metadata.clone()));
        Ok(())
    }
}
