// Monitor State Stores
// Cooldown records and fast-candidate lifecycle documents. Redis carries
// production state; the in-memory variants back the tests.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CandidateStatus, CooldownRecord, FastCandidate};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;

/// Per-ticker trigger cooldowns for the enqueue decision.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    async fn get_last_trigger(&self, ticker: &str) -> Result<Option<DateTime<Utc>>>;
    async fn upsert_trigger(
        &self,
        ticker: &str,
        triggered_at: DateTime<Utc>,
        reasons: &[String],
    ) -> Result<()>;
}

/// Fast-candidate documents moving through the confirmation lifecycle.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn upsert(&self, candidate: &FastCandidate) -> Result<()>;
    /// Most recent pending candidate for the ticker detected at or after `since`.
    async fn pending_since(
        &self,
        ticker: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<FastCandidate>>;
    /// All candidates confirmed at or after `since`.
    async fn confirmed_since(&self, since: DateTime<Utc>) -> Result<Vec<FastCandidate>>;
}

const COOLDOWN_KEY_PREFIX: &str = "monitor:cooldown";
const CANDIDATE_HASH_KEY: &str = "monitor:candidates";

pub struct RedisCooldownStore {
    conn: ConnectionManager,
}

impl RedisCooldownStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("redis connection failed")?;
        Ok(Self { conn })
    }

    fn key(ticker: &str) -> String {
        format!("{COOLDOWN_KEY_PREFIX}:{ticker}")
    }
}

#[async_trait]
impl CooldownStore for RedisCooldownStore {
    async fn get_last_trigger(&self, ticker: &str) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key(ticker)).await?;
        match raw {
            Some(json) => {
                let record: CooldownRecord =
                    serde_json::from_str(&json).context("corrupt cooldown record")?;
                Ok(Some(record.last_triggered_utc))
            }
            None => Ok(None),
        }
    }

    async fn upsert_trigger(
        &self,
        ticker: &str,
        triggered_at: DateTime<Utc>,
        reasons: &[String],
    ) -> Result<()> {
        let record = CooldownRecord {
            ticker: ticker.to_string(),
            last_triggered_utc: triggered_at,
            last_reasons: reasons.to_vec(),
        };
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(Self::key(ticker), serde_json::to_string(&record)?)
            .await?;
        Ok(())
    }
}

pub struct RedisCandidateStore {
    conn: ConnectionManager,
}

impl RedisCandidateStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("redis connection failed")?;
        Ok(Self { conn })
    }

    async fn all(&self) -> Result<Vec<FastCandidate>> {
        let mut conn = self.conn.clone();
        let entries: HashMap<String, String> = conn.hgetall(CANDIDATE_HASH_KEY).await?;
        let mut candidates = Vec::with_capacity(entries.len());
        for json in entries.into_values() {
            candidates.push(serde_json::from_str(&json).context("corrupt candidate record")?);
        }
        Ok(candidates)
    }
}

#[async_trait]
impl CandidateStore for RedisCandidateStore {
    async fn upsert(&self, candidate: &FastCandidate) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(
            CANDIDATE_HASH_KEY,
            &candidate.id,
            serde_json::to_string(candidate)?,
        )
        .await?;
        Ok(())
    }

    async fn pending_since(
        &self,
        ticker: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<FastCandidate>> {
        let mut pending: Vec<FastCandidate> = self
            .all()
            .await?
            .into_iter()
            .filter(|c| {
                c.ticker == ticker
                    && c.status == CandidateStatus::PendingConfirmation
                    && c.detected_at >= since
            })
            .collect();
        pending.sort_by_key(|c| c.detected_at);
        Ok(pending.pop())
    }

    async fn confirmed_since(&self, since: DateTime<Utc>) -> Result<Vec<FastCandidate>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|c| {
                c.status == CandidateStatus::Confirmed
                    && c.confirmed_at.map(|at| at >= since).unwrap_or(false)
            })
            .collect())
    }
}

/// Test double keyed the same way as the Redis store.
#[derive(Default)]
pub struct InMemoryCooldownStore {
    records: RwLock<HashMap<String, CooldownRecord>>,
}

impl InMemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CooldownStore for InMemoryCooldownStore {
    async fn get_last_trigger(&self, ticker: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .records
            .read()
            .await
            .get(ticker)
            .map(|r| r.last_triggered_utc))
    }

    async fn upsert_trigger(
        &self,
        ticker: &str,
        triggered_at: DateTime<Utc>,
        reasons: &[String],
    ) -> Result<()> {
        self.records.write().await.insert(
            ticker.to_string(),
            CooldownRecord {
                ticker: ticker.to_string(),
                last_triggered_utc: triggered_at,
                last_reasons: reasons.to_vec(),
            },
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCandidateStore {
    candidates: RwLock<HashMap<String, FastCandidate>>,
}

impl InMemoryCandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<FastCandidate> {
        self.candidates.read().await.get(id).cloned()
    }
}

#[async_trait]
impl CandidateStore for InMemoryCandidateStore {
    async fn upsert(&self, candidate: &FastCandidate) -> Result<()> {
        self.candidates
            .write()
            .await
            .insert(candidate.id.clone(), candidate.clone());
        Ok(())
    }

    async fn pending_since(
        &self,
        ticker: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<FastCandidate>> {
        let mut pending: Vec<FastCandidate> = self
            .candidates
            .read()
            .await
            .values()
            .filter(|c| {
                c.ticker == ticker
                    && c.status == CandidateStatus::PendingConfirmation
                    && c.detected_at >= since
            })
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.detected_at);
        Ok(pending.pop())
    }

    async fn confirmed_since(&self, since: DateTime<Utc>) -> Result<Vec<FastCandidate>> {
        Ok(self
            .candidates
            .read()
            .await
            .values()
            .filter(|c| {
                c.status == CandidateStatus::Confirmed
                    && c.confirmed_at.map(|at| at >= since).unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}
