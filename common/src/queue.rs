// Durable Queue Transport
// Redis-backed queue used by the monitor (producer) and worker (consumer),
// plus an in-memory double for tests

use std::collections::VecDeque;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::retry::Retryable;

/// Queue failures, classified so the shared retry policy can tell which
/// operations deserve another attempt.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("transient queue failure: {0}")]
    Transient(String),
    #[error("queue error: {0}")]
    Fatal(String),
}

impl Retryable for QueueError {
    fn is_transient(&self) -> bool {
        matches!(self, QueueError::Transient(_))
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        // Network and server-side errors are worth retrying; protocol-level
        // failures are not going to succeed on a second attempt.
        if err.is_io_error() || err.is_timeout() || err.is_connection_dropped() {
            QueueError::Transient(err.to_string())
        } else {
            QueueError::Fatal(err.to_string())
        }
    }
}

/// A message pulled off the queue. `raw` is the wire envelope, needed to
/// delete the exact in-flight entry.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub id: String,
    pub content: String,
    raw: String,
}

impl ReceivedMessage {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            raw: content.clone(),
            content,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: String,
    body: String,
}

/// Abstraction over the durable queue broker. The broker is the sole arbiter
/// of message ownership; no in-process locking is layered on top.
#[async_trait::async_trait]
pub trait QueueTransport: Send + Sync {
    /// Enqueue a payload.
    async fn send(&self, payload: &str) -> Result<(), QueueError>;

    /// Pull one message, making it invisible to other consumers for
    /// `visibility_timeout`. Returns `None` when the queue is empty.
    async fn receive(&self, visibility_timeout: Duration)
        -> Result<Option<ReceivedMessage>, QueueError>;

    /// Permanently remove a received message.
    async fn delete(&self, message: &ReceivedMessage) -> Result<(), QueueError>;
}

/// Redis list-backed queue. Messages move to a `:processing` list on receive
/// and are removed from it on delete, so an in-flight message survives a
/// consumer crash until a reaper pushes it back after the visibility window.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    queue_key: String,
    processing_key: String,
}

impl RedisQueue {
    pub async fn connect(url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client =
            redis::Client::open(url).map_err(|e| QueueError::Fatal(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Transient(e.to_string()))?;
        Ok(Self {
            conn,
            queue_key: format!("queue:{queue_name}"),
            processing_key: format!("queue:{queue_name}:processing"),
        })
    }
}

#[async_trait::async_trait]
impl QueueTransport for RedisQueue {
    async fn send(&self, payload: &str) -> Result<(), QueueError> {
        let envelope = Envelope {
            id: Uuid::new_v4().to_string(),
            body: payload.to_string(),
        };
        let raw = serde_json::to_string(&envelope)
            .map_err(|e| QueueError::Fatal(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(&self.queue_key, raw).await?;
        debug!("Enqueued message {} on {}", envelope.id, self.queue_key);
        Ok(())
    }

    async fn receive(
        &self,
        _visibility_timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .rpoplpush(&self.queue_key, &self.processing_key)
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) => Ok(Some(ReceivedMessage {
                id: envelope.id,
                content: envelope.body,
                raw,
            })),
            // Payloads pushed by external tooling may not be enveloped;
            // fall back to the raw content so they can still be processed.
            Err(_) => Ok(Some(ReceivedMessage {
                id: Uuid::new_v4().to_string(),
                content: raw.clone(),
                raw,
            })),
        }
    }

    async fn delete(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lrem(&self.processing_key, 1, &message.raw).await?;
        Ok(())
    }
}

/// In-memory queue for tests and offline runs
#[derive(Default)]
pub struct InMemoryQueue {
    messages: tokio::sync::Mutex<VecDeque<ReceivedMessage>>,
    deleted: tokio::sync::Mutex<Vec<String>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw payload as if it came from external tooling.
    pub async fn push_raw(&self, content: &str) {
        self.messages
            .lock()
            .await
            .push_back(ReceivedMessage::new(Uuid::new_v4().to_string(), content));
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contents(&self) -> Vec<String> {
        self.messages
            .lock()
            .await
            .iter()
            .map(|m| m.content.clone())
            .collect()
    }

    pub async fn deleted_ids(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl QueueTransport for InMemoryQueue {
    async fn send(&self, payload: &str) -> Result<(), QueueError> {
        self.push_raw(payload).await;
        Ok(())
    }

    async fn receive(
        &self,
        _visibility_timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        Ok(self.messages.lock().await.pop_front())
    }

    async fn delete(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        self.deleted.lock().await.push(message.id.clone());
        Ok(())
    }
}
