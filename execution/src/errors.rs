// Worker Error Taxonomy
// Poison means the message itself can never succeed; Transient is worth a
// retry; Fatal aborts the current message without retrying.

use common::{QueueError, Retryable};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The message content is unprocessable and must be dead-lettered.
    #[error("poison message: {0}")]
    Poison(String),

    /// An infrastructure hiccup; retrying may succeed.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A non-retryable failure while processing a valid message.
    #[error("{0}")]
    Fatal(String),
}

impl Retryable for WorkerError {
    fn is_transient(&self) -> bool {
        matches!(self, WorkerError::Transient(_))
    }
}

impl From<QueueError> for WorkerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Transient(msg) => WorkerError::Transient(msg),
            QueueError::Fatal(msg) => WorkerError::Fatal(msg),
        }
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(err: reqwest::Error) -> Self {
        // Network and timeout failures are worth retrying; everything else
        // (decode, builder misuse) is not.
        if err.is_timeout() || err.is_connect() || err.is_request() {
            WorkerError::Transient(err.to_string())
        } else {
            WorkerError::Fatal(err.to_string())
        }
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        WorkerError::Fatal(err.to_string())
    }
}
