use courier_store::StoreError;
use std::time::Duration;

/// Queue errors. Only `RateLimited` and `InvalidMessage` reach `enqueue`
/// callers; store and serialization failures degrade instead.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Rate limit exceeded for producer {producer_id}, retry in {retry_after:?}")]
    RateLimited {
        producer_id: String,
        retry_after: Duration,
    },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    #[must_use]
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage(message.into())
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
