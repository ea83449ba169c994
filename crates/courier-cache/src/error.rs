use courier_store::StoreError;

/// Internal cache errors. Public cache methods treat these as misses or
/// no-ops and log them.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(String),
}

impl CacheError {
    #[must_use]
    pub fn compression(message: impl Into<String>) -> Self {
        Self::Compression(message.into())
    }

    /// Whether the failure came from the shared tier rather than the data.
    #[must_use]
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
