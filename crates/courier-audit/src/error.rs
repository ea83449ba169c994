use courier_store::StoreError;

/// Internal audit errors. Public recorder methods absorb these.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Export error: {0}")]
    Export(String),
}

impl AuditError {
    #[must_use]
    pub fn export(message: impl Into<String>) -> Self {
        Self::Export(message.into())
    }
}

pub type AuditResult<T> = std::result::Result<T, AuditError>;
