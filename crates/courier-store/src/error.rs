//! Store error types.

use std::fmt;

/// Errors returned by a [`BackingStore`](crate::BackingStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store cannot be reached (connect exhausted, marked down, pool timeout).
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    /// No store is attached to the handle.
    #[error("Store not connected")]
    NotConnected,

    /// The store rejected a command (wrong type, syntax, protocol).
    #[error("Store command failed: {message}")]
    Command { message: String },

    /// A value read from or written to the store could not be (de)serialized.
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl StoreError {
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` when the failure means the store is unreachable, as
    /// opposed to a rejected command.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::NotConnected)
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unavailable { .. } | Self::NotConnected => ErrorCategory::Infrastructure,
            Self::Command { .. } => ErrorCategory::Command,
            Self::Serialization { .. } => ErrorCategory::Serialization,
        }
    }
}

impl From<::redis::RedisError> for StoreError {
    fn from(e: ::redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            Self::unavailable(e.to_string())
        } else {
            Self::command(e.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::unavailable(e.to_string())
    }
}

/// Categories of store errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Infrastructure,
    Command,
    Serialization,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Command => write!(f, "command"),
            Self::Serialization => write!(f, "serialization"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            StoreError::unavailable("refused").to_string(),
            "Store unavailable: refused"
        );
        assert_eq!(StoreError::NotConnected.to_string(), "Store not connected");
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            StoreError::NotConnected.category(),
            ErrorCategory::Infrastructure
        );
        assert_eq!(
            StoreError::command("WRONGTYPE").category(),
            ErrorCategory::Command
        );
        assert_eq!(ErrorCategory::Serialization.to_string(), "serialization");
        assert!(StoreError::NotConnected.is_unavailable());
        assert!(!StoreError::command("x").is_unavailable());
    }
}
