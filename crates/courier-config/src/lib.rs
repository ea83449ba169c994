//! Configuration support shared by every Courier component.
//!
//! - [`feature_flags`]: per-capability gate consulted on every public call
//! - [`loader`]: layered file + environment loading via the `config` crate
//! - [`logging`]: log level settings applied by the server's tracing setup

pub mod feature_flags;
pub mod loader;
pub mod logging;

pub use feature_flags::{
    AlwaysEnabled, FeatureFlag, FeatureFlagType, FeatureFlags, FeatureGate, SharedFeatureFlags,
    capabilities,
};
pub use loader::load_layered;
pub use logging::LoggingConfig;

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
