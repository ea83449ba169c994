//! Layered configuration loading.
//!
//! Sources in increasing precedence: the TOML file (when it exists), then
//! environment variables `{PREFIX}__SECTION__KEY`. Missing keys fall back to
//! the serde defaults of the target type.

use crate::{ConfigError, Result};
use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;

/// Load `T` from an optional file and process environment overrides.
pub fn load_layered<T: DeserializeOwned>(path: Option<&Path>, env_prefix: &str) -> Result<T> {
    build(path, env_prefix, None)
}

fn build<T: DeserializeOwned>(
    path: Option<&Path>,
    env_prefix: &str,
    env: Option<HashMap<String, String>>,
) -> Result<T> {
    let mut builder = Config::builder();

    if let Some(p) = path {
        if p.exists() {
            builder = builder.add_source(File::from(p));
        } else {
            tracing::warn!(path = %p.display(), "Config file not found, using defaults");
        }
    }

    // e.g. COURIER__QUEUE__MAX_RETRIES=5
    builder = builder.add_source(
        Environment::with_prefix(env_prefix)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(env),
    );

    let cfg = builder
        .build()
        .map_err(|e| ConfigError::parse(format!("config build error: {e}")))?;

    cfg.try_deserialize()
        .map_err(|e| ConfigError::parse(format!("config deserialize error: {e}")))
}
