use std::path::Path;
use std::{env, fmt};

use courier_audit::AuditConfig;
use courier_cache::CacheConfig;
use courier_config::{ConfigError, FeatureFlags, LoggingConfig, load_layered};
use courier_queue::QueueConfig;
use courier_store::RedisConfig;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::metrics::MetricsConfig;

/// Environment override prefix: `COURIER__QUEUE__MAX_RETRIES=5`.
pub const ENV_PREFIX: &str = "COURIER";

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "COURIER_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "courier.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    /// Backing store connection
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Capability flags, merged over the built-in defaults
    #[serde(default)]
    pub features: FeatureFlags,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Queue
        if self.queue.rate_limit_max == 0 {
            return Err("queue.rate_limit_max must be > 0".into());
        }
        if self.queue.rate_limit_window_ms == 0 {
            return Err("queue.rate_limit_window_ms must be > 0".into());
        }
        if self.queue.poll_interval_ms == 0 {
            return Err("queue.poll_interval_ms must be > 0".into());
        }
        if self.queue.batch_size == 0 {
            return Err("queue.batch_size must be > 0".into());
        }
        if self.queue.retry_base_delay_ms > self.queue.retry_max_delay_ms {
            return Err("queue.retry_base_delay_ms must be <= queue.retry_max_delay_ms".into());
        }
        // Cache
        if self.cache.l1_max_capacity == 0 {
            return Err("cache.l1_max_capacity must be > 0".into());
        }
        if self.cache.l1_ttl_secs == 0 || self.cache.l2_ttl_secs == 0 {
            return Err("cache TTLs must be > 0".into());
        }
        if self.cache.warm_batch_size == 0 {
            return Err("cache.warm_batch_size must be > 0".into());
        }
        // Audit
        if self.audit.flush_interval_ms == 0 {
            return Err("audit.flush_interval_ms must be > 0".into());
        }
        if self.audit.max_buffer_size == 0 {
            return Err("audit.max_buffer_size must be > 0".into());
        }
        if self.audit.retention_days == 0 {
            return Err("audit.retention_days must be > 0".into());
        }
        // Redis
        if self.redis.enabled {
            if self.redis.url.is_empty() {
                return Err("redis.enabled=true requires redis.url".into());
            }
            if self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
            if self.redis.connect_attempts == 0 {
                return Err("redis.connect_attempts must be > 0".into());
            }
        }
        // Logging
        if EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(format!(
                "logging.level is not a valid filter directive: {}",
                self.logging.level
            ));
        }
        // Metrics
        if self.metrics.enabled {
            self.metrics
                .socket_addr()
                .map_err(|e| format!("metrics.listen_addr is invalid: {e}"))?;
        }
        Ok(())
    }
}

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From COURIER_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (courier.toml)
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable ({CONFIG_ENV_VAR})"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: COURIER_CONFIG
/// 3. Default: courier.toml
pub fn resolve_config_path(cli: Option<&str>) -> (String, ConfigSource) {
    if let Some(path) = cli.filter(|p| !p.is_empty()) {
        return (path.to_string(), ConfigSource::CliArgument);
    }

    if let Ok(path) = env::var(CONFIG_ENV_VAR)
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default)
}

/// Load, merge feature flags over their defaults, and validate.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut cfg: AppConfig = load_layered(path, ENV_PREFIX)?;

    let mut features = FeatureFlags::with_defaults();
    features.merge(std::mem::take(&mut cfg.features));
    cfg.features = features;

    cfg.validate().map_err(ConfigError::validation)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_config::capabilities;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_batch() {
        let mut cfg = AppConfig::default();
        cfg.queue.batch_size = 0;
        assert!(cfg.validate().unwrap_err().contains("batch_size"));
    }

    #[test]
    fn test_rejects_bad_log_level() {
        let mut cfg = AppConfig::default();
        cfg.logging.level = "courier=verbose".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_metrics_addr_when_enabled() {
        let mut cfg = AppConfig::default();
        cfg.metrics.enabled = true;
        cfg.metrics.listen_addr = "nowhere".into();
        assert!(cfg.validate().is_err());

        cfg.metrics.enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_cli_path_wins() {
        let (path, source) = resolve_config_path(Some("custom.toml"));
        assert_eq!(path, "custom.toml");
        assert_eq!(source, ConfigSource::CliArgument);
    }

    #[test]
    fn test_load_file_and_merge_features() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[queue]
max_retries = 5

[cache]
l1_ttl_secs = 60

[features."audit.enabled"]
enabled = false
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.queue.max_retries, 5);
        assert_eq!(cfg.queue.batch_size, 10);
        assert_eq!(cfg.cache.l1_ttl_secs, 60);
        assert!(!cfg.features.is_enabled(capabilities::AUDIT));
        assert!(cfg.features.is_enabled(capabilities::QUEUE));
        assert_eq!(cfg.features.len(), 3);
    }

    #[test]
    fn test_invalid_file_is_validation_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[cache]\nwarm_batch_size = 0").unwrap();

        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
