//! # courier-server
//!
//! Wires the Courier components into one process: configuration, tracing,
//! the Prometheus exporter and [`Services`], the single owner of the audit
//! recorder, message queue and two-tier cache.

pub mod config;
pub mod metrics;
pub mod observability;
pub mod services;

pub use config::{AppConfig, ConfigSource, load_config, resolve_config_path};
pub use observability::{init_tracing, shutdown_tracing};
pub use services::Services;
