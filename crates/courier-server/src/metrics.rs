//! Prometheus exporter for the metrics recorded by the Courier components.
//!
//! Components only use the `metrics` facade; until [`init_metrics`] installs
//! a recorder their counters are no-ops.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Prometheus exporter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Address of the scrape endpoint
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:9464".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_listen_addr(),
        }
    }
}

impl MetricsConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.listen_addr.parse()
    }
}

/// Install the Prometheus recorder and serve it on `listen_addr`.
///
/// Must be called from within a Tokio runtime. Returns `true` if this call
/// installed the exporter.
pub fn init_metrics(config: &MetricsConfig) -> bool {
    if !config.enabled {
        tracing::debug!("Prometheus metrics disabled");
        return false;
    }
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    let addr = match config.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(addr = %config.listen_addr, error = %e, "Invalid metrics listen address");
            return false;
        }
    };

    let (recorder, exporter) = match PrometheusBuilder::new().with_http_listener(addr).build() {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build Prometheus exporter");
            return false;
        }
    };
    let handle = recorder.handle();

    if let Err(e) = ::metrics::set_global_recorder(recorder) {
        tracing::warn!(error = %e, "Metrics recorder already installed");
        return false;
    }
    let _ = PROMETHEUS_HANDLE.set(handle);

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "Prometheus exporter stopped");
        }
    });

    tracing::info!(%addr, "Prometheus metrics initialized");
    true
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_addr_parses() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.socket_addr().unwrap().port(), 9464);
    }

    #[test]
    fn test_disabled_does_not_install() {
        assert!(!init_metrics(&MetricsConfig::default()));
        assert!(render_metrics().is_none());
    }
}
