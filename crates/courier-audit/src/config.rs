use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Audit recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Interval between buffer flushes in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Events held in memory before the oldest are dropped
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,

    /// Retention window for index entries, in days
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// `query` limit when the filter has none
    #[serde(default = "default_query_limit")]
    pub default_query_limit: usize,

    /// Hard cap on exported events
    #[serde(default = "default_export_max")]
    pub export_max: usize,

    /// How far back a time-bucketed query looks without an explicit start
    #[serde(default = "default_query_lookback_days")]
    pub query_lookback_days: u32,

    /// Index entries read per store round trip while querying
    #[serde(default = "default_query_page_size")]
    pub query_page_size: usize,

    /// Marks recorded events as compliant (redacted, retention enforced)
    #[serde(default = "default_compliance_mode")]
    pub compliance_mode: bool,

    /// Metadata keys masked on log (case-insensitive substring match)
    #[serde(default = "default_sensitive_fields")]
    pub sensitive_fields: Vec<String>,
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_max_buffer_size() -> usize {
    10_000
}

fn default_retention_days() -> u32 {
    90
}

fn default_query_limit() -> usize {
    100
}

fn default_export_max() -> usize {
    10_000
}

fn default_query_lookback_days() -> u32 {
    7
}

fn default_query_page_size() -> usize {
    200
}

fn default_compliance_mode() -> bool {
    true
}

pub fn default_sensitive_fields() -> Vec<String> {
    [
        "password",
        "passwd",
        "secret",
        "token",
        "api_key",
        "apikey",
        "authorization",
        "auth",
        "credential",
        "private_key",
        "ssn",
        "social_security",
        "credit_card",
        "card_number",
        "cvv",
        "pin",
        "email",
        "phone",
        "mobile",
        "address",
        "dob",
        "date_of_birth",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            max_buffer_size: default_max_buffer_size(),
            retention_days: default_retention_days(),
            default_query_limit: default_query_limit(),
            export_max: default_export_max(),
            query_lookback_days: default_query_lookback_days(),
            query_page_size: default_query_page_size(),
            compliance_mode: default_compliance_mode(),
            sensitive_fields: default_sensitive_fields(),
        }
    }
}

impl AuditConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 86_400)
    }
}
