//! Audit event types and the fluent builder.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Outcome recorded on an audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    #[default]
    Success,
    Failure,
    Warning,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
            AuditStatus::Warning => "warning",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded event. `metadata` is already redacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub action: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub status: AuditStatus,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub compliant: bool,
}

impl AuditEvent {
    /// Whether this event satisfies every criterion of `filter` (limit ignored).
    pub fn matches(&self, filter: &AuditFilter) -> bool {
        if let Some(actor) = &filter.actor_id
            && self.actor_id.as_ref() != Some(actor)
        {
            return false;
        }
        if let Some(action) = &filter.action
            && &self.action != action
        {
            return false;
        }
        if let Some(resource) = &filter.resource
            && &self.resource != resource
        {
            return false;
        }
        if let Some(status) = filter.status
            && self.status != status
        {
            return false;
        }
        if filter.start_time.is_some_and(|start| self.timestamp < start) {
            return false;
        }
        if filter.end_time.is_some_and(|end| self.timestamp > end) {
            return false;
        }
        true
    }
}

/// Event as supplied by a caller; id, timestamp and `compliant` are assigned on log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAuditEvent {
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub actor_email: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub status: AuditStatus,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Builder for [`NewAuditEvent`]
#[derive(Debug, Clone)]
pub struct AuditEventBuilder {
    event: NewAuditEvent,
}

impl AuditEventBuilder {
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            event: NewAuditEvent {
                action: action.into(),
                resource: resource.into(),
                ..Default::default()
            },
        }
    }

    pub fn actor(mut self, id: impl Into<String>) -> Self {
        self.event.actor_id = Some(id.into());
        self
    }

    pub fn actor_email(mut self, email: impl Into<String>) -> Self {
        self.event.actor_email = Some(email.into());
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.event.ip_address = Some(ip.into());
        self
    }

    pub fn resource_id(mut self, id: impl Into<String>) -> Self {
        self.event.resource_id = Some(id.into());
        self
    }

    pub fn status(mut self, status: AuditStatus) -> Self {
        self.event.status = status;
        self
    }

    /// Replace all metadata
    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.event.metadata = metadata;
        self
    }

    /// Add one metadata entry
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.event.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> NewAuditEvent {
        self.event
    }
}

/// Query criteria. Every field is optional; `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub actor_id: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub start_time: Option<OffsetDateTime>,
    pub end_time: Option<OffsetDateTime>,
    pub status: Option<AuditStatus>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn actor(id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unsupported export format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn event() -> AuditEvent {
        AuditEvent {
            id: "evt-1".into(),
            timestamp: datetime!(2024-03-10 12:00 UTC),
            actor_id: Some("user-1".into()),
            actor_email: None,
            ip_address: None,
            action: "queue.enqueue".into(),
            resource: "queue".into(),
            resource_id: None,
            status: AuditStatus::Success,
            metadata: Map::new(),
            compliant: true,
        }
    }

    #[test]
    fn test_builder() {
        let new = AuditEventBuilder::new("user.login", "session")
            .actor("user-1")
            .ip_address("10.0.0.1")
            .status(AuditStatus::Failure)
            .meta("attempt", 3)
            .build();

        assert_eq!(new.action, "user.login");
        assert_eq!(new.actor_id.as_deref(), Some("user-1"));
        assert_eq!(new.status, AuditStatus::Failure);
        assert_eq!(new.metadata["attempt"], 3);
    }

    #[test]
    fn test_filter_matching() {
        let event = event();
        assert!(event.matches(&AuditFilter::default()));
        assert!(event.matches(&AuditFilter::actor("user-1")));
        assert!(!event.matches(&AuditFilter::actor("user-2")));
        assert!(!event.matches(&AuditFilter {
            status: Some(AuditStatus::Failure),
            ..Default::default()
        }));
        assert!(!event.matches(&AuditFilter {
            start_time: Some(datetime!(2024-03-11 00:00 UTC)),
            ..Default::default()
        }));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(event()).unwrap();
        assert_eq!(json["actorId"], "user-1");
        assert_eq!(json["status"], "success");
        assert_eq!(json["timestamp"], "2024-03-10T12:00:00Z");
        assert!(json.get("actorEmail").is_none());
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
