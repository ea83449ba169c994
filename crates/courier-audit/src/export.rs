//! Serialization of query results for export.

use time::format_description::well_known::Rfc3339;

use crate::{AuditError, AuditEvent, AuditResult, ExportFormat};

pub const CSV_HEADER: [&str; 11] = [
    "id",
    "timestamp",
    "actorId",
    "actorEmail",
    "ipAddress",
    "action",
    "resource",
    "resourceId",
    "status",
    "compliant",
    "metadata",
];

pub fn render(events: &[AuditEvent], format: ExportFormat) -> AuditResult<String> {
    match format {
        ExportFormat::Json => to_json(events),
        ExportFormat::Csv => to_csv(events),
    }
}

/// Pretty-printed JSON array.
pub fn to_json(events: &[AuditEvent]) -> AuditResult<String> {
    Ok(serde_json::to_string_pretty(events)?)
}

/// RFC 4180 CSV with a header row; metadata as compact JSON.
pub fn to_csv(events: &[AuditEvent]) -> AuditResult<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer
        .write_record(CSV_HEADER)
        .map_err(|e| AuditError::export(e.to_string()))?;

    for event in events {
        let timestamp = event
            .timestamp
            .format(&Rfc3339)
            .map_err(|e| AuditError::export(e.to_string()))?;
        let metadata = serde_json::to_string(&event.metadata)?;
        let record = [
            event.id.as_str(),
            timestamp.as_str(),
            event.actor_id.as_deref().unwrap_or_default(),
            event.actor_email.as_deref().unwrap_or_default(),
            event.ip_address.as_deref().unwrap_or_default(),
            event.action.as_str(),
            event.resource.as_str(),
            event.resource_id.as_deref().unwrap_or_default(),
            event.status.as_str(),
            if event.compliant { "true" } else { "false" },
            metadata.as_str(),
        ];
        writer
            .write_record(record)
            .map_err(|e| AuditError::export(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AuditError::export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| AuditError::export(e.to_string()))
}
