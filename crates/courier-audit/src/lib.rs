//! # courier-audit
//!
//! Audit trail recorder. Events are redacted once on [`AuditRecorder::log`],
//! held in a bounded in-memory buffer and flushed periodically into
//! day/actor/action sorted-set indexes in the backing store.
//!
//! Nothing here ever fails the caller: store errors are logged and turned into
//! empty results, and a gated-off recorder returns an empty id.

pub mod config;
pub mod error;
pub mod event;
pub mod export;
pub mod recorder;
pub mod redact;

pub use config::AuditConfig;
pub use error::{AuditError, AuditResult};
pub use event::{
    AuditEvent, AuditEventBuilder, AuditFilter, AuditStatus, ExportFormat, NewAuditEvent,
};
pub use recorder::AuditRecorder;
pub use redact::Redactor;
