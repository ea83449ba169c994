use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Drain order within a tick.
    pub const ALL: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted message. `retry_count <= max_retries` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub producer_id: String,
    pub channel: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub priority: Priority,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Enqueue request; id, timestamp and retry count are assigned by the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub producer_id: String,
    pub channel: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl NewMessage {
    pub fn new(
        producer_id: impl Into<String>,
        channel: impl Into<String>,
        kind: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            producer_id: producer_id.into(),
            channel: channel.into(),
            kind: kind.into(),
            payload,
            priority: None,
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Entry of a channel's dead-letter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub message: Message,
    pub error: String,
    #[serde(with = "time::serde::rfc3339")]
    pub failed_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_dead_letter: u64,
    /// Moving average of handler time in milliseconds
    pub average_processing_time: f64,
    pub queue_depth: u64,
    pub active_workers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_order_and_default() {
        assert_eq!(Priority::ALL[0], Priority::Urgent);
        assert_eq!(Priority::ALL[3], Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!(Priority::High.to_string(), "high");
    }

    #[test]
    fn test_message_wire_shape() {
        let message = Message {
            id: "m1".into(),
            producer_id: "p1".into(),
            channel: "orders".into(),
            kind: "order.created".into(),
            payload: json!({"total": 10}),
            priority: Priority::Urgent,
            created_at: time::macros::datetime!(2024-01-01 00:00 UTC),
            retry_count: 0,
            max_retries: 3,
            last_error: None,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["producerId"], "p1");
        assert_eq!(value["type"], "order.created");
        assert_eq!(value["priority"], "urgent");
        assert!(value.get("lastError").is_none());

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }
}
