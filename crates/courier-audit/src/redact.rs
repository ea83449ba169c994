//! Metadata redaction.
//!
//! A metadata key is sensitive when its lowercase form contains any configured
//! field name. Sensitive values are masked by shape; nested objects under a
//! non-sensitive key are walked for their own sensitive keys.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern")
});

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9][0-9\s().\-]{6,}$").expect("valid phone pattern"));

const FULL_MASK: &str = "****";

#[derive(Debug, Clone)]
pub struct Redactor {
    fields: Vec<String>,
}

impl Redactor {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|f| f.as_ref().to_lowercase())
                .filter(|f| !f.is_empty())
                .collect(),
        }
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.fields.iter().any(|f| key.contains(f.as_str()))
    }

    pub fn redact(&self, metadata: Map<String, Value>) -> Map<String, Value> {
        metadata
            .into_iter()
            .map(|(key, value)| {
                let value = if self.is_sensitive(&key) {
                    mask_value(value)
                } else {
                    self.redact_nested(value)
                };
                (key, value)
            })
            .collect()
    }

    fn redact_nested(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.redact(map)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.redact_nested(v)).collect())
            }
            other => other,
        }
    }
}

/// Mask a value found under a sensitive key.
pub fn mask_value(value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(mask_str(&s)),
        Value::Number(_) | Value::Bool(_) => Value::String(FULL_MASK.to_string()),
        Value::Array(items) => Value::Array(items.into_iter().map(mask_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, mask_value(v)))
                .collect(),
        ),
    }
}

fn mask_str(s: &str) -> String {
    if EMAIL.is_match(s) {
        return mask_email(s);
    }
    if PHONE.is_match(s) {
        let digits: Vec<char> = s.chars().filter(char::is_ascii_digit).collect();
        if digits.len() >= 7 {
            let last4: String = digits[digits.len() - 4..].iter().collect();
            return format!("***-***-{last4}");
        }
    }

    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 4 {
        return FULL_MASK.to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}***{tail}")
}

fn mask_email(s: &str) -> String {
    let (local, domain) = s.rsplit_once('@').unwrap_or((s, ""));
    let mut chars = local.chars();
    let first = chars.next().unwrap_or('*');
    let last = chars.next_back().unwrap_or(first);
    format!("{first}***{last}@{domain}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_sensitive_fields;
    use serde_json::json;

    fn redactor() -> Redactor {
        Redactor::new(default_sensitive_fields())
    }

    fn redact(value: Value) -> Value {
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        Value::Object(redactor().redact(map))
    }

    #[test]
    fn test_email_and_password() {
        let out = redact(json!({"email": "test@example.com", "password": "secret123"}));
        assert_eq!(out["email"], "t***t@example.com");
        assert_ne!(out["password"], "secret123");
        assert_eq!(out["password"], "se***23");
    }

    #[test]
    fn test_case_insensitive_substring() {
        let out = redact(json!({"X-Auth-Token": "abcdefgh", "userEmail": "a@b.io"}));
        assert_eq!(out["X-Auth-Token"], "ab***gh");
        assert_eq!(out["userEmail"], "a***a@b.io");
    }

    #[test]
    fn test_phone_keeps_last_four() {
        let out = redact(json!({"phone": "+1 (555) 123-4567"}));
        assert_eq!(out["phone"], "***-***-4567");
    }

    #[test]
    fn test_short_and_non_string_values() {
        let out = redact(json!({"pin": "1234", "cvv": 123, "token": true, "secret": null}));
        assert_eq!(out["pin"], "****");
        assert_eq!(out["cvv"], "****");
        assert_eq!(out["token"], "****");
        assert_eq!(out["secret"], Value::Null);
    }

    #[test]
    fn test_nested_objects() {
        let out = redact(json!({
            "request": {"path": "/login", "password": "hunter22"},
            "credentials": {"user": "alice", "key": "k"},
            "tokens": ["abcdefgh", "xy"]
        }));
        assert_eq!(out["request"]["path"], "/login");
        assert_eq!(out["request"]["password"], "hu***22");
        assert_eq!(out["credentials"]["user"], "al***ce");
        assert_eq!(out["credentials"]["key"], "****");
        assert_eq!(out["tokens"], json!(["ab***gh", "****"]));
    }

    #[test]
    fn test_unmatched_untouched() {
        let out = redact(json!({"channel": "orders", "count": 3}));
        assert_eq!(out, json!({"channel": "orders", "count": 3}));
    }
}
