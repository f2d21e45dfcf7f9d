//! Packet schemas
//!
//! A schema describes how raw payloads of one packet definition are turned
//! into [`Packet`](crate::Packet)s: which dot paths map to which field ids
//! and types, and how the timestamp is encoded.

use crate::error::{ModelError, Result};
use crate::packet::FieldType;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Payload serialization of a packet definition
///
/// CSV payloads alternate names and values (`temperature,21.5,gps.latitude,45.1`);
/// XML payloads nest elements under one root or use dotted element names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationType {
    #[default]
    Json,
    Csv,
    Xml,
}

/// Encoding of the timestamp field
///
/// Written in configuration as `unix_millis`, `unix_seconds` or a strftime
/// pattern such as `%Y-%m-%dT%H:%M:%S%.3f%z`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    #[default]
    UnixMillis,
    UnixSeconds,
    Pattern(String),
}

impl TimestampFormat {
    /// Convert a raw timestamp value to epoch milliseconds
    pub fn to_millis(&self, value: &serde_json::Value) -> Result<i64> {
        match self {
            TimestampFormat::UnixMillis => integer(value)
                .ok_or_else(|| ModelError::InvalidTimestamp(format!("expected unix millis, got {value}"))),
            TimestampFormat::UnixSeconds => integer(value)
                .and_then(|secs| secs.checked_mul(1000))
                .ok_or_else(|| ModelError::InvalidTimestamp(format!("expected unix seconds, got {value}"))),
            TimestampFormat::Pattern(pattern) => {
                let text = value.as_str().ok_or_else(|| {
                    ModelError::InvalidTimestamp(format!("expected text for '{pattern}', got {value}"))
                })?;
                parse_with_pattern(text, pattern)
            },
        }
    }
}

/// Integer or integer text (CSV and XML carry numbers as text)
fn integer(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Try zoned, naive and date-only parses in turn; naive values are UTC
fn parse_with_pattern(text: &str, pattern: &str) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_str(text, pattern) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, pattern) {
        return Ok(naive.and_utc().timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, pattern) {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }
    Err(ModelError::InvalidTimestamp(format!(
        "'{text}' does not match '{pattern}'"
    )))
}

impl From<String> for TimestampFormat {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "unix_millis" | "unix" | "millis" => TimestampFormat::UnixMillis,
            "unix_seconds" | "seconds" => TimestampFormat::UnixSeconds,
            _ => TimestampFormat::Pattern(value),
        }
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampFormat::UnixMillis => f.write_str("unix_millis"),
            TimestampFormat::UnixSeconds => f.write_str("unix_seconds"),
            TimestampFormat::Pattern(p) => f.write_str(p),
        }
    }
}

impl Serialize for TimestampFormat {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimestampFormat {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(TimestampFormat::from)
    }
}

/// Id and type of one schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub id: i64,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// Schema of one packet definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketSchema {
    pub packet_id: i64,
    pub device_id: i64,
    pub project_id: i64,
    pub name: String,
    #[serde(default)]
    pub serialization: SerializationType,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    #[serde(default)]
    pub timestamp_format: TimestampFormat,
    /// Flat dot-path map (`gps.latitude` -> spec)
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

fn default_timestamp_field() -> String {
    "timestamp".to_string()
}

impl PacketSchema {
    /// Message key of this packet definition (`<deviceId>.<packetId>`)
    pub fn message_key(&self) -> String {
        format!("{}.{}", self.device_id, self.packet_id)
    }

    /// Whether `path` names a schema field or the timestamp field
    pub fn knows(&self, path: &str) -> bool {
        self.fields.contains_key(path) || path == self.timestamp_field
    }

    /// Field paths excluding the timestamp field
    pub fn data_fields(&self) -> impl Iterator<Item = (&String, &FieldSpec)> {
        self.fields
            .iter()
            .filter(move |(path, _)| !path.eq_ignore_ascii_case(&self.timestamp_field))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unix_formats() {
        assert_eq!(TimestampFormat::UnixMillis.to_millis(&json!(1_700_000_000_123_i64)).unwrap(), 1_700_000_000_123);
        assert_eq!(TimestampFormat::UnixSeconds.to_millis(&json!(1_700_000_000)).unwrap(), 1_700_000_000_000);
        assert_eq!(TimestampFormat::UnixMillis.to_millis(&json!(" 1700000000123")).unwrap(), 1_700_000_000_123);
        assert_eq!(TimestampFormat::UnixSeconds.to_millis(&json!("1700000000")).unwrap(), 1_700_000_000_000);
        assert!(TimestampFormat::UnixMillis.to_millis(&json!("soon")).is_err());
        assert!(TimestampFormat::UnixMillis.to_millis(&json!(1.5)).is_err());
    }

    #[test]
    fn test_pattern_formats() {
        let zoned = TimestampFormat::from("%Y-%m-%dT%H:%M:%S%z".to_string());
        assert_eq!(
            zoned.to_millis(&json!("1970-01-01T01:00:00+0100")).unwrap(),
            0
        );

        let naive = TimestampFormat::from("%Y-%m-%d %H:%M:%S".to_string());
        assert_eq!(naive.to_millis(&json!("1970-01-01 00:00:01")).unwrap(), 1_000);

        let date = TimestampFormat::from("%d/%m/%Y".to_string());
        assert_eq!(date.to_millis(&json!("02/01/1970")).unwrap(), 86_400_000);

        assert!(naive.to_millis(&json!("yesterday")).is_err());
        assert!(naive.to_millis(&json!(12)).is_err());
    }

    #[test]
    fn test_schema_from_yaml() {
        let yaml = r#"
packet_id: 12
device_id: 3
project_id: 1
name: weather
serialization: csv
timestamp_field: ts
timestamp_format: unix_seconds
fields:
  temperature: { id: 1, type: DOUBLE }
  gps.latitude: { id: 2, type: double }
  ts: { id: 3, type: TIMESTAMP }
"#;
        let schema: PacketSchema = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(schema.timestamp_format, TimestampFormat::UnixSeconds);
        assert_eq!(schema.serialization, SerializationType::Csv);
        assert!(schema.knows("gps.latitude"));
        assert!(schema.knows("ts"));
        assert!(!schema.knows("id"));
        assert_eq!(schema.message_key(), "3.12");
        assert_eq!(schema.fields["gps.latitude"].field_type, FieldType::Double);

        let data: Vec<&String> = schema.data_fields().map(|(p, _)| p).collect();
        assert_eq!(data, vec!["gps.latitude", "temperature"]);
    }
}
