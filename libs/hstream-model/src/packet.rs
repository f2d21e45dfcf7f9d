//! Packets and packet fields
//!
//! A packet is the structured form of one device message. It lives only for
//! one pipeline run: created by deserialization, enriched, routed to the
//! sinks and dropped.

use crate::error::{ModelError, Result};
use crate::identifiers::{ALARM_EVENT_SUFFIX, EVENT_SUFFIX, VERDICT_FIELD};
use crate::rule::RuleVerdict;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Field Type / Multiplicity
// ============================================================================

/// Declared type of a packet field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    #[serde(alias = "boolean")]
    Boolean,
    #[serde(alias = "integer")]
    Integer,
    #[serde(alias = "float")]
    Float,
    #[serde(alias = "double")]
    Double,
    #[serde(alias = "text")]
    Text,
    #[serde(alias = "date")]
    Date,
    #[serde(alias = "timestamp")]
    Timestamp,
    #[serde(alias = "object")]
    Object,
    #[serde(alias = "file")]
    File,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Boolean => "BOOLEAN",
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Text => "TEXT",
            FieldType::Date => "DATE",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Object => "OBJECT",
            FieldType::File => "FILE",
        }
    }

    /// Check whether a single JSON scalar fits this type
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            FieldType::Boolean => value.is_boolean(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Float | FieldType::Double => value.is_number(),
            FieldType::Text | FieldType::File => value.is_string(),
            FieldType::Date | FieldType::Timestamp => value.is_string() || value.is_i64(),
            FieldType::Object => matches!(value, Value::Object(_)),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BOOLEAN" => Ok(FieldType::Boolean),
            "INTEGER" => Ok(FieldType::Integer),
            "FLOAT" => Ok(FieldType::Float),
            "DOUBLE" => Ok(FieldType::Double),
            "TEXT" => Ok(FieldType::Text),
            "DATE" => Ok(FieldType::Date),
            "TIMESTAMP" => Ok(FieldType::Timestamp),
            "OBJECT" => Ok(FieldType::Object),
            "FILE" => Ok(FieldType::File),
            _ => Err(ModelError::UnknownVariant {
                kind: "field type",
                value: s.to_string(),
            }),
        }
    }
}

/// Shape of a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Multiplicity {
    #[default]
    Single,
    Array,
    Matrix,
}

impl Multiplicity {
    /// Guess the multiplicity from a JSON value (`[..]` array, `[[..]]` matrix)
    pub fn of(value: &serde_json::Value) -> Self {
        match value.as_array() {
            Some(items) if items.first().is_some_and(|v| v.is_array()) => Multiplicity::Matrix,
            Some(_) => Multiplicity::Array,
            None => Multiplicity::Single,
        }
    }
}

// ============================================================================
// PacketField
// ============================================================================

/// One named field of a packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketField {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub multiplicity: Multiplicity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inner_fields: Vec<PacketField>,
}

impl PacketField {
    /// Single-valued field
    pub fn new(
        id: i64,
        name: impl Into<String>,
        field_type: FieldType,
        value: serde_json::Value,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            field_type,
            multiplicity: Multiplicity::of(&value),
            value: Some(value),
            inner_fields: Vec::new(),
        }
    }

    /// OBJECT field grouping inner fields
    pub fn object(name: impl Into<String>, inner_fields: Vec<PacketField>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            field_type: FieldType::Object,
            multiplicity: Multiplicity::Single,
            value: None,
            inner_fields,
        }
    }
}

// ============================================================================
// Packet
// ============================================================================

/// Structured device message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    /// Packet definition id, `0` for derived event packets
    pub id: i64,
    pub name: String,
    pub device_id: i64,
    pub project_id: i64,
    pub timestamp_field: String,
    #[serde(default)]
    pub fields: Vec<PacketField>,
}

impl Packet {
    /// Resolve a dot path (`gps.latitude`) through OBJECT inner fields
    pub fn field(&self, path: &str) -> Option<&PacketField> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.fields.iter().find(|f| f.name == first)?;
        for segment in segments {
            current = current.inner_fields.iter().find(|f| f.name == segment)?;
        }
        Some(current)
    }

    /// Millisecond timestamp carried by the designated timestamp field
    pub fn timestamp_millis(&self) -> Option<i64> {
        self.field(&self.timestamp_field)?
            .value
            .as_ref()
            .and_then(|v| v.as_i64())
    }

    /// Derived event packet (`<name>_event`, id 0)
    pub fn is_event(&self) -> bool {
        self.id == 0 && self.name.ends_with(EVENT_SUFFIX)
    }

    /// Derived alarm-event packet (`<name>_event_alarm`, id 0)
    pub fn is_alarm_event(&self) -> bool {
        self.id == 0 && self.name.ends_with(ALARM_EVENT_SUFFIX)
    }

    /// Rule verdict attached to a derived packet
    pub fn verdict(&self) -> Result<RuleVerdict> {
        let raw = self
            .field(VERDICT_FIELD)
            .and_then(|f| f.value.as_ref())
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ModelError::InvalidVerdict(format!("packet '{}' has no verdict field", self.name))
            })?;
        serde_json::from_str(raw).map_err(|e| ModelError::InvalidVerdict(e.to_string()))
    }

    /// Split FILE fields off the packet
    ///
    /// Returns the packet without FILE fields (at any depth) and the removed
    /// `(field id, value)` pairs.
    pub fn strip_files(&self) -> (Packet, Vec<(i64, serde_json::Value)>) {
        let mut attachments = Vec::new();
        let fields = strip_file_fields(&self.fields, &mut attachments);
        (
            Packet {
                fields,
                ..self.clone()
            },
            attachments,
        )
    }
}

fn strip_file_fields(
    fields: &[PacketField],
    attachments: &mut Vec<(i64, serde_json::Value)>,
) -> Vec<PacketField> {
    let mut kept = Vec::with_capacity(fields.len());
    for field in fields {
        if field.field_type == FieldType::File {
            if let Some(value) = &field.value {
                attachments.push((field.id, value.clone()));
            }
            continue;
        }
        let mut field = field.clone();
        if !field.inner_fields.is_empty() {
            field.inner_fields = strip_file_fields(&field.inner_fields, attachments);
        }
        kept.push(field);
    }
    kept
}
