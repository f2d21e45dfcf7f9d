//! Deserialization stage
//!
//! Turns a raw payload into a [`Packet`] using the packet definition
//! registered for the message key. The definition's serialization picks the
//! decoder (JSON, CSV or XML); every decoder yields one flat-or-nested body
//! that is then mapped onto the schema. Schema paths may appear flat
//! (`"gps.latitude": 1.0`) or nested (`"gps": {"latitude": 1.0}`); fields
//! absent from the payload are left out. Numeric and boolean text is
//! coerced to the declared type.

use errors::{StreamError, StreamResult};
use hstream_model::{FieldType, Packet, PacketField, PacketSchema, SerializationType};
use quick_xml::events::Event;
use quick_xml::Reader;
use hstream_store::SharedClock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::source::RawMessage;

/// Schema registry plus payload parser
pub struct Deserializer {
    schemas: HashMap<String, PacketSchema>,
    clock: SharedClock,
}

impl Deserializer {
    pub fn new(schemas: impl IntoIterator<Item = PacketSchema>, clock: SharedClock) -> Self {
        Self {
            schemas: schemas
                .into_iter()
                .map(|schema| (schema.message_key(), schema))
                .collect(),
            clock,
        }
    }

    pub fn schema(&self, key: &str) -> Option<&PacketSchema> {
        self.schemas.get(key)
    }

    pub fn deserialize(&self, message: &RawMessage) -> StreamResult<Packet> {
        let schema = self.schemas.get(&message.key).ok_or_else(|| {
            StreamError::Deserialization(format!("no packet definition for key '{}'", message.key))
        })?;

        let body = decode_body(schema, &message.payload)?;

        let mut fields = Vec::new();
        for (path, spec) in schema.data_fields() {
            let Some(raw) = lookup(&body, path) else {
                continue;
            };
            let value = coerce(spec.field_type, raw).map_err(|reason| {
                StreamError::Deserialization(format!("field '{}': {}", path, reason))
            })?;
            let field = PacketField::new(spec.id, leaf(path), spec.field_type, value);
            insert_field(&mut fields, path, field);
        }

        let timestamp = match lookup(&body, &schema.timestamp_field) {
            Some(raw) => schema
                .timestamp_format
                .to_millis(raw)
                .map_err(|e| StreamError::Deserialization(e.to_string()))?,
            None => {
                debug!(key = %message.key, "No timestamp in payload, using receive time");
                self.clock.now_millis()
            },
        };
        let timestamp_id = schema
            .fields
            .get(&schema.timestamp_field)
            .map(|spec| spec.id)
            .unwrap_or_default();
        insert_field(
            &mut fields,
            &schema.timestamp_field,
            PacketField::new(
                timestamp_id,
                leaf(&schema.timestamp_field),
                FieldType::Timestamp,
                Value::from(timestamp),
            ),
        );

        Ok(Packet {
            id: schema.packet_id,
            name: schema.name.clone(),
            device_id: schema.device_id,
            project_id: schema.project_id,
            timestamp_field: schema.timestamp_field.clone(),
            fields,
        })
    }
}

// ============================================================================
// Payload decoders
// ============================================================================

fn decode_body(schema: &PacketSchema, payload: &[u8]) -> StreamResult<Map<String, Value>> {
    match schema.serialization {
        SerializationType::Json => serde_json::from_slice(payload)
            .map_err(|e| StreamError::Deserialization(format!("invalid JSON payload: {}", e))),
        SerializationType::Csv => decode_csv(schema, payload),
        SerializationType::Xml => decode_xml(payload),
    }
}

/// Alternating `name,value` cells, possibly over several lines
///
/// Cells are skipped until one names a schema field; the cell after it is
/// that field's value. Labels such as `"id","Sensor 2"` fall through.
fn decode_csv(schema: &PacketSchema, payload: &[u8]) -> StreamResult<Map<String, Value>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(payload);

    let mut body = Map::new();
    let mut pending: Option<String> = None;
    for record in reader.records() {
        let record = record
            .map_err(|e| StreamError::Deserialization(format!("invalid CSV payload: {}", e)))?;
        for cell in record.iter() {
            match pending.take() {
                Some(name) => {
                    body.insert(name, Value::String(cell.to_string()));
                },
                None if schema.knows(cell) => pending = Some(cell.to_string()),
                None => {},
            }
        }
    }
    Ok(body)
}

/// Leaf elements below the root keyed by their dotted path; repeated
/// elements collect into an array
fn decode_xml(payload: &[u8]) -> StreamResult<Map<String, Value>> {
    let invalid = |reason: String| StreamError::Deserialization(format!("invalid XML payload: {}", reason));
    let text = std::str::from_utf8(payload).map_err(|e| invalid(e.to_string()))?;
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut body = Map::new();
    let mut path: Vec<String> = Vec::new();
    let mut content = String::new();
    loop {
        match reader.read_event().map_err(|e| invalid(e.to_string()))? {
            Event::Start(element) => {
                path.push(String::from_utf8_lossy(element.name().as_ref()).into_owned());
                content.clear();
            },
            Event::Text(chars) => {
                content.push_str(&chars.unescape().map_err(|e| invalid(e.to_string()))?);
            },
            Event::CData(data) => content.push_str(&String::from_utf8_lossy(&data.into_inner())),
            Event::End(_) => {
                if path.len() > 1 && !content.is_empty() {
                    let key = path[1..].join(".");
                    append_value(&mut body, key, Value::String(std::mem::take(&mut content)));
                }
                content.clear();
                path.pop();
            },
            Event::Eof => break,
            _ => {},
        }
    }
    if !path.is_empty() {
        return Err(invalid(format!("unclosed element '{}'", path.join("."))));
    }
    Ok(body)
}

fn append_value(body: &mut Map<String, Value>, key: String, value: Value) {
    match body.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        },
        None => {
            body.insert(key, value);
        },
    }
}

fn leaf(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// Flat key first, then nested objects
fn lookup<'a>(body: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(value) = body.get(path) {
        return Some(value);
    }
    let mut segments = path.split('.');
    let mut current = body.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Place `field` under the OBJECT fields named by the leading path segments
fn insert_field(fields: &mut Vec<PacketField>, path: &str, field: PacketField) {
    match path.split_once('.') {
        None => fields.push(field),
        Some((head, rest)) => {
            let index = match fields
                .iter()
                .position(|f| f.name == head && f.field_type == FieldType::Object)
            {
                Some(index) => index,
                None => {
                    fields.push(PacketField::object(head, Vec::new()));
                    fields.len() - 1
                },
            };
            insert_field(&mut fields[index].inner_fields, rest, field);
        },
    }
}

/// Convert a payload value to the declared type, element-wise for arrays
fn coerce(field_type: FieldType, value: &Value) -> Result<Value, String> {
    if let Value::Array(items) = value {
        return items
            .iter()
            .map(|item| coerce(field_type, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }

    let mismatch = || format!("expected {}, got {}", field_type, value);
    match field_type {
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => s.trim().parse::<bool>().map(Value::Bool).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        FieldType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        FieldType::Float | FieldType::Double => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s.trim().parse::<f64>().map(Value::from).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        FieldType::Text => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Object(_) | Value::Null => Err(mismatch()),
            other => Ok(Value::String(other.to_string())),
        },
        FieldType::File => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
        FieldType::Date | FieldType::Timestamp | FieldType::Object => {
            if field_type.accepts(value) {
                Ok(value.clone())
            } else {
                Err(mismatch())
            }
        },
    }
}
