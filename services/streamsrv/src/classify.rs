//! Routing/classification stage
//!
//! Every packet is exactly one of: ordinary packet, event, alarm event.

use errors::{StreamError, StreamResult};
use hstream_model::{
    alarm_timeline, packet_timeline, Packet, RuleKind, RuleVerdict, EVENT_FIELD, EVENT_TIMELINE,
};

/// Classified packet, ready for the sinks
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Packet(Packet),
    Event {
        packet: Packet,
        verdict: RuleVerdict,
    },
    AlarmEvent {
        packet: Packet,
        verdict: RuleVerdict,
        alarm_id: i64,
    },
}

impl Classified {
    pub fn packet(&self) -> &Packet {
        match self {
            Classified::Packet(packet)
            | Classified::Event { packet, .. }
            | Classified::AlarmEvent { packet, .. } => packet,
        }
    }

    /// Timeline identifier the packet is counted under
    pub fn timeline_identifier(&self) -> String {
        match self {
            Classified::Packet(packet) => packet_timeline(packet.id),
            Classified::Event { .. } => EVENT_TIMELINE.to_string(),
            Classified::AlarmEvent { packet, .. } => alarm_timeline(packet.device_id),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Classified::Packet(_) => "packet",
            Classified::Event { .. } => "event",
            Classified::AlarmEvent { .. } => "alarm_event",
        }
    }
}

pub fn classify(packet: Packet) -> StreamResult<Classified> {
    if packet.is_alarm_event() {
        let verdict = packet.verdict().map_err(StreamError::from)?;
        let alarm_id = match verdict.kind {
            RuleKind::AlarmEvent { alarm_id } => alarm_id,
            RuleKind::Event => {
                return Err(StreamError::Classification(format!(
                    "alarm-event packet '{}' carries a plain event verdict",
                    packet.name
                )))
            },
        };
        return Ok(Classified::AlarmEvent {
            packet,
            verdict,
            alarm_id,
        });
    }
    if packet.is_event() {
        let verdict = packet.verdict().map_err(StreamError::from)?;
        return Ok(Classified::Event { packet, verdict });
    }
    Ok(Classified::Packet(packet))
}

/// Rule action JSON carried by an event packet
pub fn event_payload(packet: &Packet) -> serde_json::Value {
    packet
        .field(EVENT_FIELD)
        .and_then(|f| f.value.as_ref())
        .and_then(|v| v.as_str())
        .and_then(|text| serde_json::from_str(text).ok())
        .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::enrich::derive_packets;
    use hstream_model::{FieldType, FiredRule, PacketField};
    use serde_json::json;

    fn base() -> Packet {
        Packet {
            id: 12,
            name: "weather".to_string(),
            device_id: 3,
            project_id: 1,
            timestamp_field: "ts".to_string(),
            fields: vec![PacketField::new(5, "ts", FieldType::Timestamp, json!(100))],
        }
    }

    fn verdict(kind: RuleKind) -> RuleVerdict {
        RuleVerdict {
            fired_rule: FiredRule::new(1, true, 100),
            rule_name: String::new(),
            kind,
            payload: json!({"level": 2}),
        }
    }

    #[test]
    fn test_classes_are_exclusive() {
        let ordinary = classify(base()).unwrap();
        assert_eq!(ordinary.timeline_identifier(), "HPacket.12");

        let verdicts = [
            verdict(RuleKind::Event),
            verdict(RuleKind::AlarmEvent { alarm_id: 4 }),
        ];
        let derived = derive_packets(&base(), &verdicts).unwrap();
        let event = classify(derived[0].clone()).unwrap();
        assert_eq!(event.label(), "event");
        assert_eq!(event.timeline_identifier(), "Event");
        assert_eq!(event_payload(event.packet()), json!({"level": 2}));

        let alarm = classify(derived[1].clone()).unwrap();
        assert!(matches!(alarm, Classified::AlarmEvent { alarm_id: 4, .. }));
        assert_eq!(alarm.timeline_identifier(), "Alarm.3");
    }

    #[test]
    fn test_event_suffix_on_real_packet_is_ordinary() {
        let mut packet = base();
        packet.name = "door_event".to_string();
        assert!(matches!(classify(packet).unwrap(), Classified::Packet(_)));
    }

    #[test]
    fn test_event_without_verdict_fails() {
        let mut packet = base();
        packet.id = 0;
        packet.name = "weather_event".to_string();
        assert_eq!(classify(packet).unwrap_err().kind(), "ClassificationError");
    }
}
