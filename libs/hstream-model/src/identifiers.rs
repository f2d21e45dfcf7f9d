//! Fixed names shared by the pipeline and the sinks

/// Name suffix of derived event packets
pub const EVENT_SUFFIX: &str = "_event";

/// Name suffix of derived alarm-event packets
pub const ALARM_EVENT_SUFFIX: &str = "_event_alarm";

/// TEXT field of derived packets holding the rule action payload
pub const EVENT_FIELD: &str = "event";

/// TEXT field of derived packets holding the serialized verdict
pub const VERDICT_FIELD: &str = "rule";

/// Timeline identifier of classified events
pub const EVENT_TIMELINE: &str = "Event";

/// Timeline identifier of dead-letter records
pub const ERROR_TIMELINE: &str = "Error";

/// Timeline identifier of an ordinary packet
pub fn packet_timeline(packet_id: i64) -> String {
    format!("HPacket.{}", packet_id)
}

/// Timeline identifier of a device's alarm transitions
pub fn alarm_timeline(device_id: i64) -> String {
    format!("Alarm.{}", device_id)
}
