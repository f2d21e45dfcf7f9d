//! Enrichment and rule evaluation stage
//!
//! Sends each packet to the external rule engine and derives the event and
//! alarm-event packets its verdicts call for. A failing engine never drops
//! the packet itself.

use async_trait::async_trait;
use common::redis::RedisClient;
use errors::{StreamError, StreamResult};
use hstream_model::{
    FieldType, Packet, PacketField, RuleKind, RuleVerdict, ALARM_EVENT_SUFFIX, EVENT_FIELD,
    EVENT_SUFFIX, VERDICT_FIELD,
};
use std::sync::Arc;
use tracing::debug;

/// Seam to the external rule engine
#[async_trait]
pub trait RuleEvaluator: Send + Sync + 'static {
    /// Verdicts of every rule that applies to `packet`
    async fn evaluate(&self, packet: &Packet) -> StreamResult<Vec<RuleVerdict>>;
}

/// Evaluator used when no rule engine is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvaluator;

#[async_trait]
impl RuleEvaluator for NoopEvaluator {
    async fn evaluate(&self, _packet: &Packet) -> StreamResult<Vec<RuleVerdict>> {
        Ok(Vec::new())
    }
}

/// Rule engine loaded as a Redis Function
///
/// `FCALL <function> 0 <packet-json>` returns a JSON array of verdicts.
pub struct RedisFunctionEvaluator {
    client: Arc<RedisClient>,
    function: String,
}

impl RedisFunctionEvaluator {
    pub fn new(client: Arc<RedisClient>, function: impl Into<String>) -> Self {
        Self {
            client,
            function: function.into(),
        }
    }
}

#[async_trait]
impl RuleEvaluator for RedisFunctionEvaluator {
    async fn evaluate(&self, packet: &Packet) -> StreamResult<Vec<RuleVerdict>> {
        let body = serde_json::to_string(packet)?;
        let reply = self
            .client
            .fcall(&self.function, &[], &[&body])
            .await
            .map_err(|e| StreamError::Evaluation(format!("{:#}", e)))?;
        parse_verdicts(&reply)
    }
}

/// Parse an engine reply; an empty reply means no rule applied
pub fn parse_verdicts(reply: &str) -> StreamResult<Vec<RuleVerdict>> {
    if reply.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(reply)
        .map_err(|e| StreamError::Evaluation(format!("invalid verdict reply: {}", e)))
}

// ============================================================================
// Enricher
// ============================================================================

/// Stage output: the packet, its derived packets, and an evaluation error
/// to dead-letter if the engine failed
#[derive(Debug)]
pub struct Enrichment {
    pub packet: Packet,
    pub derived: Vec<Packet>,
    pub error: Option<StreamError>,
}

pub struct Enricher {
    evaluator: Arc<dyn RuleEvaluator>,
}

impl Enricher {
    pub fn new(evaluator: Arc<dyn RuleEvaluator>) -> Self {
        Self { evaluator }
    }

    pub async fn enrich(&self, packet: Packet) -> Enrichment {
        let derived = match self.evaluator.evaluate(&packet).await {
            Ok(verdicts) => derive_packets(&packet, &verdicts),
            Err(e) => Err(e),
        };
        match derived {
            Ok(derived) => {
                if !derived.is_empty() {
                    debug!(packet = packet.id, derived = derived.len(), "Derived packets");
                }
                Enrichment {
                    packet,
                    derived,
                    error: None,
                }
            },
            Err(e) => Enrichment {
                packet,
                derived: Vec::new(),
                error: Some(match e {
                    StreamError::Evaluation(_) => e,
                    other => StreamError::Evaluation(other.to_string()),
                }),
            },
        }
    }
}

/// Event packets for fired Event verdicts, alarm-event packets for every
/// AlarmEvent verdict
pub fn derive_packets(packet: &Packet, verdicts: &[RuleVerdict]) -> StreamResult<Vec<Packet>> {
    let mut derived = Vec::new();
    for verdict in verdicts {
        let suffix = match verdict.kind {
            RuleKind::Event if verdict.fired_rule.fired => EVENT_SUFFIX,
            RuleKind::Event => continue,
            RuleKind::AlarmEvent { .. } => ALARM_EVENT_SUFFIX,
        };
        let mut fields = packet.fields.clone();
        fields.push(PacketField::new(
            0,
            EVENT_FIELD,
            FieldType::Text,
            serde_json::Value::String(serde_json::to_string(&verdict.payload)?),
        ));
        fields.push(PacketField::new(
            0,
            VERDICT_FIELD,
            FieldType::Text,
            serde_json::Value::String(serde_json::to_string(verdict)?),
        ));
        derived.push(Packet {
            id: 0,
            name: format!("{}{}", packet.name, suffix),
            device_id: packet.device_id,
            project_id: packet.project_id,
            timestamp_field: packet.timestamp_field.clone(),
            fields,
        });
    }
    Ok(derived)
}
