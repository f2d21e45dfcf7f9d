//! Message sources
//!
//! A source yields raw device messages keyed `<deviceId>.<packetId>`. The
//! production source pops JSON envelopes off a Redis list; the channel
//! source feeds embedded pipelines and tests.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use common::redis::RedisClient;
use errors::StreamResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One raw message as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// `<deviceId>.<packetId>`
    pub key: String,
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text, for dead-letter records
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Wire envelope on the Redis list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub key: String,
    /// Base64 payload
    pub value: String,
}

impl Envelope {
    pub fn encode(message: &RawMessage) -> Self {
        Self {
            key: message.key.clone(),
            value: STANDARD.encode(&message.payload),
        }
    }

    pub fn decode(self) -> Result<RawMessage, String> {
        let payload = STANDARD
            .decode(self.value.as_bytes())
            .map_err(|e| format!("invalid base64 payload: {}", e))?;
        Ok(RawMessage::new(self.key, payload))
    }
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Message(RawMessage),
    /// Undecodable entry, kept for the dead-letter edge
    Malformed { raw: String, reason: String },
    /// Nothing arrived within the poll timeout
    Idle,
    /// Source exhausted; the pipeline drains and stops
    Closed,
}

#[async_trait]
pub trait MessageSource: Send {
    async fn poll(&mut self) -> StreamResult<SourceEvent>;
}

// ============================================================================
// Redis list source
// ============================================================================

/// BLPOP consumer of `streaming.<projectId>`
pub struct RedisListSource {
    client: Arc<RedisClient>,
    key: String,
    timeout_secs: f64,
}

impl RedisListSource {
    pub fn new(client: Arc<RedisClient>, key: impl Into<String>, timeout_secs: f64) -> Self {
        Self {
            client,
            key: key.into(),
            timeout_secs,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Parse one list entry
pub fn decode_entry(raw: String) -> SourceEvent {
    match serde_json::from_str::<Envelope>(&raw) {
        Ok(envelope) => match envelope.decode() {
            Ok(message) => SourceEvent::Message(message),
            Err(reason) => SourceEvent::Malformed { raw, reason },
        },
        Err(e) => SourceEvent::Malformed {
            reason: format!("invalid envelope: {}", e),
            raw,
        },
    }
}

#[async_trait]
impl MessageSource for RedisListSource {
    async fn poll(&mut self) -> StreamResult<SourceEvent> {
        let keys = [self.key.as_str()];
        let popped = self.client.blpop(&keys, self.timeout_secs).await?;
        Ok(match popped {
            Some((_, raw)) => decode_entry(raw),
            None => SourceEvent::Idle,
        })
    }
}

// ============================================================================
// Channel source
// ============================================================================

/// In-process source fed through an mpsc channel
pub struct ChannelSource {
    rx: mpsc::Receiver<RawMessage>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it
    pub fn new(capacity: usize) -> (mpsc::Sender<RawMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn poll(&mut self) -> StreamResult<SourceEvent> {
        Ok(match self.rx.recv().await {
            Some(message) => SourceEvent::Message(message),
            None => SourceEvent::Closed,
        })
    }
}
