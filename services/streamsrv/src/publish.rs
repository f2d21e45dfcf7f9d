//! Realtime publish of enriched packets

use async_trait::async_trait;
use common::redis::RedisClient;
use errors::StreamResult;
use hstream_model::Packet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Message pushed to realtime subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub key: String,
    pub packet: Packet,
}

#[async_trait]
pub trait RealtimePublisher: Send + Sync + 'static {
    async fn publish(&self, message: &RealtimeMessage) -> StreamResult<()>;
}

/// Redis pub/sub on `<prefix>.<projectId>`
pub struct RedisPublisher {
    client: Arc<RedisClient>,
    channel: String,
}

impl RedisPublisher {
    pub fn new(client: Arc<RedisClient>, channel_prefix: &str, project_id: i64) -> Self {
        Self {
            client,
            channel: format!("{}.{}", channel_prefix, project_id),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl RealtimePublisher for RedisPublisher {
    async fn publish(&self, message: &RealtimeMessage) -> StreamResult<()> {
        let body = serde_json::to_string(message)?;
        let receivers = self.client.publish(&self.channel, &body).await?;
        debug!(channel = %self.channel, receivers, "Published packet");
        Ok(())
    }
}

/// In-process publisher on a tokio broadcast channel
#[derive(Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<RealtimeMessage>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl RealtimePublisher for BroadcastPublisher {
    async fn publish(&self, message: &RealtimeMessage) -> StreamResult<()> {
        // No subscribers is not an error
        let _ = self.sender.send(message.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn message() -> RealtimeMessage {
        RealtimeMessage {
            key: "3.12".to_string(),
            packet: Packet {
                id: 12,
                name: "weather".to_string(),
                device_id: 3,
                project_id: 1,
                timestamp_field: "ts".to_string(),
                fields: Vec::new(),
            },
        }
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();
        publisher.publish(&message()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), message());
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        assert!(BroadcastPublisher::new(8).publish(&message()).await.is_ok());
    }

    #[test]
    fn test_message_shape() {
        let value = serde_json::to_value(message()).unwrap();
        assert_eq!(value["key"], "3.12");
        assert_eq!(value["packet"]["deviceId"], 3);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_redis_channel_name() {
        let client = Arc::new(RedisClient::new("redis://127.0.0.1:6379").await.unwrap());
        let publisher = RedisPublisher::new(client, "hstream.realtime", 1);
        assert_eq!(publisher.channel(), "hstream.realtime.1");
        publisher.publish(&message()).await.unwrap();
    }
}
