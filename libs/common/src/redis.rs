//! Redis client with connection pooling
//!
//! Thin async wrapper over a bb8 pool exposing the commands the ingestion
//! services use. Errors carry the command and key through `anyhow` context.

use anyhow::{Context, Result};
use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Redis connection pool configuration (`redis` config section)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_url")]
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of idle connections
    #[serde(default)]
    pub min_idle: Option<u32>,
    /// Pool checkout timeout in seconds; bounds every store call
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Idle timeout in seconds
    #[serde(default)]
    pub idle_timeout: Option<u64>,
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_max_connections() -> u32 {
    32
}

fn default_connection_timeout() -> u64 {
    5
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_connections: default_max_connections(),
            min_idle: None,
            connection_timeout: default_connection_timeout(),
            idle_timeout: Some(600),
        }
    }
}

impl RedisConfig {
    /// Create config from URL with default pool settings
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Redis asynchronous client with connection pooling
#[derive(Clone)]
pub struct RedisClient {
    pool: Arc<Pool<RedisConnectionManager>>,
    url: String,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("url", &self.url)
            .field("pool_state", &self.pool.state())
            .finish()
    }
}

impl RedisClient {
    /// Create a new client with default pool settings
    pub async fn new(url: &str) -> Result<Self> {
        Self::with_config(RedisConfig::from_url(url)).await
    }

    /// Create a client and verify the server answers PING
    pub async fn with_config(config: RedisConfig) -> Result<Self> {
        let client = Self::with_config_no_ping(config).await?;
        client.ping().await?;
        Ok(client)
    }

    /// Create a client without a PING round-trip
    ///
    /// Connections are opened lazily, so this succeeds without a live server.
    pub async fn with_config_no_ping(config: RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .context("Failed to create Redis connection manager")?;

        let mut pool_builder = Pool::builder()
            .max_size(config.max_connections.max(1))
            .connection_timeout(Duration::from_secs(config.connection_timeout.max(1)));

        if let Some(min_idle) = config.min_idle {
            pool_builder = pool_builder.min_idle(Some(min_idle));
        }
        if let Some(idle_timeout) = config.idle_timeout {
            pool_builder = pool_builder.idle_timeout(Some(Duration::from_secs(idle_timeout)));
        }

        let pool = pool_builder.build_unchecked(manager);

        Ok(Self {
            pool: Arc::new(pool),
            url: config.url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get a connection from the pool
    pub async fn get_connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
        self.pool
            .get()
            .await
            .context("Failed to get connection from pool")
    }

    /// PING operation - test connection
    pub async fn ping(&self) -> Result<String> {
        let mut conn = self.get_connection().await?;
        redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("Failed to PING Redis server")
    }

    /// PUBLISH operation, returns the number of receivers
    pub async fn publish(&self, channel: &str, message: &str) -> Result<u32> {
        let mut conn = self.get_connection().await?;
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to PUBLISH to channel: {}", channel))
    }

    // ========== Lists ==========

    /// BLPOP operation - blocking list pop
    /// Returns Some((key, value)) or None (timeout)
    pub async fn blpop(&self, keys: &[&str], timeout_secs: f64) -> Result<Option<(String, String)>> {
        let mut conn = self.get_connection().await?;
        redis::cmd("BLPOP")
            .arg(keys)
            .arg(timeout_secs)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to BLPOP from keys: {:?}", keys))
    }

    /// RPUSH operation - add element to list tail
    pub async fn rpush(&self, key: &str, value: &str) -> Result<u32> {
        let mut conn = self.get_connection().await?;
        redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to RPUSH to key: {}", key))
    }

    // ========== Hashes ==========

    /// Hash operation - set field
    pub async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.get_connection().await?;
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to HSET field {} in key: {}", field, key))
    }

    /// Hash operation - atomic integer increment
    pub async fn hincrby(&self, key: &str, field: &str, increment: i64) -> Result<i64> {
        let mut conn = self.get_connection().await?;
        redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(increment)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to HINCRBY field {} in key: {}", field, key))
    }

    /// Hash operation - get field
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.get_connection().await?;
        redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to HGET field {} from key: {}", field, key))
    }

    /// Hash operation - get all fields
    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>> {
        let mut conn = self.get_connection().await?;
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to HGETALL from key: {}", key))
    }

    // ========== Sets ==========

    /// Set operation - add member, true if newly added
    pub async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let added: i32 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to SADD member {} to key: {}", member, key))?;
        Ok(added > 0)
    }

    /// Add `member` to a set and fill any unset `hash_key` fields, in one
    /// MULTI/EXEC; true if the member was newly added
    ///
    /// Existing hash fields are left as they are (`HSETNX`).
    pub async fn sadd_with_hash_defaults(
        &self,
        set_key: &str,
        member: &str,
        hash_key: &str,
        fields: &[(String, String)],
    ) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("SADD").arg(set_key).arg(member);
        for (field, value) in fields {
            pipe.cmd("HSETNX")
                .arg(hash_key)
                .arg(field.as_str())
                .arg(value.as_str())
                .ignore();
        }
        let (added,): (i32,) = pipe
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to register {} in {} with {}", member, set_key, hash_key))?;
        Ok(added > 0)
    }

    /// Set operation - remove member, true if it was present
    pub async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let removed: i32 = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to SREM member {} from key: {}", member, key))?;
        Ok(removed > 0)
    }

    /// Set operation - retrieve all members
    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to SMEMBERS from key: {}", key))
    }

    // ========== Keys ==========

    /// Use SCAN for production-safe key iteration
    pub async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let mut keys = Vec::new();
        let mut cursor = 0u64;

        loop {
            let (new_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut *conn)
                .await
                .with_context(|| format!("Failed to SCAN with pattern: {}", pattern))?;

            keys.extend(batch);
            cursor = new_cursor;

            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }

    /// Delete one or more keys, returns how many existed
    pub async fn del(&self, keys: &[&str]) -> Result<u32> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_connection().await?;
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(*key);
        }
        cmd.query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to DEL keys: {:?}", keys))
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let result: i32 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to EXISTS key: {}", key))?;
        Ok(result > 0)
    }

    // ========== Functions ==========

    /// Call a loaded Redis function (FCALL)
    pub async fn fcall(&self, function: &str, keys: &[&str], args: &[&str]) -> Result<String> {
        let mut conn = self.get_connection().await?;
        let mut cmd = redis::cmd("FCALL");
        cmd.arg(function).arg(keys.len());
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(*arg);
        }
        cmd.query_async(&mut *conn)
            .await
            .with_context(|| format!("Failed to FCALL function: {}", function))
    }

    /// Get pool statistics
    pub fn pool_state(&self) -> bb8::State {
        self.pool.state()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const REDIS_URL: &str = "redis://127.0.0.1:6379";

    #[test]
    fn test_config_defaults_from_partial_yaml() {
        let config: RedisConfig =
            serde_json::from_str(r#"{"url": "redis://cache:6380"}"#).unwrap();
        assert_eq!(config.url, "redis://cache:6380");
        assert_eq!(config.max_connections, 32);
        assert_eq!(config.connection_timeout, 5);
    }

    #[tokio::test]
    async fn test_no_ping_client_builds_without_server() {
        let client = RedisClient::with_config_no_ping(RedisConfig::from_url("redis://127.0.0.1:1"))
            .await
            .unwrap();
        assert_eq!(client.url(), "redis://127.0.0.1:1");
        assert_eq!(client.pool_state().connections, 0);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_hash_and_set_roundtrip() {
        let client = RedisClient::new(REDIS_URL).await.unwrap();
        let key = format!("test:common:{}", std::process::id());

        assert_eq!(client.hincrby(&key, "count", 2).await.unwrap(), 2);
        assert_eq!(client.hincrby(&key, "count", 3).await.unwrap(), 5);
        client.hset(&key, "name", b"alpha").await.unwrap();
        let all = client.hgetall(&key).await.unwrap();
        assert_eq!(all.get("name").map(Vec::as_slice), Some(&b"alpha"[..]));

        client.del(&[&key]).await.unwrap();
        assert!(!client.exists(&key).await.unwrap());
    }
}
