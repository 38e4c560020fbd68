//! Redis-backed cache store (feature `redis`).

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use super::CacheStore;
use crate::error::StoreError;

/// Shared cache across engine instances.
///
/// A multiplexed connection is opened per call; the client itself is cheap
/// to clone and holds no socket.
#[derive(Debug, Clone)]
pub struct RedisCacheStore {
    client: redis::Client,
    prefix: String,
}

impl RedisCacheStore {
    pub fn new(redis_url: impl AsRef<str>, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::backend("redis_open", e))?;
        Ok(Self {
            client,
            prefix: prefix.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::backend("redis_connect", e))
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        conn.get(self.key(key))
            .await
            .map_err(|e| StoreError::backend("cache_get", e))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(self.key(key), value, ttl.as_secs().max(1))
            .await
            .map_err(|e| StoreError::backend("cache_set", e))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.key(key))
            .await
            .map_err(|e| StoreError::backend("cache_delete", e))
    }
}
