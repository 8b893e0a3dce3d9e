use super::StateStore;
use crate::error::{ResilienceError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::fmt;
use tracing::{debug, info};

/// Redis-backed store using plain string keys under a prefix
#[derive(Clone)]
pub struct RedisStateStore {
    connection: ConnectionManager,
    prefix: String,
}

impl fmt::Debug for RedisStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStateStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisStateStore {
    /// Connect to `url` and keep a managed connection for later calls
    pub async fn connect(url: &str, prefix: String) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            ResilienceError::Config(format!("Failed to create Redis client: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            ResilienceError::Storage(format!("Failed to connect to Redis: {}", e))
        })?;

        info!(prefix = %prefix, "Connected Redis state store");
        Ok(Self { connection, prefix })
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(self.redis_key(key)).await?;
        Ok(value)
    }

    async fn save(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.connection.clone();
        let redis_key = self.redis_key(key);
        let _: () = conn.set(&redis_key, value).await?;
        debug!(key = %redis_key, "Persisted state to Redis");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(self.redis_key(key)).await?;
        Ok(())
    }
}
