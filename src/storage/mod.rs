//! Key-value persistence for breaker records
//!
//! The breaker treats storage as best-effort: a failed load starts from a fresh
//! record and a failed save is logged and ignored. Three backends are provided:
//!
//! - **Memory**: process-local map, used in tests and when durability is not needed
//! - **File**: one JSON document per key inside a directory
//! - **Redis**: prefixed string keys through a connection manager

pub mod file;
pub mod memory;
pub mod redis_store;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use redis_store::RedisStateStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

/// Persistence capability consumed by circuit breakers
#[async_trait]
pub trait StateStore: Send + Sync + Debug {
    /// Read the raw value stored under `key`
    async fn load(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn save(&self, key: &str, value: String) -> Result<()>;

    /// Delete `key`; missing keys are not an error
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Storage backend selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// No persistence, breakers live in memory only
    #[default]
    None,
    /// Shared in-process map
    Memory,
    /// JSON files under a directory
    File { path: String },
    /// Redis server
    Redis {
        url: String,
        #[serde(default = "default_redis_prefix")]
        prefix: String,
    },
}

fn default_redis_prefix() -> String {
    "resilience:".to_string()
}

/// Build the configured store, or `None` when persistence is disabled
pub async fn build_store(config: &StorageConfig) -> Result<Option<Arc<dyn StateStore>>> {
    let store: Option<Arc<dyn StateStore>> = match config {
        StorageConfig::None => None,
        StorageConfig::Memory => Some(Arc::new(MemoryStateStore::new())),
        StorageConfig::File { path } => Some(Arc::new(FileStateStore::new(path).await?)),
        StorageConfig::Redis { url, prefix } => {
            Some(Arc::new(RedisStateStore::connect(url, prefix.clone()).await?))
        }
    };

    info!(backend = ?config, enabled = store.is_some(), "Breaker state storage ready");
    Ok(store)
}
