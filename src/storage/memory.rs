use super::StateStore;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// In-process store; contents are lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: DashMap<String, String>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn save(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
