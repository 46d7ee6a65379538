//! In-memory secret store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::db::SecretStore;
use crate::error::CoreResult;

/// Volatile secret store, for tests and the loopback self-test
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> CoreResult<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}
