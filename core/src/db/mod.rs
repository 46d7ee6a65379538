//! Local durable secret storage
//!
//! The core only needs "read/write a named secret blob, durable across
//! restarts". Device keys live under [`DEVICE_KEYS_KEY`] and sessions under
//! [`session_key`]. Every write replaces the whole value for its key in one
//! statement, so readers never observe partially written JSON.

mod memory;
mod pool;

use async_trait::async_trait;

use crate::error::CoreResult;

pub use memory::MemorySecretStore;
pub use pool::SqliteSecretStore;

/// Storage key for the local device key material
pub const DEVICE_KEYS_KEY: &str = "device_keys";

/// Prefix for per-conversation session state
pub const SESSION_PREFIX: &str = "session_";

/// Storage key for a conversation's session
pub fn session_key(conversation_id: &str) -> String {
    format!("{}{}", SESSION_PREFIX, conversation_id)
}

/// Named secret blob storage
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a value, `None` if absent
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &[u8]) -> CoreResult<()>;

    /// Delete a value; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> CoreResult<()>;
}
