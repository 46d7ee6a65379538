//! Session Storage
//!
//! One [`SessionState`] per conversation, stored as JSON under
//! `session_<conversationId>` in the secret store. A session owns its ratchet
//! state and a bounded cache of message keys, which is what lets a device
//! read its own sent messages again and absorb duplicate deliveries.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::ratchet::RatchetState;
use crate::db::{session_key, SecretStore};
use crate::error::CoreResult;

/// Default number of message keys kept per session
pub const MESSAGE_KEY_CACHE_LIMIT: usize = 128;

/// Insertion-ordered map of `"ratchetKey:messageNumber"` to message key
///
/// Serialised as a JSON object in insertion order; pruning drops the oldest
/// entries first.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MessageKeyCache {
    keys: HashMap<String, String>,
    order: VecDeque<String>,
}

impl MessageKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cache_key: &str) -> Option<&str> {
        self.keys.get(cache_key).map(String::as_str)
    }

    pub fn contains(&self, cache_key: &str) -> bool {
        self.keys.contains_key(cache_key)
    }

    /// Insert or replace; a replaced entry keeps its position
    pub fn insert(&mut self, cache_key: String, message_key: String) {
        if self.keys.insert(cache_key.clone(), message_key).is_none() {
            self.order.push_back(cache_key);
        }
    }

    /// Insert only if the key is not cached yet; returns whether it was added
    pub fn insert_if_absent(&mut self, cache_key: String, message_key: String) -> bool {
        if self.keys.contains_key(&cache_key) {
            return false;
        }
        self.insert(cache_key, message_key);
        true
    }

    /// Drop the oldest entries until at most `limit` remain
    pub fn prune(&mut self, limit: usize) {
        while self.order.len() > limit {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Cache keys, oldest first
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl fmt::Debug for MessageKeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageKeyCache")
            .field("entries", &self.order.len())
            .finish()
    }
}

impl Serialize for MessageKeyCache {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.order.len()))?;
        for cache_key in &self.order {
            if let Some(message_key) = self.keys.get(cache_key) {
                map.serialize_entry(cache_key, message_key)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MessageKeyCache {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CacheVisitor;

        impl<'de> Visitor<'de> for CacheVisitor {
            type Value = MessageKeyCache;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of cache keys to message keys")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut cache = MessageKeyCache::new();
                while let Some((cache_key, message_key)) = access.next_entry::<String, String>()? {
                    cache.insert(cache_key, message_key);
                }
                Ok(cache)
            }
        }

        deserializer.deserialize_map(CacheVisitor)
    }
}

/// Persisted per-conversation session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub conversation_id: String,
    pub partner_id: String,
    pub ratchet_state: RatchetState,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    pub updated_at: i64,
    /// Directory id of the one-time prekey used by the handshake, until the
    /// first message of the session is sent
    #[serde(default)]
    pub awaiting_pre_key: Option<String>,
    #[serde(default)]
    pub message_key_cache: MessageKeyCache,
}

impl SessionState {
    pub fn new(
        conversation_id: &str,
        partner_id: &str,
        ratchet_state: RatchetState,
        awaiting_pre_key: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            conversation_id: conversation_id.to_string(),
            partner_id: partner_id.to_string(),
            ratchet_state,
            created_at: now,
            updated_at: now,
            awaiting_pre_key,
            message_key_cache: MessageKeyCache::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

/// Manages storage and retrieval of sessions
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn SecretStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Load a conversation's session
    ///
    /// Stored JSON that no longer parses is logged and treated as absent.
    pub async fn load_session(&self, conversation_id: &str) -> CoreResult<Option<SessionState>> {
        let Some(raw) = self.store.get(&session_key(conversation_id)).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<SessionState>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!("Discarding unreadable session state: {}", e);
                Ok(None)
            }
        }
    }

    /// Save or replace a session
    pub async fn save_session(&self, session: &SessionState) -> CoreResult<()> {
        let raw = serde_json::to_vec(session)?;
        self.store
            .set(&session_key(&session.conversation_id), &raw)
            .await
    }

    pub async fn delete_session(&self, conversation_id: &str) -> CoreResult<()> {
        self.store.delete(&session_key(conversation_id)).await
    }

    pub async fn has_session(&self, conversation_id: &str) -> CoreResult<bool> {
        Ok(self.load_session(conversation_id).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;
    use crate::db::MemorySecretStore;

    fn ratchet_state() -> RatchetState {
        RatchetState::new(
            "root".to_string(),
            "send".to_string(),
            "recv".to_string(),
            KeyPair {
                public_key: "pub".to_string(),
                private_key: "priv".to_string(),
            },
            Some("remote".to_string()),
        )
    }

    #[test]
    fn test_cache_prunes_oldest_first() {
        let mut cache = MessageKeyCache::new();
        for i in 0..5 {
            cache.insert(format!("rk:{}", i), format!("key{}", i));
        }
        cache.prune(3);

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("rk:0"));
        assert!(!cache.contains("rk:1"));
        assert_eq!(cache.get("rk:4"), Some("key4"));
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["rk:2", "rk:3", "rk:4"]);
    }

    #[test]
    fn test_cache_insert_if_absent_never_overwrites() {
        let mut cache = MessageKeyCache::new();
        assert!(cache.insert_if_absent("rk:0".to_string(), "first".to_string()));
        assert!(!cache.insert_if_absent("rk:0".to_string(), "second".to_string()));
        assert_eq!(cache.get("rk:0"), Some("first"));

        cache.insert("rk:0".to_string(), "third".to_string());
        assert_eq!(cache.get("rk:0"), Some("third"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_json_keeps_insertion_order() {
        let mut cache = MessageKeyCache::new();
        cache.insert("zz:1".to_string(), "a".to_string());
        cache.insert("aa:0".to_string(), "b".to_string());

        let json = serde_json::to_string(&cache).unwrap();
        assert_eq!(json, r#"{"zz:1":"a","aa:0":"b"}"#);

        let restored: MessageKeyCache = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.keys().collect::<Vec<_>>(), vec!["zz:1", "aa:0"]);
        assert_eq!(restored, cache);
    }

    #[tokio::test]
    async fn test_session_store_round_trip() {
        let store = SessionStore::new(Arc::new(MemorySecretStore::new()));
        assert!(store.load_session("c1").await.unwrap().is_none());

        let mut session = SessionState::new("c1", "bob", ratchet_state(), Some("row-1".to_string()));
        session
            .message_key_cache
            .insert("rk:0".to_string(), "mk".to_string());
        store.save_session(&session).await.unwrap();

        let loaded = store.load_session("c1").await.unwrap().unwrap();
        assert_eq!(loaded, session);
        assert!(store.has_session("c1").await.unwrap());

        store.delete_session("c1").await.unwrap();
        assert!(!store.has_session("c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_session_is_absent() {
        let secrets = Arc::new(MemorySecretStore::new());
        secrets.set(&session_key("c1"), b"{broken").await.unwrap();

        let store = SessionStore::new(secrets);
        assert!(store.load_session("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_without_cache_field_loads() {
        let secrets = Arc::new(MemorySecretStore::new());
        let mut json = serde_json::to_value(SessionState::new("c1", "bob", ratchet_state(), None))
            .unwrap();
        json.as_object_mut().unwrap().remove("messageKeyCache");
        json.as_object_mut().unwrap().remove("awaitingPreKey");
        secrets
            .set(&session_key("c1"), json.to_string().as_bytes())
            .await
            .unwrap();

        let loaded = SessionStore::new(secrets).load_session("c1").await.unwrap().unwrap();
        assert!(loaded.message_key_cache.is_empty());
        assert!(loaded.awaiting_pre_key.is_none());
    }
}
