//! Device Key Store
//!
//! Owns the lifecycle of this device's key material:
//!
//! - **Generation**: identity, signed prekey and a pool of one-time prekeys,
//!   created lazily on first `ensure`
//! - **Persistence**: the whole [`StoredDeviceKeys`] blob under `device_keys`
//! - **Publication**: the public bundle and unconsumed one-time prekeys are
//!   republished to the directory on every `ensure`
//! - **Consumption**: one-time prekeys used by a responder handshake move to
//!   the consumed audit list and are never published again

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::api::{Directory, ProfileHint};
use crate::crypto::keys::{generate_device_keys, StoredDeviceKeys, ONE_TIME_PREKEY_DEFAULT};
use crate::crypto::primitives::Primitives;
use crate::db::{SecretStore, DEVICE_KEYS_KEY};
use crate::error::CoreResult;
use crate::telemetry::{Telemetry, TelemetryEvent};

/// Configuration for device key management
#[derive(Debug, Clone)]
pub struct PreKeyConfig {
    /// Number of one-time prekeys generated with fresh device keys
    pub one_time_prekey_count: usize,
}

impl Default for PreKeyConfig {
    fn default() -> Self {
        Self {
            one_time_prekey_count: ONE_TIME_PREKEY_DEFAULT,
        }
    }
}

/// Status of the local key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyStatus {
    /// Number of one-time prekeys still available
    pub one_time_prekey_count: usize,
    /// Number of one-time prekeys consumed by handshakes
    pub consumed_prekey_count: usize,
    /// Label the keys were generated for
    pub device_label: String,
    /// Identity key fingerprint
    pub fingerprint: String,
}

/// Loads, generates, persists and publishes device keys
pub struct DeviceKeyStore {
    primitives: Arc<Primitives>,
    store: Arc<dyn SecretStore>,
    directory: Arc<dyn Directory>,
    telemetry: Telemetry,
    config: PreKeyConfig,
    /// Serialises read-modify-write of the stored blob
    lock: Mutex<()>,
}

impl DeviceKeyStore {
    pub fn new(
        primitives: Arc<Primitives>,
        store: Arc<dyn SecretStore>,
        directory: Arc<dyn Directory>,
        telemetry: Telemetry,
        config: PreKeyConfig,
    ) -> Self {
        Self {
            primitives,
            store,
            directory,
            telemetry,
            config,
            lock: Mutex::new(()),
        }
    }

    /// Load the stored keys, if any
    ///
    /// A blob that no longer parses is reported and treated as absent, which
    /// makes the next `ensure` regenerate.
    pub async fn load(&self) -> CoreResult<Option<StoredDeviceKeys>> {
        let Some(raw) = self.store.get(DEVICE_KEYS_KEY).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<StoredDeviceKeys>(&raw) {
            Ok(keys) => Ok(Some(keys)),
            Err(e) => {
                tracing::warn!("Stored device keys are unreadable, ignoring: {}", e);
                Ok(None)
            }
        }
    }

    async fn save(&self, keys: &StoredDeviceKeys) -> CoreResult<()> {
        let raw = serde_json::to_vec(keys)?;
        self.store.set(DEVICE_KEYS_KEY, &raw).await
    }

    /// Make sure device keys exist for `device_label` and are published
    ///
    /// Publication happens on every call, even when the keys already existed.
    pub async fn ensure(
        &self,
        user_id: &str,
        device_label: &str,
        hint: &ProfileHint,
    ) -> CoreResult<StoredDeviceKeys> {
        self.directory.ensure_profile(user_id, hint).await?;

        let keys = {
            let _guard = self.lock.lock().await;

            match self.load().await? {
                Some(keys) if keys.device_label == device_label => keys,
                previous => {
                    let reason = if previous.is_some() {
                        "label_changed"
                    } else {
                        "generated"
                    };
                    let keys = generate_device_keys(
                        &self.primitives,
                        device_label,
                        self.config.one_time_prekey_count,
                    );
                    self.save(&keys).await?;

                    tracing::info!(
                        "Generated device keys for label {} ({} one-time prekeys)",
                        device_label,
                        keys.one_time_pre_keys.len()
                    );
                    self.telemetry.emit(
                        TelemetryEvent::KeyRotation,
                        None,
                        user_id,
                        serde_json::json!({
                            "reason": reason,
                            "oneTimePreKeys": keys.one_time_pre_keys.len(),
                        }),
                    );
                    keys
                }
            }
        };

        let device_id = self
            .directory
            .publish_bundle(user_id, &keys.bundle(), &keys.published_pre_keys())
            .await?;
        tracing::debug!(
            "Published bundle for device {} with {} one-time prekeys",
            device_id,
            keys.one_time_pre_keys.len()
        );

        Ok(keys)
    }

    /// Delete local keys; the next `ensure` regenerates them
    pub async fn reset(&self) -> CoreResult<()> {
        let _guard = self.lock.lock().await;
        self.store.delete(DEVICE_KEYS_KEY).await?;
        tracing::info!("Device keys cleared");
        Ok(())
    }

    /// Move a one-time prekey to the consumed list and persist
    ///
    /// Returns false when no active prekey has this public key. Calling it
    /// again for the same key is a no-op.
    pub async fn consume_one_time_prekey(&self, public_key: &str) -> CoreResult<bool> {
        let _guard = self.lock.lock().await;

        let Some(mut keys) = self.load().await? else {
            return Ok(false);
        };

        if !keys.consume_one_time_pre_key(public_key) {
            return Ok(false);
        }

        self.save(&keys).await?;
        tracing::debug!(
            "Consumed one-time prekey, {} remaining",
            keys.one_time_pre_keys.len()
        );
        Ok(true)
    }

    /// Get the current status of the stored keys
    pub async fn status(&self) -> CoreResult<Option<PreKeyStatus>> {
        let Some(keys) = self.load().await? else {
            return Ok(None);
        };

        Ok(Some(PreKeyStatus {
            one_time_prekey_count: keys.one_time_pre_keys.len(),
            consumed_prekey_count: keys.consumed_one_time_pre_keys.len(),
            device_label: keys.device_label.clone(),
            fingerprint: keys.fingerprint()?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryDirectory;
    use crate::db::MemorySecretStore;

    struct Fixture {
        store: Arc<MemorySecretStore>,
        directory: Arc<MemoryDirectory>,
        keys: DeviceKeyStore,
    }

    fn fixture(count: usize) -> Fixture {
        let store = Arc::new(MemorySecretStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        let keys = DeviceKeyStore::new(
            Arc::new(Primitives::new()),
            store.clone(),
            directory.clone(),
            Telemetry::disabled(),
            PreKeyConfig {
                one_time_prekey_count: count,
            },
        );
        Fixture {
            store,
            directory,
            keys,
        }
    }

    #[tokio::test]
    async fn test_ensure_generates_persists_and_publishes() {
        let f = fixture(4);
        assert!(f.keys.load().await.unwrap().is_none());

        let keys = f
            .keys
            .ensure("alice", "primary", &ProfileHint::default())
            .await
            .unwrap();
        assert_eq!(keys.one_time_pre_keys.len(), 4);
        assert_eq!(f.keys.load().await.unwrap().unwrap().identity_key, keys.identity_key);

        let remote = f.directory.fetch_bundle("alice").await.unwrap().unwrap();
        assert_eq!(remote.bundle.identity_key, keys.identity_key.public_key);
        assert_eq!(f.directory.available_prekeys("alice").await, 4);
        assert!(f.directory.profile("alice").await.is_some());
    }

    #[tokio::test]
    async fn test_ensure_reuses_keys_for_same_label() {
        let f = fixture(2);
        let first = f
            .keys
            .ensure("alice", "primary", &ProfileHint::default())
            .await
            .unwrap();
        let second = f
            .keys
            .ensure("alice", "primary", &ProfileHint::default())
            .await
            .unwrap();
        assert_eq!(first.identity_signing_key, second.identity_signing_key);

        let relabelled = f
            .keys
            .ensure("alice", "laptop", &ProfileHint::default())
            .await
            .unwrap();
        assert_ne!(first.identity_signing_key, relabelled.identity_signing_key);
        assert_eq!(relabelled.device_label, "laptop");
    }

    #[tokio::test]
    async fn test_consume_is_persisted_and_idempotent() {
        let f = fixture(3);
        let keys = f
            .keys
            .ensure("alice", "primary", &ProfileHint::default())
            .await
            .unwrap();
        let target = keys.one_time_pre_keys[0].key_pair.public_key.clone();

        assert!(f.keys.consume_one_time_prekey(&target).await.unwrap());
        assert!(!f.keys.consume_one_time_prekey(&target).await.unwrap());
        assert!(!f.keys.consume_one_time_prekey("unknown").await.unwrap());

        let status = f.keys.status().await.unwrap().unwrap();
        assert_eq!(status.one_time_prekey_count, 2);
        assert_eq!(status.consumed_prekey_count, 1);
        assert_eq!(status.fingerprint.len(), 16);

        // Republication drops the consumed key from the directory
        f.keys
            .ensure("alice", "primary", &ProfileHint::default())
            .await
            .unwrap();
        assert_eq!(f.directory.available_prekeys("alice").await, 2);
    }

    #[tokio::test]
    async fn test_reset_forces_regeneration() {
        let f = fixture(1);
        let first = f
            .keys
            .ensure("alice", "primary", &ProfileHint::default())
            .await
            .unwrap();

        f.keys.reset().await.unwrap();
        assert!(f.store.is_empty().await);
        assert!(f.keys.status().await.unwrap().is_none());

        let second = f
            .keys
            .ensure("alice", "primary", &ProfileHint::default())
            .await
            .unwrap();
        assert_ne!(first.identity_key, second.identity_key);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_treated_as_absent() {
        let f = fixture(1);
        f.store.set(DEVICE_KEYS_KEY, b"not json").await.unwrap();
        assert!(f.keys.load().await.unwrap().is_none());

        let keys = f
            .keys
            .ensure("alice", "primary", &ProfileHint::default())
            .await
            .unwrap();
        assert_eq!(keys.device_label, "primary");
    }
}
