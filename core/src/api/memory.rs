//! In-memory directory
//!
//! Mirrors the relay tables closely enough for tests and the loopback
//! binary: devices are unique per `(user_id, device_label)`, prekey rows per
//! `(device_id, prekey_id)`, and the most recently published device wins.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::api::{Directory, ProfileHint, RemoteDeviceBundle};
use crate::crypto::keys::{DeviceKeyBundle, PublishedPreKey};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone)]
struct PreKeyRow {
    id: String,
    prekey_id: u32,
    public_key: String,
    consumed: bool,
}

#[derive(Debug, Clone)]
struct DeviceRow {
    id: String,
    user_id: String,
    bundle: DeviceKeyBundle,
    last_seen: u64,
    prekeys: Vec<PreKeyRow>,
}

#[derive(Debug, Default)]
struct Tables {
    profiles: HashMap<String, (String, String)>,
    devices: Vec<DeviceRow>,
    clock: u64,
}

/// Directory held entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    tables: RwLock<Tables>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(contact, display_name)` stored for a user, if any
    pub async fn profile(&self, user_id: &str) -> Option<(String, String)> {
        self.tables.read().await.profiles.get(user_id).cloned()
    }

    /// Number of unconsumed prekeys on the user's latest device
    pub async fn available_prekeys(&self, user_id: &str) -> usize {
        let tables = self.tables.read().await;
        latest_device(&tables.devices, user_id)
            .map(|device| device.prekeys.iter().filter(|row| !row.consumed).count())
            .unwrap_or(0)
    }

    /// Ordinal ids of consumed prekeys on the user's latest device
    pub async fn consumed_prekey_ids(&self, user_id: &str) -> Vec<u32> {
        let tables = self.tables.read().await;
        let mut ids: Vec<u32> = latest_device(&tables.devices, user_id)
            .map(|device| {
                device
                    .prekeys
                    .iter()
                    .filter(|row| row.consumed)
                    .map(|row| row.prekey_id)
                    .collect()
            })
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }
}

fn latest_device<'a>(devices: &'a [DeviceRow], user_id: &str) -> Option<&'a DeviceRow> {
    devices
        .iter()
        .filter(|device| device.user_id == user_id)
        .max_by_key(|device| device.last_seen)
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn ensure_profile(&self, user_id: &str, hint: &ProfileHint) -> CoreResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| hint.resolve(user_id));
        Ok(())
    }

    async fn publish_bundle(
        &self,
        user_id: &str,
        bundle: &DeviceKeyBundle,
        one_time_pre_keys: &[PublishedPreKey],
    ) -> CoreResult<String> {
        let mut tables = self.tables.write().await;
        tables.clock += 1;
        let now = tables.clock;

        let idx = match tables.devices.iter().position(|device| {
            device.user_id == user_id && device.bundle.device_label == bundle.device_label
        }) {
            Some(idx) => idx,
            None => {
                tables.devices.push(DeviceRow {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    bundle: bundle.clone(),
                    last_seen: now,
                    prekeys: Vec::new(),
                });
                tables.devices.len() - 1
            }
        };

        let device = tables
            .devices
            .get_mut(idx)
            .ok_or_else(|| CoreError::Directory("device row vanished".to_string()))?;
        device.bundle = DeviceKeyBundle {
            one_time_pre_keys: Vec::new(),
            ..bundle.clone()
        };
        device.last_seen = now;

        device.prekeys.retain(|row| {
            one_time_pre_keys
                .iter()
                .any(|prekey| prekey.public_key == row.public_key)
        });
        for prekey in one_time_pre_keys {
            if !device
                .prekeys
                .iter()
                .any(|row| row.prekey_id == prekey.prekey_id)
            {
                device.prekeys.push(PreKeyRow {
                    id: Uuid::new_v4().to_string(),
                    prekey_id: prekey.prekey_id,
                    public_key: prekey.public_key.clone(),
                    consumed: false,
                });
            }
        }

        Ok(device.id.clone())
    }

    async fn fetch_bundle(&self, user_id: &str) -> CoreResult<Option<RemoteDeviceBundle>> {
        let tables = self.tables.read().await;
        let Some(device) = latest_device(&tables.devices, user_id) else {
            return Ok(None);
        };

        let mut available: Vec<&PreKeyRow> =
            device.prekeys.iter().filter(|row| !row.consumed).collect();
        available.sort_by_key(|row| row.prekey_id);
        let offered = available.first();

        Ok(Some(RemoteDeviceBundle {
            bundle: DeviceKeyBundle {
                one_time_pre_keys: available.iter().map(|row| row.public_key.clone()).collect(),
                ..device.bundle.clone()
            },
            one_time_pre_key_id: offered.map(|row| row.id.clone()),
            one_time_pre_key: offered.map(|row| row.public_key.clone()),
            device_id: device.id.clone(),
        }))
    }

    async fn mark_prekey_consumed(&self, prekey_id: &str) -> CoreResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(row) = tables
            .devices
            .iter_mut()
            .flat_map(|device| device.prekeys.iter_mut())
            .find(|row| row.id == prekey_id)
        {
            row.consumed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::generate_device_keys;
    use crate::crypto::primitives::Primitives;

    #[tokio::test]
    async fn test_publish_fetch_and_consume() {
        let directory = MemoryDirectory::new();
        let keys = generate_device_keys(&Primitives::new(), "primary", 3);

        let device_id = directory
            .publish_bundle("bob", &keys.bundle(), &keys.published_pre_keys())
            .await
            .unwrap();

        let remote = directory.fetch_bundle("bob").await.unwrap().unwrap();
        assert_eq!(remote.device_id, device_id);
        assert_eq!(remote.bundle.signed_pre_key, keys.signed_pre_key.public_key);
        assert_eq!(
            remote.one_time_pre_key.as_deref(),
            Some(keys.one_time_pre_keys[0].key_pair.public_key.as_str())
        );
        assert_eq!(directory.available_prekeys("bob").await, 3);

        let offered = remote.one_time_pre_key_id.unwrap();
        directory.mark_prekey_consumed(&offered).await.unwrap();
        assert_eq!(directory.available_prekeys("bob").await, 2);
        assert_eq!(directory.consumed_prekey_ids("bob").await, vec![0]);

        let next = directory.fetch_bundle("bob").await.unwrap().unwrap();
        assert_eq!(
            next.one_time_pre_key.as_deref(),
            Some(keys.one_time_pre_keys[1].key_pair.public_key.as_str())
        );
    }

    #[tokio::test]
    async fn test_republish_keeps_consumed_flags() {
        let directory = MemoryDirectory::new();
        let keys = generate_device_keys(&Primitives::new(), "primary", 2);

        let first = directory
            .publish_bundle("bob", &keys.bundle(), &keys.published_pre_keys())
            .await
            .unwrap();
        let remote = directory.fetch_bundle("bob").await.unwrap().unwrap();
        directory
            .mark_prekey_consumed(&remote.one_time_pre_key_id.unwrap())
            .await
            .unwrap();

        // Owner has not processed the handshake yet and republishes the full pool
        let second = directory
            .publish_bundle("bob", &keys.bundle(), &keys.published_pre_keys())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(directory.available_prekeys("bob").await, 1);
    }

    #[tokio::test]
    async fn test_regenerated_keys_replace_prekey_rows() {
        let directory = MemoryDirectory::new();
        let primitives = Primitives::new();
        let old = generate_device_keys(&primitives, "primary", 2);
        let new = generate_device_keys(&primitives, "primary", 2);

        directory
            .publish_bundle("bob", &old.bundle(), &old.published_pre_keys())
            .await
            .unwrap();
        directory
            .publish_bundle("bob", &new.bundle(), &new.published_pre_keys())
            .await
            .unwrap();

        let remote = directory.fetch_bundle("bob").await.unwrap().unwrap();
        assert_eq!(remote.bundle.identity_key, new.identity_key.public_key);
        assert_eq!(
            remote.one_time_pre_key.as_deref(),
            Some(new.one_time_pre_keys[0].key_pair.public_key.as_str())
        );
        assert_eq!(directory.available_prekeys("bob").await, 2);
    }

    #[tokio::test]
    async fn test_latest_device_wins_and_profiles_are_kept() {
        let directory = MemoryDirectory::new();
        let primitives = Primitives::new();
        let phone = generate_device_keys(&primitives, "phone", 1);
        let laptop = generate_device_keys(&primitives, "laptop", 1);

        assert!(directory.fetch_bundle("bob").await.unwrap().is_none());

        directory
            .publish_bundle("bob", &phone.bundle(), &phone.published_pre_keys())
            .await
            .unwrap();
        directory
            .publish_bundle("bob", &laptop.bundle(), &laptop.published_pre_keys())
            .await
            .unwrap();
        let remote = directory.fetch_bundle("bob").await.unwrap().unwrap();
        assert_eq!(remote.bundle.device_label, "laptop");

        directory
            .ensure_profile("bob", &ProfileHint::default())
            .await
            .unwrap();
        let hint = ProfileHint {
            contact: Some("bob@example.com".to_string()),
            display_name: None,
        };
        directory.ensure_profile("bob", &hint).await.unwrap();
        assert_eq!(
            directory.profile("bob").await,
            Some(("user-bob".to_string(), "user-bob".to_string()))
        );
    }
}
