//! HTTP directory over the relay's REST interface
//!
//! Tables: `profiles`, `user_devices` (unique on `user_id, device_label`)
//! and `device_prekeys` (unique on `device_id, prekey_id`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::client::ApiClient;
use crate::api::{Directory, ProfileHint, RemoteDeviceBundle};
use crate::crypto::keys::{DeviceKeyBundle, PublishedPreKey};
use crate::error::{CoreError, CoreResult};

const DEVICE_SELECT: &str = "id,device_label,identity_key_public,identity_signing_public,\
signed_prekey_public,signed_prekey_signature,device_prekeys(id,prekey_id,public_key,consumed)";

const UPSERT_MERGE: &str = "resolution=merge-duplicates,return=minimal";
const INSERT_IF_ABSENT: &str = "resolution=ignore-duplicates,return=minimal";
const UPSERT_RETURNING: &str = "resolution=merge-duplicates,return=representation";

#[derive(Debug, Deserialize)]
struct RemotePreKeyRow {
    id: String,
    prekey_id: i64,
    public_key: String,
    consumed: bool,
}

#[derive(Debug, Deserialize)]
struct RemoteDeviceRow {
    id: String,
    device_label: String,
    identity_key_public: String,
    identity_signing_public: String,
    signed_prekey_public: String,
    signed_prekey_signature: String,
    #[serde(default)]
    device_prekeys: Vec<RemotePreKeyRow>,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: String,
}

impl RemoteDeviceRow {
    fn into_bundle(mut self) -> RemoteDeviceBundle {
        self.device_prekeys.sort_by_key(|prekey| prekey.prekey_id);
        let available: Vec<&RemotePreKeyRow> = self
            .device_prekeys
            .iter()
            .filter(|prekey| !prekey.consumed)
            .collect();
        let offered = available.first();

        RemoteDeviceBundle {
            one_time_pre_key_id: offered.map(|prekey| prekey.id.clone()),
            one_time_pre_key: offered.map(|prekey| prekey.public_key.clone()),
            bundle: DeviceKeyBundle {
                identity_key: self.identity_key_public.clone(),
                identity_signing_key: self.identity_signing_public.clone(),
                signed_pre_key: self.signed_prekey_public.clone(),
                signed_pre_key_signature: self.signed_prekey_signature.clone(),
                one_time_pre_keys: available
                    .iter()
                    .map(|prekey| prekey.public_key.clone())
                    .collect(),
                device_label: self.device_label.clone(),
            },
            device_id: self.id,
        }
    }
}

/// Directory backed by the relay's REST endpoints
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    api: ApiClient,
}

impl HttpDirectory {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn ensure_profile(&self, user_id: &str, hint: &ProfileHint) -> CoreResult<()> {
        let existing: Vec<IdRow> = self
            .api
            .get(&format!(
                "/rest/v1/profiles?select=id&id=eq.{}",
                urlencoding::encode(user_id)
            ))
            .await?;

        if !existing.is_empty() {
            return Ok(());
        }

        #[derive(Serialize)]
        struct ProfileRow<'a> {
            id: &'a str,
            phone_number: &'a str,
            display_name: &'a str,
        }

        let (contact, display_name) = hint.resolve(user_id);
        self.api
            .post_no_content(
                "/rest/v1/profiles?on_conflict=id",
                &ProfileRow {
                    id: user_id,
                    phone_number: &contact,
                    display_name: &display_name,
                },
                Some(UPSERT_MERGE),
            )
            .await?;

        tracing::info!("Created directory profile for user");
        Ok(())
    }

    async fn publish_bundle(
        &self,
        user_id: &str,
        bundle: &DeviceKeyBundle,
        one_time_pre_keys: &[PublishedPreKey],
    ) -> CoreResult<String> {
        #[derive(Serialize)]
        struct DeviceRow<'a> {
            user_id: &'a str,
            device_label: &'a str,
            identity_key_public: &'a str,
            identity_signing_public: &'a str,
            signed_prekey_public: &'a str,
            signed_prekey_signature: &'a str,
            last_seen_at: String,
        }

        #[derive(Serialize)]
        struct PreKeyRow<'a> {
            device_id: &'a str,
            prekey_id: u32,
            public_key: &'a str,
            consumed: bool,
        }

        let rows: Vec<IdRow> = self
            .api
            .post(
                "/rest/v1/user_devices?on_conflict=user_id,device_label&select=id",
                &DeviceRow {
                    user_id,
                    device_label: &bundle.device_label,
                    identity_key_public: &bundle.identity_key,
                    identity_signing_public: &bundle.identity_signing_key,
                    signed_prekey_public: &bundle.signed_pre_key,
                    signed_prekey_signature: &bundle.signed_pre_key_signature,
                    last_seen_at: chrono::Utc::now().to_rfc3339(),
                },
                Some(UPSERT_RETURNING),
            )
            .await?;

        let device_id = rows
            .into_iter()
            .next()
            .map(|row| row.id)
            .ok_or_else(|| {
                CoreError::Directory("Unable to determine device identifier after upsert".to_string())
            })?;

        // Drop rows for keys we no longer hold (consumed locally or regenerated)
        let mut prune = format!(
            "/rest/v1/device_prekeys?device_id=eq.{}",
            urlencoding::encode(&device_id)
        );
        if !one_time_pre_keys.is_empty() {
            let held: Vec<String> = one_time_pre_keys
                .iter()
                .map(|prekey| format!("\"{}\"", prekey.public_key))
                .collect();
            prune.push_str(&format!(
                "&public_key=not.in.({})",
                urlencoding::encode(&held.join(","))
            ));
        }
        self.api.delete(&prune).await?;

        // Existing rows keep their consumed flag; only new rows start unconsumed
        if !one_time_pre_keys.is_empty() {
            let payload: Vec<PreKeyRow<'_>> = one_time_pre_keys
                .iter()
                .map(|prekey| PreKeyRow {
                    device_id: &device_id,
                    prekey_id: prekey.prekey_id,
                    public_key: &prekey.public_key,
                    consumed: false,
                })
                .collect();

            self.api
                .post_no_content(
                    "/rest/v1/device_prekeys?on_conflict=device_id,prekey_id",
                    &payload,
                    Some(INSERT_IF_ABSENT),
                )
                .await?;
        }

        Ok(device_id)
    }

    async fn fetch_bundle(&self, user_id: &str) -> CoreResult<Option<RemoteDeviceBundle>> {
        let rows: Vec<RemoteDeviceRow> = self
            .api
            .get(&format!(
                "/rest/v1/user_devices?select={}&user_id=eq.{}&order=last_seen_at.desc&limit=1",
                DEVICE_SELECT,
                urlencoding::encode(user_id)
            ))
            .await?;

        Ok(rows.into_iter().next().map(RemoteDeviceRow::into_bundle))
    }

    async fn mark_prekey_consumed(&self, prekey_id: &str) -> CoreResult<()> {
        #[derive(Serialize)]
        struct ConsumedPatch {
            consumed: bool,
        }

        self.api
            .patch(
                &format!(
                    "/rest/v1/device_prekeys?id=eq.{}",
                    urlencoding::encode(prekey_id)
                ),
                &ConsumedPatch { consumed: true },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_row_offers_first_unconsumed_prekey() {
        let row: RemoteDeviceRow = serde_json::from_value(serde_json::json!({
            "id": "device-1",
            "device_label": "primary",
            "identity_key_public": "ik",
            "identity_signing_public": "isk",
            "signed_prekey_public": "spk",
            "signed_prekey_signature": "sig",
            "device_prekeys": [
                { "id": "row-2", "prekey_id": 2, "public_key": "pk2", "consumed": false },
                { "id": "row-0", "prekey_id": 0, "public_key": "pk0", "consumed": true },
                { "id": "row-1", "prekey_id": 1, "public_key": "pk1", "consumed": false }
            ]
        }))
        .unwrap();

        let remote = row.into_bundle();
        assert_eq!(remote.device_id, "device-1");
        assert_eq!(remote.one_time_pre_key_id.as_deref(), Some("row-1"));
        assert_eq!(remote.one_time_pre_key.as_deref(), Some("pk1"));
        assert_eq!(remote.bundle.one_time_pre_keys, vec!["pk1", "pk2"]);
        assert_eq!(remote.bundle.signed_pre_key, "spk");
    }

    #[test]
    fn test_remote_row_without_prekeys() {
        let row: RemoteDeviceRow = serde_json::from_value(serde_json::json!({
            "id": "device-1",
            "device_label": "primary",
            "identity_key_public": "ik",
            "identity_signing_public": "isk",
            "signed_prekey_public": "spk",
            "signed_prekey_signature": "sig"
        }))
        .unwrap();

        let remote = row.into_bundle();
        assert!(remote.one_time_pre_key.is_none());
        assert!(remote.one_time_pre_key_id.is_none());
        assert!(remote.bundle.one_time_pre_keys.is_empty());
    }
}
