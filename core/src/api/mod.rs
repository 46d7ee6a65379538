//! Directory collaborator
//!
//! The directory publishes and serves public key bundles and tracks which
//! one-time prekeys have been handed out. It never sees private keys or
//! plaintext.

pub mod client;
pub mod directory;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::keys::{DeviceKeyBundle, PublishedPreKey};
use crate::error::CoreResult;

pub use client::ApiClient;
pub use directory::HttpDirectory;
pub use memory::MemoryDirectory;

/// A peer's published bundle plus the one-time prekey offered to us
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDeviceBundle {
    pub bundle: DeviceKeyBundle,
    /// Directory row id of the offered one-time prekey
    pub one_time_pre_key_id: Option<String>,
    pub one_time_pre_key: Option<String>,
    pub device_id: String,
}

/// Optional profile details used when the directory has no profile yet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileHint {
    pub contact: Option<String>,
    pub display_name: Option<String>,
}

impl ProfileHint {
    /// Resolve `(contact, display_name)`, falling back to `user-<id prefix>`
    pub fn resolve(&self, user_id: &str) -> (String, String) {
        let contact = match self.contact.as_deref().map(str::trim) {
            Some(contact) if !contact.is_empty() => contact.to_string(),
            _ => format!("user-{}", user_id.chars().take(8).collect::<String>()),
        };

        let display_name = match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => contact
                .split_once('@')
                .map(|(local, _)| local.to_string())
                .unwrap_or_else(|| contact.clone()),
        };

        (contact, display_name)
    }
}

/// Key bundle directory
#[async_trait]
pub trait Directory: Send + Sync {
    /// Make sure a profile row exists for `user_id`
    async fn ensure_profile(&self, user_id: &str, hint: &ProfileHint) -> CoreResult<()>;

    /// Upsert the device keyed by `(user_id, bundle.device_label)` and its
    /// unconsumed one-time prekeys; returns the device id
    async fn publish_bundle(
        &self,
        user_id: &str,
        bundle: &DeviceKeyBundle,
        one_time_pre_keys: &[PublishedPreKey],
    ) -> CoreResult<String>;

    /// Bundle of the user's most recently seen device
    async fn fetch_bundle(&self, user_id: &str) -> CoreResult<Option<RemoteDeviceBundle>>;

    /// Flag a one-time prekey so it is never served again
    async fn mark_prekey_consumed(&self, prekey_id: &str) -> CoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_hint_fallbacks() {
        let (contact, name) = ProfileHint::default().resolve("0123456789abcdef");
        assert_eq!(contact, "user-01234567");
        assert_eq!(name, "user-01234567");

        let hint = ProfileHint {
            contact: Some("  ada@example.com ".to_string()),
            display_name: None,
        };
        let (contact, name) = hint.resolve("ignored");
        assert_eq!(contact, "ada@example.com");
        assert_eq!(name, "ada");

        let hint = ProfileHint {
            contact: Some("+15550100".to_string()),
            display_name: Some("Ada L.".to_string()),
        };
        assert_eq!(
            hint.resolve("x"),
            ("+15550100".to_string(), "Ada L.".to_string())
        );
    }
}
