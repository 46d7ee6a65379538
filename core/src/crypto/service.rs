//! SessionManager - High-level encryption API
//!
//! The single entry point for end-to-end encryption. It makes sure device
//! keys exist, decides between resuming a stored session and running an X3DH
//! handshake, drives the Double Ratchet, and maintains the per-session
//! message-key cache.
//!
//! ## Example
//!
//! ```rust,ignore
//! let manager = SessionManager::from_config(&CoreConfig::from_env()?).await?;
//!
//! let envelope = manager
//!     .encrypt("Hello!", &EncryptOptions::new("conv-1", "alice", "bob"))
//!     .await?;
//!
//! let shown = manager
//!     .decrypt(&envelope, &DecryptOptions::incoming("conv-1", "bob", "alice"))
//!     .await?;
//! ```
//!
//! Every operation on a conversation runs under that conversation's lock.
//! Different conversations proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::api::{ApiClient, Directory, HttpDirectory, ProfileHint};
use crate::config::CoreConfig;
use crate::crypto::envelope::{parse_envelope, HandshakeMetadata, SignalEnvelope, ENVELOPE_VERSION};
use crate::crypto::errors::CryptoError;
use crate::crypto::keys::StoredDeviceKeys;
use crate::crypto::prekeys::{DeviceKeyStore, PreKeyConfig, PreKeyStatus};
use crate::crypto::primitives::Primitives;
use crate::crypto::ratchet::{DoubleRatchet, MAX_SKIP};
use crate::crypto::sessions::{SessionState, SessionStore, MESSAGE_KEY_CACHE_LIMIT};
use crate::crypto::x3dh::{self, RemoteOneTimePreKey};
use crate::db::{SecretStore, SqliteSecretStore};
use crate::error::{CoreError, CoreResult};
use crate::telemetry::{HttpCollector, Severity, Telemetry, TelemetryEvent};

/// Shown for our own messages we can no longer decrypt
pub const ENCRYPTED_PLACEHOLDER: &str = "[encrypted]";

/// Shown for messages whose decryption destroyed the session
pub const DESTROYED_PLACEHOLDER: &str = "[destroyed]";

/// Shown for a redelivered message whose key is gone
pub const DUPLICATE_PLACEHOLDER: &str = "[duplicate]";

/// Tunables for the session manager
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub device_label: String,
    pub one_time_prekey_count: usize,
    pub message_key_cache_limit: usize,
    pub max_skip: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            device_label: "primary".to_string(),
            one_time_prekey_count: PreKeyConfig::default().one_time_prekey_count,
            message_key_cache_limit: MESSAGE_KEY_CACHE_LIMIT,
            max_skip: MAX_SKIP,
        }
    }
}

impl From<&CoreConfig> for SessionSettings {
    fn from(config: &CoreConfig) -> Self {
        Self {
            device_label: config.device_label.clone(),
            one_time_prekey_count: config.one_time_prekey_count,
            message_key_cache_limit: config.message_key_cache_limit,
            max_skip: config.max_skipped_message_keys,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncryptOptions {
    pub conversation_id: String,
    pub local_user_id: String,
    pub remote_user_id: String,
    pub associated_data: Option<String>,
}

impl EncryptOptions {
    pub fn new(conversation_id: &str, local_user_id: &str, remote_user_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            local_user_id: local_user_id.to_string(),
            remote_user_id: remote_user_id.to_string(),
            associated_data: None,
        }
    }

    pub fn with_associated_data(mut self, associated_data: &str) -> Self {
        self.associated_data = Some(associated_data.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct DecryptOptions {
    pub conversation_id: String,
    pub local_user_id: String,
    pub remote_user_id: String,
    /// The envelope was sent by the local user (own echo or history)
    pub sender_is_local: bool,
}

impl DecryptOptions {
    /// Options for a message sent by the remote user
    pub fn incoming(conversation_id: &str, local_user_id: &str, remote_user_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            local_user_id: local_user_id.to_string(),
            remote_user_id: remote_user_id.to_string(),
            sender_is_local: false,
        }
    }

    /// Options for a message the local user sent
    pub fn own(conversation_id: &str, local_user_id: &str, remote_user_id: &str) -> Self {
        Self {
            sender_is_local: true,
            ..Self::incoming(conversation_id, local_user_id, remote_user_id)
        }
    }
}

/// Outcome of [`SessionManager::decrypt`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decrypted {
    /// Successfully decrypted text
    Plaintext(String),
    /// Input was not a version 1 envelope and is returned as is
    Passthrough(String),
    /// Own message whose key is not cached
    Encrypted,
    /// Decryption failed and the session was deleted
    Destroyed,
    /// Already processed message with no cached key; session untouched
    Duplicate,
}

impl Decrypted {
    /// Text to display for this outcome
    pub fn as_text(&self) -> &str {
        match self {
            Self::Plaintext(text) | Self::Passthrough(text) => text,
            Self::Encrypted => ENCRYPTED_PLACEHOLDER,
            Self::Destroyed => DESTROYED_PLACEHOLDER,
            Self::Duplicate => DUPLICATE_PLACEHOLDER,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Plaintext(text) | Self::Passthrough(text) => text,
            other => other.as_text().to_string(),
        }
    }
}

/// High-level encryption service
pub struct SessionManager {
    primitives: Arc<Primitives>,
    device_keys: DeviceKeyStore,
    sessions: SessionStore,
    directory: Arc<dyn Directory>,
    telemetry: Telemetry,
    settings: SessionSettings,
    profile_hint: ProfileHint,
    /// Per-conversation locks
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(
        primitives: Arc<Primitives>,
        store: Arc<dyn SecretStore>,
        directory: Arc<dyn Directory>,
        telemetry: Telemetry,
        settings: SessionSettings,
    ) -> Self {
        let device_keys = DeviceKeyStore::new(
            primitives.clone(),
            store.clone(),
            directory.clone(),
            telemetry.clone(),
            PreKeyConfig {
                one_time_prekey_count: settings.one_time_prekey_count,
            },
        );

        Self {
            primitives,
            device_keys,
            sessions: SessionStore::new(store),
            directory,
            telemetry,
            settings,
            profile_hint: ProfileHint::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire up SQLite storage, the HTTP directory and HTTP telemetry
    pub async fn from_config(config: &CoreConfig) -> CoreResult<Self> {
        config.validate()?;

        let api = ApiClient::new(
            &config.api_url,
            &config.api_key,
            config.access_token.clone(),
            config.request_timeout(),
        )?;
        let store = SqliteSecretStore::open(&config.database_path.to_string_lossy()).await?;
        let telemetry = if config.telemetry_enabled {
            Telemetry::spawn(Arc::new(HttpCollector::new(api.clone())))
        } else {
            Telemetry::disabled()
        };

        Ok(Self::new(
            Arc::new(Primitives::new()),
            Arc::new(store),
            Arc::new(HttpDirectory::new(api)),
            telemetry,
            SessionSettings::from(config),
        ))
    }

    /// Profile details used if the directory has no profile for us yet
    pub fn with_profile_hint(mut self, hint: ProfileHint) -> Self {
        self.profile_hint = hint;
        self
    }

    async fn conversation_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Entries only the map still references are idle
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(conversation_id.to_string()).or_default().clone()
    }

    /// Make sure local device keys exist and are published
    pub async fn ensure_device_keys(&self, local_user_id: &str) -> CoreResult<StoredDeviceKeys> {
        self.device_keys
            .ensure(local_user_id, &self.settings.device_label, &self.profile_hint)
            .await
    }

    /// Encrypt `plaintext` into a wire envelope
    ///
    /// Runs an X3DH handshake first if the conversation has no session with
    /// `remote_user_id`; the resulting envelope then carries handshake data.
    pub async fn encrypt(&self, plaintext: &str, options: &EncryptOptions) -> CoreResult<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let lock = self.conversation_lock(&options.conversation_id).await;
        let _guard = lock.lock().await;

        match self.encrypt_locked(plaintext, options).await {
            Ok((serialized, has_handshake)) => {
                self.telemetry.emit(
                    TelemetryEvent::MessageEncrypted,
                    Some(&options.conversation_id),
                    &options.local_user_id,
                    serde_json::json!({
                        "hasHandshake": has_handshake,
                        "payloadLength": serialized.len(),
                    }),
                );
                Ok(serialized)
            }
            Err(e) => {
                tracing::error!("Encryption failed: {}", e);
                let severity = match &e {
                    CoreError::Crypto(CryptoError::SignatureError(_)) => Severity::Critical,
                    _ => Severity::Warning,
                };
                self.telemetry.emit_with_severity(
                    TelemetryEvent::MessageSendError,
                    severity,
                    Some(&options.conversation_id),
                    &options.local_user_id,
                    serde_json::json!({ "reason": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    async fn encrypt_locked(
        &self,
        plaintext: &str,
        options: &EncryptOptions,
    ) -> CoreResult<(String, bool)> {
        let local_keys = self.ensure_device_keys(&options.local_user_id).await?;

        let existing = self
            .sessions
            .load_session(&options.conversation_id)
            .await?
            .filter(|session| session.partner_id == options.remote_user_id);

        let (mut session, handshake) = match existing {
            Some(session) => (session, None),
            None => {
                let (session, handshake) = self.initiate_session(&local_keys, options).await?;
                (session, Some(handshake))
            }
        };

        let mut ratchet = DoubleRatchet::from_state(&self.primitives, session.ratchet_state.clone())
            .with_max_skip(self.settings.max_skip);
        let encrypted = ratchet.encrypt(plaintext, options.associated_data.as_deref())?;

        session.ratchet_state = ratchet.into_state();
        session
            .message_key_cache
            .insert(encrypted.payload.header.cache_key(), encrypted.message_key);
        session
            .message_key_cache
            .prune(self.settings.message_key_cache_limit);
        session.awaiting_pre_key = None;
        session.touch();
        self.sessions.save_session(&session).await?;

        let has_handshake = handshake.is_some();
        let envelope = SignalEnvelope::new(encrypted.payload, handshake);
        tracing::debug!(
            "Encrypted message {} (handshake: {})",
            envelope.header.message_number,
            has_handshake
        );
        Ok((envelope.to_json()?, has_handshake))
    }

    /// X3DH as initiator against the remote user's published bundle
    async fn initiate_session(
        &self,
        local_keys: &StoredDeviceKeys,
        options: &EncryptOptions,
    ) -> CoreResult<(SessionState, HandshakeMetadata)> {
        let remote = self
            .directory
            .fetch_bundle(&options.remote_user_id)
            .await?
            .ok_or_else(|| {
                CoreError::MissingKeyMaterial("Remote contact has no published key bundle".to_string())
            })?;

        let offered = remote
            .one_time_pre_key
            .clone()
            .map(|public_key| RemoteOneTimePreKey {
                id: remote.one_time_pre_key_id.clone(),
                public_key,
            });

        let handshake =
            x3dh::perform_initiation(&self.primitives, local_keys, &remote.bundle, offered.as_ref())?;

        if let Some(prekey_id) = &remote.one_time_pre_key_id {
            self.directory.mark_prekey_consumed(prekey_id).await?;
        }

        let mut metadata = HandshakeMetadata {
            sender_identity_key: Some(local_keys.identity_key.public_key.clone()),
            sender_device_label: Some(local_keys.device_label.clone()),
            ..HandshakeMetadata::default()
        };
        if let Some(used) = handshake.used_one_time_pre_key {
            metadata.one_time_pre_key_id = used.id;
            metadata.one_time_pre_key = Some(used.public_key);
        }

        tracing::info!(
            "Initiated session with device {} (one-time prekey: {})",
            remote.device_id,
            metadata.one_time_pre_key.is_some()
        );

        let session = SessionState::new(
            &options.conversation_id,
            &options.remote_user_id,
            handshake.ratchet_state,
            metadata.one_time_pre_key_id.clone(),
        );
        Ok((session, metadata))
    }

    /// Decrypt a wire envelope
    ///
    /// Cryptographic failures never surface as errors: any session is deleted
    /// and [`Decrypted::Destroyed`] is returned. A sender whose identity key
    /// cannot be found at all is reported as
    /// [`CoreError::MissingKeyMaterial`].
    pub async fn decrypt(&self, ciphertext: &str, options: &DecryptOptions) -> CoreResult<Decrypted> {
        if ciphertext.is_empty() {
            return Ok(Decrypted::Plaintext(String::new()));
        }

        let Some(envelope) =
            parse_envelope(ciphertext).filter(|envelope| envelope.version == ENVELOPE_VERSION)
        else {
            tracing::debug!("Not a version {} envelope, passing through", ENVELOPE_VERSION);
            return Ok(Decrypted::Passthrough(ciphertext.to_string()));
        };

        let lock = self.conversation_lock(&options.conversation_id).await;
        let _guard = lock.lock().await;

        let existing = self
            .sessions
            .load_session(&options.conversation_id)
            .await?
            .filter(|session| session.partner_id == options.remote_user_id);

        let session = match existing {
            Some(session) => session,
            None if options.sender_is_local => {
                tracing::debug!("No session for own message, cannot recover it");
                return Ok(Decrypted::Encrypted);
            }
            None => match self.respond_to_handshake(&envelope, options).await {
                Ok(session) => session,
                Err(CoreError::Crypto(e)) => {
                    self.destroy_session(options, &e).await?;
                    return Ok(Decrypted::Destroyed);
                }
                Err(e) => return Err(e),
            },
        };

        self.decrypt_with_session(session, &envelope, options).await
    }

    /// X3DH as responder, from the envelope's handshake data
    async fn respond_to_handshake(
        &self,
        envelope: &SignalEnvelope,
        options: &DecryptOptions,
    ) -> CoreResult<SessionState> {
        let local_keys = self.ensure_device_keys(&options.local_user_id).await?;

        let remote = match self.directory.fetch_bundle(&options.remote_user_id).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!("Failed to fetch sender bundle: {}", e);
                None
            }
        };
        let identity_from_bundle = remote.and_then(|remote| match remote.bundle.verify(&self.primitives) {
            Ok(()) => Some(remote.bundle.identity_key),
            Err(e) => {
                tracing::warn!("Ignoring unverifiable sender bundle: {}", e);
                None
            }
        });

        let handshake_meta = envelope.handshake.as_ref();
        let identity_from_envelope =
            handshake_meta.and_then(|meta| meta.sender_identity_key.clone());

        if let (Some(from_envelope), Some(from_bundle)) = (&identity_from_envelope, &identity_from_bundle) {
            if from_envelope != from_bundle {
                tracing::warn!(
                    "Sender identity differs between envelope and directory; using the envelope"
                );
            }
        }

        let initiator_identity = identity_from_envelope.or(identity_from_bundle).ok_or_else(|| {
            CoreError::MissingKeyMaterial(
                "Unable to determine sender identity key for handshake".to_string(),
            )
        })?;

        let handshake = x3dh::complete_response(
            &self.primitives,
            &local_keys,
            &initiator_identity,
            &envelope.header.ratchet_key,
            handshake_meta.and_then(|meta| meta.one_time_pre_key.as_deref()),
        )?;

        if let Some(prekey) = &handshake.consumed_one_time_pre_key {
            self.device_keys
                .consume_one_time_prekey(&prekey.key_pair.public_key)
                .await?;
        }

        let prekey_id = handshake_meta.and_then(|meta| meta.one_time_pre_key_id.clone());
        if let Some(prekey_id) = &prekey_id {
            self.directory.mark_prekey_consumed(prekey_id).await?;
        }

        tracing::info!(
            "Completed handshake as responder (one-time prekey: {})",
            handshake.consumed_one_time_pre_key.is_some()
        );

        Ok(SessionState::new(
            &options.conversation_id,
            &options.remote_user_id,
            handshake.ratchet_state,
            prekey_id,
        ))
    }

    async fn decrypt_with_session(
        &self,
        mut session: SessionState,
        envelope: &SignalEnvelope,
        options: &DecryptOptions,
    ) -> CoreResult<Decrypted> {
        let payload = envelope.payload();
        let cache_key = envelope.header.cache_key();
        let cached = session.message_key_cache.get(&cache_key).map(str::to_string);

        let mut ratchet = DoubleRatchet::from_state(&self.primitives, session.ratchet_state.clone())
            .with_max_skip(self.settings.max_skip);

        let attempt = match cached {
            Some(message_key) => {
                tracing::debug!("Using cached key for message {}", envelope.header.message_number);
                ratchet.decrypt_with_known_key(&payload, &message_key)
            }
            None if options.sender_is_local => {
                tracing::debug!("No cached key for own message");
                return Ok(Decrypted::Encrypted);
            }
            None => ratchet.decrypt_incoming(&payload).map(|decrypted| {
                session
                    .message_key_cache
                    .insert(cache_key, decrypted.message_key);
                for skipped in decrypted.skipped_message_keys {
                    session
                        .message_key_cache
                        .insert_if_absent(skipped.cache_key(), skipped.key);
                }
                decrypted.plaintext
            }),
        };

        match attempt {
            Ok(plaintext) => {
                session.ratchet_state = ratchet.into_state();
                session
                    .message_key_cache
                    .prune(self.settings.message_key_cache_limit);
                session.touch();
                self.sessions.save_session(&session).await?;

                self.telemetry.emit(
                    TelemetryEvent::MessageDecryptSuccess,
                    Some(&options.conversation_id),
                    &options.local_user_id,
                    serde_json::json!({
                        "senderIsLocal": options.sender_is_local,
                        "cipherLength": envelope.ciphertext.len(),
                    }),
                );
                Ok(Decrypted::Plaintext(plaintext))
            }
            Err(CryptoError::DuplicateMessage {
                message_number,
                expected,
            }) => {
                tracing::warn!(
                    "Dropping replayed message {} (receiving chain at {})",
                    message_number,
                    expected
                );
                Ok(Decrypted::Duplicate)
            }
            Err(e) => {
                self.destroy_session(options, &e).await?;
                Ok(Decrypted::Destroyed)
            }
        }
    }

    async fn destroy_session(&self, options: &DecryptOptions, error: &CryptoError) -> CoreResult<()> {
        tracing::warn!(
            "Unable to decrypt payload, destroying session (sender is local: {}): {}",
            options.sender_is_local,
            error
        );

        self.sessions.delete_session(&options.conversation_id).await?;

        self.telemetry.emit(
            TelemetryEvent::RatchetReset,
            Some(&options.conversation_id),
            &options.local_user_id,
            serde_json::json!({ "reason": "decrypt_failure" }),
        );
        self.telemetry.emit(
            TelemetryEvent::MessageDecryptDestroyed,
            Some(&options.conversation_id),
            &options.local_user_id,
            serde_json::json!({ "reason": error.to_string() }),
        );
        Ok(())
    }

    /// Forget a conversation's session; the next message starts a new handshake
    pub async fn clear_conversation_session(&self, conversation_id: &str) -> CoreResult<()> {
        let lock = self.conversation_lock(conversation_id).await;
        let _guard = lock.lock().await;

        self.sessions.delete_session(conversation_id).await?;
        tracing::info!("Cleared conversation session");
        Ok(())
    }

    /// Delete local device keys; they are regenerated and republished on next use
    pub async fn reset_device_keys(&self) -> CoreResult<()> {
        self.device_keys.reset().await
    }

    pub async fn has_session(&self, conversation_id: &str) -> CoreResult<bool> {
        self.sessions.has_session(conversation_id).await
    }

    pub async fn session(&self, conversation_id: &str) -> CoreResult<Option<SessionState>> {
        self.sessions.load_session(conversation_id).await
    }

    pub async fn key_status(&self) -> CoreResult<Option<PreKeyStatus>> {
        self.device_keys.status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryDirectory;
    use crate::db::MemorySecretStore;

    fn manager(directory: Arc<MemoryDirectory>) -> SessionManager {
        SessionManager::new(
            Arc::new(Primitives::new()),
            Arc::new(MemorySecretStore::new()),
            directory,
            Telemetry::disabled(),
            SessionSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_empty_input_short_circuits() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = manager(directory.clone());

        let sent = alice
            .encrypt("", &EncryptOptions::new("c1", "alice", "bob"))
            .await
            .unwrap();
        assert_eq!(sent, "");

        let shown = alice
            .decrypt("", &DecryptOptions::incoming("c1", "alice", "bob"))
            .await
            .unwrap();
        assert_eq!(shown, Decrypted::Plaintext(String::new()));

        // Nothing was generated or published
        assert!(alice.key_status().await.unwrap().is_none());
        assert!(directory.fetch_bundle("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_passthrough_for_non_envelopes() {
        let alice = manager(Arc::new(MemoryDirectory::new()));
        let options = DecryptOptions::incoming("c1", "alice", "bob");

        let legacy = alice.decrypt("plain old text", &options).await.unwrap();
        assert_eq!(legacy, Decrypted::Passthrough("plain old text".to_string()));

        let future = r#"{"version":2,"header":{"ratchetKey":"rk","messageNumber":0,"previousSendingNumber":0,"nonce":"nn"},"ciphertext":"ct"}"#;
        let shown = alice.decrypt(future, &options).await.unwrap();
        assert_eq!(shown.as_text(), future);
    }

    #[tokio::test]
    async fn test_missing_bundle_is_an_error() {
        let alice = manager(Arc::new(MemoryDirectory::new()));

        let result = alice
            .encrypt("hi", &EncryptOptions::new("c1", "alice", "bob"))
            .await;
        assert!(matches!(result, Err(CoreError::MissingKeyMaterial(_))));
        assert!(!alice.has_session("c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_first_message_round_trip() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = manager(directory.clone());
        let bob = manager(directory.clone());
        bob.ensure_device_keys("bob").await.unwrap();

        let envelope = alice
            .encrypt("hello bob", &EncryptOptions::new("c1", "alice", "bob"))
            .await
            .unwrap();
        let parsed = parse_envelope(&envelope).unwrap();
        let handshake = parsed.handshake.unwrap();
        assert!(handshake.sender_identity_key.is_some());
        assert_eq!(handshake.sender_device_label.as_deref(), Some("primary"));
        assert!(handshake.one_time_pre_key_id.is_some());

        let shown = bob
            .decrypt(&envelope, &DecryptOptions::incoming("c1", "bob", "alice"))
            .await
            .unwrap();
        assert_eq!(shown, Decrypted::Plaintext("hello bob".to_string()));

        let session = alice.session("c1").await.unwrap().unwrap();
        assert!(session.awaiting_pre_key.is_none());
        assert_eq!(session.message_key_cache.len(), 1);
    }

    #[tokio::test]
    async fn test_idle_conversation_locks_are_dropped() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = manager(directory.clone());
        let bob = manager(directory.clone());
        bob.ensure_device_keys("bob").await.unwrap();

        for conversation in ["c1", "c2", "c3"] {
            alice
                .encrypt("hi", &EncryptOptions::new(conversation, "alice", "bob"))
                .await
                .unwrap();
        }
        alice.clear_conversation_session("c1").await.unwrap();

        let held = alice.conversation_lock("c4").await;
        let locks = alice.locks.lock().await;
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key("c4"));
        drop(held);
    }

    #[test]
    fn test_decrypted_display_text() {
        assert_eq!(Decrypted::Encrypted.as_text(), "[encrypted]");
        assert_eq!(Decrypted::Destroyed.into_text(), "[destroyed]");
        assert_eq!(Decrypted::Plaintext("hi".to_string()).into_text(), "hi");
        assert_eq!(Decrypted::Duplicate.as_text(), DUPLICATE_PLACEHOLDER);
    }
}
