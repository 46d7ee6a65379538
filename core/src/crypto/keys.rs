//! Key types and device key generation
//!
//! This module defines the key material a device owns:
//! - An Ed25519 identity signing key, used to sign the signed prekey
//! - An X25519 identity key derived deterministically from the signing key
//! - A signed prekey (X25519) for medium-term key exchange
//! - A pool of one-time prekeys (X25519), each consumed by at most one handshake
//!
//! Persisted and published forms use unpadded base64url strings.

use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::primitives::{decode, decode_key, encode, Primitives, KEY_LEN};

/// Default size of the one-time prekey pool
pub const ONE_TIME_PREKEY_DEFAULT: usize = 10;

/// Encoded key pair as stored and exchanged
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Long-term identity signing key pair (Ed25519)
///
/// Used for:
/// - Signing the signed prekey to prove ownership
/// - Deriving the X25519 identity key used in X3DH
/// - Key fingerprint generation for verification
pub struct IdentityKeyPair {
    signing: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a new random identity key pair
    pub fn generate(primitives: &Primitives) -> Self {
        let mut seed = primitives.random_key();
        let signing = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Self { signing }
    }

    /// Restore from the 32-byte secret seed
    pub fn from_seed(seed: &[u8]) -> CryptoResult<Self> {
        let seed: [u8; KEY_LEN] = seed
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("Signing seed must be 32 bytes".to_string()))?;
        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
        })
    }

    /// Restore from an encoded key pair, checking the public half matches
    pub fn from_encoded(pair: &KeyPair) -> CryptoResult<Self> {
        let identity = Self::from_seed(&decode(&pair.private_key)?)?;
        if encode(&identity.public_key_bytes()) != pair.public_key {
            return Err(CryptoError::InvalidKey(
                "Identity signing key does not match its seed".to_string(),
            ));
        }
        Ok(identity)
    }

    /// Sign a message with this identity key
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }

    /// Get the public key bytes
    pub fn public_key_bytes(&self) -> [u8; KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    /// Compute a fingerprint for key verification
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(self.public_key_bytes());
        hex::encode(&hash[..8])
    }

    /// Derive the X25519 identity key pair from the Ed25519 seed
    ///
    /// The scalar is the clamped first half of SHA-512(seed), so the resulting
    /// public key equals the Montgomery form of the Ed25519 public key.
    pub fn to_curve25519(&self) -> Curve25519KeyPair {
        let hash = Sha512::digest(self.signing.to_bytes());

        let mut scalar = [0u8; KEY_LEN];
        scalar.copy_from_slice(&hash[..KEY_LEN]);
        scalar[0] &= 248;
        scalar[31] &= 127;
        scalar[31] |= 64;

        let secret = StaticSecret::from(scalar);
        scalar.zeroize();
        Curve25519KeyPair::from_secret(secret)
    }

    /// Encode for storage
    pub fn to_encoded(&self) -> KeyPair {
        KeyPair {
            public_key: encode(&self.public_key_bytes()),
            private_key: encode(&self.signing.to_bytes()),
        }
    }
}

/// X25519 key pair for Diffie-Hellman key exchange
///
/// Used for:
/// - The derived identity key
/// - Ephemeral keys in X3DH
/// - Ratchet keys in Double Ratchet
/// - Signed prekeys and one-time prekeys
pub struct Curve25519KeyPair {
    /// Public key (safe to share)
    pub public: PublicKey,
    secret: StaticSecret,
}

impl Curve25519KeyPair {
    /// Generate a new random X25519 key pair
    pub fn generate(primitives: &Primitives) -> Self {
        let mut bytes = primitives.random_key();
        let secret = StaticSecret::from(bytes);
        bytes.zeroize();
        Self::from_secret(secret)
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { public, secret }
    }

    /// Restore from an encoded key pair, checking the public half matches
    pub fn from_encoded(pair: &KeyPair) -> CryptoResult<Self> {
        let secret = StaticSecret::from(decode_key(&pair.private_key)?);
        let restored = Self::from_secret(secret);
        if encode(restored.public.as_bytes()) != pair.public_key {
            return Err(CryptoError::InvalidKey(
                "Public key does not match private key".to_string(),
            ));
        }
        Ok(restored)
    }

    /// Perform Diffie-Hellman key exchange
    pub fn diffie_hellman(&self, their_public: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
        self.secret
            .diffie_hellman(&PublicKey::from(*their_public))
            .to_bytes()
    }

    /// Get the public key bytes
    pub fn public_key_bytes(&self) -> [u8; KEY_LEN] {
        self.public.to_bytes()
    }

    /// Encode for storage
    pub fn to_encoded(&self) -> KeyPair {
        KeyPair {
            public_key: encode(self.public.as_bytes()),
            private_key: encode(&self.secret.to_bytes()),
        }
    }
}

/// Convert an Ed25519 public key to its X25519 (Montgomery) equivalent
pub fn ed25519_public_to_curve25519(ed_public: &[u8]) -> CryptoResult<[u8; KEY_LEN]> {
    let compressed = CompressedEdwardsY::from_slice(ed_public)
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid Ed25519 public key: {:?}", e)))?;

    let point = compressed.decompress().ok_or_else(|| {
        CryptoError::InvalidKey("Failed to decompress Ed25519 public key".to_string())
    })?;

    Ok(point.to_montgomery().to_bytes())
}

/// One-time prekey held locally, with its stable ordinal id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimePreKey {
    pub id: u32,
    #[serde(flatten)]
    pub key_pair: KeyPair,
}

/// One-time prekey as published to the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedPreKey {
    pub prekey_id: u32,
    pub public_key: String,
}

/// Public key bundle published to the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceKeyBundle {
    pub identity_key: String,
    pub identity_signing_key: String,
    pub signed_pre_key: String,
    pub signed_pre_key_signature: String,
    pub one_time_pre_keys: Vec<String>,
    pub device_label: String,
}

impl DeviceKeyBundle {
    /// Verify the signed prekey signature and the identity key binding
    ///
    /// Every consumer calls this before using any key in the bundle.
    pub fn verify(&self, primitives: &Primitives) -> CryptoResult<()> {
        let signing_key = decode(&self.identity_signing_key)?;
        let signed_pre_key = decode(&self.signed_pre_key)?;
        let signature = decode(&self.signed_pre_key_signature)?;

        primitives
            .verify(&signing_key, &signed_pre_key, &signature)
            .map_err(|e| {
                CryptoError::SignatureError(format!(
                    "Remote signed prekey signature verification failed: {}",
                    e
                ))
            })?;

        let expected_identity = ed25519_public_to_curve25519(&signing_key)?;
        if decode_key(&self.identity_key)? != expected_identity {
            return Err(CryptoError::SignatureError(
                "Identity key is not bound to the identity signing key".to_string(),
            ));
        }

        Ok(())
    }
}

/// Full device key material, local storage only
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDeviceKeys {
    pub identity_key: KeyPair,
    pub identity_signing_key: KeyPair,
    pub signed_pre_key: KeyPair,
    pub signed_pre_key_signature: String,
    pub one_time_pre_keys: Vec<OneTimePreKey>,
    #[serde(default)]
    pub consumed_one_time_pre_keys: Vec<OneTimePreKey>,
    pub device_label: String,
}

impl StoredDeviceKeys {
    /// Public half, as published to the directory
    pub fn bundle(&self) -> DeviceKeyBundle {
        DeviceKeyBundle {
            identity_key: self.identity_key.public_key.clone(),
            identity_signing_key: self.identity_signing_key.public_key.clone(),
            signed_pre_key: self.signed_pre_key.public_key.clone(),
            signed_pre_key_signature: self.signed_pre_key_signature.clone(),
            one_time_pre_keys: self
                .one_time_pre_keys
                .iter()
                .map(|prekey| prekey.key_pair.public_key.clone())
                .collect(),
            device_label: self.device_label.clone(),
        }
    }

    /// Unconsumed one-time prekeys with their ordinal ids
    pub fn published_pre_keys(&self) -> Vec<PublishedPreKey> {
        self.one_time_pre_keys
            .iter()
            .map(|prekey| PublishedPreKey {
                prekey_id: prekey.id,
                public_key: prekey.key_pair.public_key.clone(),
            })
            .collect()
    }

    /// Find an unconsumed one-time prekey by its public key
    pub fn find_one_time_pre_key(&self, public_key: &str) -> Option<&OneTimePreKey> {
        self.one_time_pre_keys
            .iter()
            .find(|prekey| prekey.key_pair.public_key == public_key)
    }

    /// Move a one-time prekey into the consumed audit list
    ///
    /// Returns false when the key is not in the active pool.
    pub fn consume_one_time_pre_key(&mut self, public_key: &str) -> bool {
        let Some(idx) = self
            .one_time_pre_keys
            .iter()
            .position(|prekey| prekey.key_pair.public_key == public_key)
        else {
            return false;
        };

        let consumed = self.one_time_pre_keys.remove(idx);
        if !self
            .consumed_one_time_pre_keys
            .iter()
            .any(|prekey| prekey.key_pair.public_key == public_key)
        {
            self.consumed_one_time_pre_keys.push(consumed);
        }
        true
    }

    /// Identity fingerprint for logging and verification
    pub fn fingerprint(&self) -> CryptoResult<String> {
        Ok(IdentityKeyPair::from_encoded(&self.identity_signing_key)?.fingerprint())
    }
}

/// Generate a complete set of device keys
pub fn generate_device_keys(
    primitives: &Primitives,
    device_label: &str,
    one_time_pre_key_count: usize,
) -> StoredDeviceKeys {
    let identity = IdentityKeyPair::generate(primitives);
    let identity_dh = identity.to_curve25519();
    let signed_pre_key = Curve25519KeyPair::generate(primitives);
    let signature = identity.sign(&signed_pre_key.public_key_bytes());

    let one_time_pre_keys = (0..one_time_pre_key_count)
        .map(|i| OneTimePreKey {
            id: i as u32,
            key_pair: Curve25519KeyPair::generate(primitives).to_encoded(),
        })
        .collect();

    StoredDeviceKeys {
        identity_key: identity_dh.to_encoded(),
        identity_signing_key: identity.to_encoded(),
        signed_pre_key: signed_pre_key.to_encoded(),
        signed_pre_key_signature: encode(&signature),
        one_time_pre_keys,
        consumed_one_time_pre_keys: Vec::new(),
        device_label: device_label.to_string(),
    }
}
