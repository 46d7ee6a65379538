//! Primitive adapter
//!
//! Every cryptographic primitive the protocol needs goes through an explicitly
//! constructed [`Primitives`] value: X25519 Diffie-Hellman, Ed25519
//! signatures, AES-256-GCM, HKDF-SHA256 and secure randomness.
//!
//! Randomness is the only stateful part. [`Primitives::new`] draws from the
//! operating system, [`Primitives::seeded`] from a ChaCha20 stream so that key
//! generation can be replayed exactly in tests.

use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::Sha256;

use crate::crypto::errors::{CryptoError, CryptoResult};

/// Size of every symmetric key and X25519 / Ed25519 key in bytes
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce size in bytes
pub const NONCE_LEN: usize = 12;

enum RandomSource {
    Os,
    Seeded(Mutex<ChaCha20Rng>),
}

/// Injectable primitive set
pub struct Primitives {
    random: RandomSource,
}

impl Primitives {
    /// Primitives backed by operating system randomness
    pub fn new() -> Self {
        Self {
            random: RandomSource::Os,
        }
    }

    /// Primitives backed by a deterministic ChaCha20 stream
    pub fn seeded(seed: [u8; 32]) -> Self {
        Self {
            random: RandomSource::Seeded(Mutex::new(ChaCha20Rng::from_seed(seed))),
        }
    }

    /// Fill `buf` with random bytes
    pub fn fill_random(&self, buf: &mut [u8]) {
        match &self.random {
            RandomSource::Os => OsRng.fill_bytes(buf),
            RandomSource::Seeded(rng) => {
                let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                rng.fill_bytes(buf);
            }
        }
    }

    /// Return `len` random bytes
    pub fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.fill_random(&mut out);
        out
    }

    /// Return 32 random bytes, suitable as secret key material
    pub fn random_key(&self) -> [u8; KEY_LEN] {
        let mut out = [0u8; KEY_LEN];
        self.fill_random(&mut out);
        out
    }

    /// HKDF-SHA256 with an all-zero salt
    pub fn hkdf(&self, input_key_material: &[u8], info: &[u8], len: usize) -> CryptoResult<Vec<u8>> {
        let hkdf = Hkdf::<Sha256>::new(None, input_key_material);
        let mut output = vec![0u8; len];
        hkdf.expand(info, &mut output)
            .map_err(|e| CryptoError::KeyExchangeFailed(format!("HKDF expansion failed: {}", e)))?;
        Ok(output)
    }

    /// AES-256-GCM seal
    pub fn seal(
        &self,
        key: &[u8],
        nonce: &[u8],
        plaintext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> CryptoResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::EncryptionError("Message key must be 32 bytes".to_string()))?;
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::EncryptionError(format!(
                "Nonce must be {} bytes",
                NONCE_LEN
            )));
        }

        cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad: associated_data.unwrap_or_default(),
                },
            )
            .map_err(|_| CryptoError::EncryptionError("AES-GCM operation failed".to_string()))
    }

    /// AES-256-GCM open; any tag mismatch is a hard error
    pub fn open(
        &self,
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> CryptoResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::DecryptionError("Message key must be 32 bytes".to_string()))?;
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::DecryptionError(format!(
                "Nonce must be {} bytes",
                NONCE_LEN
            )));
        }

        let plaintext = cipher.decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: associated_data.unwrap_or_default(),
            },
        )?;
        Ok(plaintext)
    }

    /// Verify a detached Ed25519 signature
    pub fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> CryptoResult<()> {
        let public: [u8; KEY_LEN] = public_key
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("Signing key must be 32 bytes".to_string()))?;
        let verifying_key = VerifyingKey::from_bytes(&public)?;
        let signature = Signature::from_slice(signature).map_err(|e| {
            CryptoError::SignatureError(format!("Invalid signature format: {}", e))
        })?;

        verifying_key.verify(message, &signature).map_err(Into::into)
    }
}

impl Default for Primitives {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Primitives {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match self.random {
            RandomSource::Os => "os",
            RandomSource::Seeded(_) => "seeded",
        };
        f.debug_struct("Primitives").field("random", &source).finish()
    }
}

/// Encode bytes as unpadded base64url
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode unpadded base64url
pub fn decode(value: &str) -> CryptoResult<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(value).map_err(Into::into)
}

/// Decode unpadded base64url into a 32-byte key
pub fn decode_key(value: &str) -> CryptoResult<[u8; KEY_LEN]> {
    decode(value)?
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("Key must be 32 bytes".to_string()))
}
