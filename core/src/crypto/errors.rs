//! Cryptographic error types
//!
//! This module defines all error types for the X3DH / Double Ratchet layer.
//! Storage, transport and configuration failures live in [`crate::error`].

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Failed to parse or decode a key
    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    /// Signed prekey signature did not verify under the identity signing key
    #[error("Signature verification failed: {0}")]
    SignatureError(String),

    /// Failed to derive a shared secret
    #[error("Key exchange failed: {0}")]
    KeyExchangeFailed(String),

    /// Encrypting requires a remote ratchet key, which only a handshake provides
    #[error("Remote ratchet key is unavailable; X3DH handshake required")]
    HandshakeRequired,

    /// Message number is below the receiving counter of its chain
    #[error("Message {message_number} has already been processed (expected >= {expected})")]
    DuplicateMessage { message_number: u32, expected: u32 },

    /// Header asks us to skip further ahead than we are willing to cache
    #[error("Refusing to skip {requested} message keys (limit {limit})")]
    TooManySkippedMessages { requested: u32, limit: u32 },

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionError(String),

    /// Decryption failed
    #[error("Decryption failed: {0}")]
    DecryptionError(String),
}

impl From<aes_gcm::Error> for CryptoError {
    fn from(_: aes_gcm::Error) -> Self {
        CryptoError::DecryptionError("AES-GCM operation failed".to_string())
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(e: base64::DecodeError) -> Self {
        CryptoError::InvalidKey(format!("Invalid base64url: {}", e))
    }
}

impl From<ed25519_dalek::SignatureError> for CryptoError {
    fn from(e: ed25519_dalek::SignatureError) -> Self {
        CryptoError::SignatureError(e.to_string())
    }
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
