//! End-to-end encryption
//!
//! X3DH key agreement followed by a Double Ratchet, carried in a versioned
//! JSON envelope.
//!
//! ## Components
//!
//! - **primitives**: randomness, HKDF-SHA256, AES-256-GCM and Ed25519 checks
//! - **keys**: identity, signed prekey and one-time prekey material
//! - **prekeys**: persistence and publication of the local device keys
//! - **x3dh**: initiator and responder key agreement
//! - **ratchet**: Double Ratchet state machine with skipped-key handling
//! - **envelope**: the wire format
//! - **sessions**: per-conversation session storage and message-key cache
//! - **service**: the `SessionManager` facade
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sihbolt_core::crypto::{DecryptOptions, EncryptOptions, SessionManager};
//!
//! let envelope = manager
//!     .encrypt("hi", &EncryptOptions::new("conv-1", "alice", "bob"))
//!     .await?;
//! let shown = manager
//!     .decrypt(&envelope, &DecryptOptions::own("conv-1", "alice", "bob"))
//!     .await?;
//! ```

pub mod envelope;
pub mod errors;
pub mod keys;
pub mod prekeys;
pub mod primitives;
pub mod ratchet;
pub mod service;
pub mod sessions;
pub mod x3dh;

// Re-export commonly used types
pub use envelope::{parse_envelope, HandshakeMetadata, SignalEnvelope, ENVELOPE_VERSION};
pub use errors::{CryptoError, CryptoResult};
pub use keys::{DeviceKeyBundle, KeyPair, StoredDeviceKeys};
pub use prekeys::{DeviceKeyStore, PreKeyConfig, PreKeyStatus};
pub use primitives::Primitives;
pub use ratchet::{DoubleRatchet, RatchetState, MAX_SKIP};
pub use service::{DecryptOptions, Decrypted, EncryptOptions, SessionManager, SessionSettings};
pub use sessions::{SessionState, SessionStore};
