//! Wire envelope
//!
//! The single versioned JSON schema carried by the relay. Anything that does
//! not parse as a version 1 envelope is handed back untouched by the session
//! manager, so messages stored before encryption was enabled still render.

use serde::{Deserialize, Serialize};

use crate::crypto::ratchet::{EncryptedPayload, RatchetHeader};

/// The only envelope version currently defined
pub const ENVELOPE_VERSION: u32 = 1;

/// Handshake data attached to the first message of an initiated session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_pre_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_pre_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_identity_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_device_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    pub version: u32,
    pub header: RatchetHeader,
    pub ciphertext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake: Option<HandshakeMetadata>,
}

impl SignalEnvelope {
    /// Wrap a ratchet payload
    pub fn new(payload: EncryptedPayload, handshake: Option<HandshakeMetadata>) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            header: payload.header,
            ciphertext: payload.ciphertext,
            associated_data: payload.associated_data,
            handshake,
        }
    }

    /// Ratchet payload view of this envelope
    pub fn payload(&self) -> EncryptedPayload {
        EncryptedPayload {
            header: self.header.clone(),
            ciphertext: self.ciphertext.clone(),
            associated_data: self.associated_data.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Parse an envelope; `None` for malformed JSON or a missing header
///
/// The version is not checked here.
pub fn parse_envelope(raw: &str) -> Option<SignalEnvelope> {
    serde_json::from_str(raw).ok()
}
