//! Double Ratchet
//!
//! Per-message key evolution over a plain [`RatchetState`] value. The state
//! is serialisable and carries everything needed to resume after a restart;
//! [`DoubleRatchet`] only borrows the primitive adapter.
//!
//! ## Key derivation
//!
//! - Chain step: HKDF(chain key, "DoubleRatchetChain") -> next chain | message key
//! - Root step: HKDF(root key || DH output, "DoubleRatchetRoot") -> root | chain
//!
//! A DH ratchet step happens only when an incoming header carries a ratchet
//! key different from the recorded remote key. Resending the same key never
//! resets counters.
//!
//! Headers travel in cleartext and are not part of the AEAD associated data.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::keys::{Curve25519KeyPair, KeyPair};
use crate::crypto::primitives::{decode, decode_key, encode, Primitives, KEY_LEN, NONCE_LEN};

/// Default limit on message keys derived ahead in one chain
pub const MAX_SKIP: u32 = 1000;

const CHAIN_INFO: &[u8] = b"DoubleRatchetChain";
const ROOT_INFO: &[u8] = b"DoubleRatchetRoot";

/// Serialisable ratchet state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatchetState {
    pub root_key: String,
    pub sending_chain_key: String,
    pub receiving_chain_key: String,
    pub sending_message_number: u32,
    pub receiving_message_number: u32,
    pub previous_sending_message_number: u32,
    pub local_ratchet_key: KeyPair,
    pub remote_ratchet_key: Option<String>,
}

impl RatchetState {
    /// Fresh state with all counters at zero
    pub fn new(
        root_key: String,
        sending_chain_key: String,
        receiving_chain_key: String,
        local_ratchet_key: KeyPair,
        remote_ratchet_key: Option<String>,
    ) -> Self {
        Self {
            root_key,
            sending_chain_key,
            receiving_chain_key,
            sending_message_number: 0,
            receiving_message_number: 0,
            previous_sending_message_number: 0,
            local_ratchet_key,
            remote_ratchet_key,
        }
    }
}

/// Cleartext header sent with every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatchetHeader {
    pub ratchet_key: String,
    pub message_number: u32,
    pub previous_sending_number: u32,
    pub nonce: String,
}

impl RatchetHeader {
    /// Key used for the message-key cache
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.ratchet_key, self.message_number)
    }
}

/// Header plus ciphertext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    pub header: RatchetHeader,
    pub ciphertext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_data: Option<String>,
}

/// Message key derived while catching up a chain
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedMessageKey {
    pub ratchet_key: String,
    pub message_number: u32,
    pub key: String,
}

impl SkippedMessageKey {
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.ratchet_key, self.message_number)
    }
}

impl std::fmt::Debug for SkippedMessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkippedMessageKey")
            .field("ratchet_key", &self.ratchet_key)
            .field("message_number", &self.message_number)
            .finish_non_exhaustive()
    }
}

/// Result of [`DoubleRatchet::encrypt`]
#[derive(Debug)]
pub struct EncryptedMessage {
    pub payload: EncryptedPayload,
    /// Kept by the caller so its own message can be read again later
    pub message_key: String,
}

/// Result of [`DoubleRatchet::decrypt_incoming`]
#[derive(Debug)]
pub struct DecryptedMessage {
    pub plaintext: String,
    pub message_key: String,
    pub skipped_message_keys: Vec<SkippedMessageKey>,
}

/// Double Ratchet engine over a [`RatchetState`]
pub struct DoubleRatchet<'a> {
    primitives: &'a Primitives,
    state: RatchetState,
    max_skip: u32,
}

impl<'a> DoubleRatchet<'a> {
    /// Resume from persisted state
    pub fn from_state(primitives: &'a Primitives, state: RatchetState) -> Self {
        Self {
            primitives,
            state,
            max_skip: MAX_SKIP,
        }
    }

    /// Override the skipped-key limit
    pub fn with_max_skip(mut self, max_skip: u32) -> Self {
        self.max_skip = max_skip;
        self
    }

    pub fn state(&self) -> &RatchetState {
        &self.state
    }

    pub fn into_state(self) -> RatchetState {
        self.state
    }

    /// Encrypt with the next sending message key
    pub fn encrypt(
        &mut self,
        plaintext: &str,
        associated_data: Option<&str>,
    ) -> CryptoResult<EncryptedMessage> {
        if self.state.remote_ratchet_key.is_none() {
            return Err(CryptoError::HandshakeRequired);
        }

        let (chain_key, message_key) = self.kdf_chain(&self.state.sending_chain_key)?;

        let mut nonce = [0u8; NONCE_LEN];
        self.primitives.fill_random(&mut nonce);
        let ciphertext = self
            .primitives
            .seal(
                message_key.as_slice(),
                &nonce,
                plaintext.as_bytes(),
                associated_data.map(str::as_bytes),
            )?;

        let header = RatchetHeader {
            ratchet_key: self.state.local_ratchet_key.public_key.clone(),
            message_number: self.state.sending_message_number,
            previous_sending_number: self.state.previous_sending_message_number,
            nonce: encode(&nonce),
        };

        self.state.sending_chain_key = encode(chain_key.as_slice());
        self.state.sending_message_number += 1;

        Ok(EncryptedMessage {
            payload: EncryptedPayload {
                header,
                ciphertext: encode(&ciphertext),
                associated_data: associated_data.map(str::to_string),
            },
            message_key: encode(message_key.as_slice()),
        })
    }

    /// Decrypt a message from the peer, advancing the receiving chain
    ///
    /// The state is only updated when decryption succeeds; on any error it is
    /// left exactly as it was.
    pub fn decrypt_incoming(&mut self, payload: &EncryptedPayload) -> CryptoResult<DecryptedMessage> {
        let header = &payload.header;
        if header.ratchet_key.is_empty() {
            return Err(CryptoError::InvalidKey(
                "Ratchet header missing sender key".to_string(),
            ));
        }

        let mut next = self.state.clone();

        if next.remote_ratchet_key.as_deref() != Some(header.ratchet_key.as_str()) {
            self.ratchet_step(&mut next, &header.ratchet_key)?;
        }

        if header.message_number < next.receiving_message_number {
            return Err(CryptoError::DuplicateMessage {
                message_number: header.message_number,
                expected: next.receiving_message_number,
            });
        }

        let to_skip = header.message_number - next.receiving_message_number;
        if to_skip > self.max_skip {
            return Err(CryptoError::TooManySkippedMessages {
                requested: to_skip,
                limit: self.max_skip,
            });
        }

        let mut skipped_message_keys = Vec::with_capacity(to_skip as usize);
        while next.receiving_message_number < header.message_number {
            let (chain_key, message_key) = self.kdf_chain(&next.receiving_chain_key)?;
            skipped_message_keys.push(SkippedMessageKey {
                ratchet_key: header.ratchet_key.clone(),
                message_number: next.receiving_message_number,
                key: encode(message_key.as_slice()),
            });
            next.receiving_chain_key = encode(chain_key.as_slice());
            next.receiving_message_number += 1;
        }

        let (chain_key, message_key) = self.kdf_chain(&next.receiving_chain_key)?;
        next.receiving_chain_key = encode(chain_key.as_slice());
        next.receiving_message_number += 1;

        let plaintext = self.open(payload, message_key.as_slice())?;

        self.state = next;
        Ok(DecryptedMessage {
            plaintext,
            message_key: encode(message_key.as_slice()),
            skipped_message_keys,
        })
    }

    /// Decrypt with a cached message key, leaving the chains alone
    pub fn decrypt_with_known_key(
        &self,
        payload: &EncryptedPayload,
        message_key: &str,
    ) -> CryptoResult<String> {
        let key = Zeroizing::new(decode_key(message_key)?);
        self.open(payload, key.as_slice())
    }

    fn open(&self, payload: &EncryptedPayload, message_key: &[u8]) -> CryptoResult<String> {
        let nonce = decode(&payload.header.nonce)?;
        let ciphertext = decode(&payload.ciphertext)?;

        let plaintext = self.primitives.open(
            message_key,
            &nonce,
            &ciphertext,
            payload.associated_data.as_deref().map(str::as_bytes),
        )?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::DecryptionError("Plaintext is not valid UTF-8".to_string()))
    }

    /// DH ratchet step towards `remote_key`
    ///
    /// First root step derives the receiving chain from the current local
    /// key, the second derives the sending chain from a fresh local key.
    fn ratchet_step(&self, state: &mut RatchetState, remote_key: &str) -> CryptoResult<()> {
        let remote_public = decode_key(remote_key)?;

        let local = Curve25519KeyPair::from_encoded(&state.local_ratchet_key)?;
        let dh = Zeroizing::new(local.diffie_hellman(&remote_public));
        let (root_key, receiving_chain) = self.kdf_root(&state.root_key, dh.as_slice())?;

        state.root_key = encode(root_key.as_slice());
        state.receiving_chain_key = encode(receiving_chain.as_slice());
        state.receiving_message_number = 0;
        state.previous_sending_message_number = state.sending_message_number;
        state.sending_message_number = 0;
        state.remote_ratchet_key = Some(remote_key.to_string());

        let fresh = Curve25519KeyPair::generate(self.primitives);
        let dh = Zeroizing::new(fresh.diffie_hellman(&remote_public));
        let (root_key, sending_chain) = self.kdf_root(&state.root_key, dh.as_slice())?;

        state.root_key = encode(root_key.as_slice());
        state.sending_chain_key = encode(sending_chain.as_slice());
        state.local_ratchet_key = fresh.to_encoded();

        tracing::debug!(
            "Ratchet step performed (previous chain length {})",
            state.previous_sending_message_number
        );
        Ok(())
    }

    fn kdf_root(
        &self,
        root_key: &str,
        dh_output: &[u8],
    ) -> CryptoResult<(Zeroizing<[u8; KEY_LEN]>, Zeroizing<[u8; KEY_LEN]>)> {
        let mut input = Zeroizing::new(decode(root_key)?);
        input.extend_from_slice(dh_output);
        self.split(&input, ROOT_INFO)
    }

    fn kdf_chain(
        &self,
        chain_key: &str,
    ) -> CryptoResult<(Zeroizing<[u8; KEY_LEN]>, Zeroizing<[u8; KEY_LEN]>)> {
        let chain_key = Zeroizing::new(decode_key(chain_key)?);
        self.split(chain_key.as_slice(), CHAIN_INFO)
    }

    fn split(
        &self,
        input: &[u8],
        info: &[u8],
    ) -> CryptoResult<(Zeroizing<[u8; KEY_LEN]>, Zeroizing<[u8; KEY_LEN]>)> {
        let derived = Zeroizing::new(self.primitives.hkdf(input, info, KEY_LEN * 2)?);

        let mut first = Zeroizing::new([0u8; KEY_LEN]);
        let mut second = Zeroizing::new([0u8; KEY_LEN]);
        first.copy_from_slice(&derived[..KEY_LEN]);
        second.copy_from_slice(&derived[KEY_LEN..]);
        Ok((first, second))
    }
}
