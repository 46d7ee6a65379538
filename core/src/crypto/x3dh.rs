//! X3DH (Extended Triple Diffie-Hellman) Key Agreement
//!
//! Asynchronous key agreement: the initiator derives the first ratchet state
//! from the responder's published bundle, and the responder completes the
//! same derivation later from the handshake metadata of the first message.
//!
//! ## Protocol Overview
//!
//! 1. Bob publishes his bundle (identity key, signed prekey, one-time prekeys)
//! 2. Alice fetches the bundle and verifies the signed prekey signature
//! 3. Alice computes, in this exact order:
//!    - DH1 = DH(IK_A, SPK_B)
//!    - DH2 = DH(EK_A, IK_B)
//!    - DH3 = DH(EK_A, SPK_B)
//!    - DH4 = DH(EK_A, OPK_B) [only if a one-time prekey was offered]
//! 4. HKDF(DH1 || DH2 || DH3 [|| DH4], "X3DH-INITIAL") yields 96 bytes:
//!    root key | Alice's sending chain | Alice's receiving chain
//! 5. Bob mirrors the DHs with his private keys and assigns the two chains
//!    the other way round

use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::keys::{
    Curve25519KeyPair, DeviceKeyBundle, KeyPair, OneTimePreKey, StoredDeviceKeys,
};
use crate::crypto::primitives::{decode_key, encode, Primitives, KEY_LEN};
use crate::crypto::ratchet::RatchetState;

/// HKDF label for the initial secrets
const X3DH_INFO: &[u8] = b"X3DH-INITIAL";

/// One-time prekey offered by the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOneTimePreKey {
    /// Directory row id, used to mark it consumed
    pub id: Option<String>,
    pub public_key: String,
}

/// Result of X3DH key agreement (initiator side)
#[derive(Debug)]
pub struct InitiatorHandshake {
    pub ratchet_state: RatchetState,
    /// The ephemeral key pair, whose public half travels in the first header
    pub ephemeral_key_pair: KeyPair,
    pub used_one_time_pre_key: Option<RemoteOneTimePreKey>,
}

/// Result of X3DH key agreement (responder side)
#[derive(Debug)]
pub struct ResponderHandshake {
    pub ratchet_state: RatchetState,
    /// Local one-time prekey that took part; the caller must retire it
    pub consumed_one_time_pre_key: Option<OneTimePreKey>,
}

/// Perform X3DH key agreement (initiator/Alice side)
///
/// Fails with [`CryptoError::SignatureError`] when the remote bundle does not
/// verify; no key in an unverified bundle is ever used.
pub fn perform_initiation(
    primitives: &Primitives,
    local_keys: &StoredDeviceKeys,
    remote_bundle: &DeviceKeyBundle,
    remote_one_time_pre_key: Option<&RemoteOneTimePreKey>,
) -> CryptoResult<InitiatorHandshake> {
    remote_bundle.verify(primitives)?;

    let identity = Curve25519KeyPair::from_encoded(&local_keys.identity_key)?;
    let remote_identity = decode_key(&remote_bundle.identity_key)?;
    let remote_signed_pre_key = decode_key(&remote_bundle.signed_pre_key)?;

    let ephemeral = Curve25519KeyPair::generate(primitives);

    let mut contributions = vec![
        identity.diffie_hellman(&remote_signed_pre_key),
        ephemeral.diffie_hellman(&remote_identity),
        ephemeral.diffie_hellman(&remote_signed_pre_key),
    ];

    if let Some(one_time) = remote_one_time_pre_key {
        let remote_one_time = decode_key(&one_time.public_key)?;
        contributions.push(ephemeral.diffie_hellman(&remote_one_time));
    }

    let (root_key, sending_chain_key, receiving_chain_key) =
        derive_initial_secrets(primitives, &contributions)?;
    let ephemeral_key_pair = ephemeral.to_encoded();

    Ok(InitiatorHandshake {
        ratchet_state: RatchetState::new(
            root_key,
            sending_chain_key,
            receiving_chain_key,
            ephemeral_key_pair.clone(),
            Some(remote_bundle.signed_pre_key.clone()),
        ),
        ephemeral_key_pair,
        used_one_time_pre_key: remote_one_time_pre_key.cloned(),
    })
}

/// Complete X3DH key agreement (responder/Bob side)
///
/// `used_one_time_pre_key` is the public key the initiator says it used. If
/// it is no longer in the local pool the fourth DH is left out, and the
/// resulting chains will not match the initiator's.
pub fn complete_response(
    primitives: &Primitives,
    local_keys: &StoredDeviceKeys,
    initiator_identity_key: &str,
    initiator_ephemeral_key: &str,
    used_one_time_pre_key: Option<&str>,
) -> CryptoResult<ResponderHandshake> {
    let identity = Curve25519KeyPair::from_encoded(&local_keys.identity_key)?;
    let signed_pre_key = Curve25519KeyPair::from_encoded(&local_keys.signed_pre_key)?;
    let initiator_identity = decode_key(initiator_identity_key)?;
    let initiator_ephemeral = decode_key(initiator_ephemeral_key)?;

    let mut contributions = vec![
        signed_pre_key.diffie_hellman(&initiator_identity),
        identity.diffie_hellman(&initiator_ephemeral),
        signed_pre_key.diffie_hellman(&initiator_ephemeral),
    ];

    let consumed = used_one_time_pre_key
        .and_then(|public_key| local_keys.find_one_time_pre_key(public_key))
        .cloned();

    if let Some(ref prekey) = consumed {
        let one_time = Curve25519KeyPair::from_encoded(&prekey.key_pair)?;
        contributions.push(one_time.diffie_hellman(&initiator_ephemeral));
    } else if used_one_time_pre_key.is_some() {
        tracing::warn!("Initiator used a one-time prekey that is no longer available");
    }

    // Responder's sending chain is the initiator's receiving chain
    let (root_key, initiator_sending, initiator_receiving) =
        derive_initial_secrets(primitives, &contributions)?;

    Ok(ResponderHandshake {
        ratchet_state: RatchetState::new(
            root_key,
            initiator_receiving,
            initiator_sending,
            local_keys.signed_pre_key.clone(),
            Some(initiator_ephemeral_key.to_string()),
        ),
        consumed_one_time_pre_key: consumed,
    })
}

/// Split HKDF output into `(root, first chain, second chain)`, encoded
fn derive_initial_secrets(
    primitives: &Primitives,
    contributions: &[[u8; KEY_LEN]],
) -> CryptoResult<(String, String, String)> {
    let shared_secret = zeroize::Zeroizing::new(contributions.concat());
    let material = zeroize::Zeroizing::new(primitives.hkdf(
        &shared_secret,
        X3DH_INFO,
        KEY_LEN * 3,
    )?);

    if material.len() != KEY_LEN * 3 {
        return Err(CryptoError::KeyExchangeFailed(
            "Unexpected X3DH output length".to_string(),
        ));
    }

    Ok((
        encode(&material[..KEY_LEN]),
        encode(&material[KEY_LEN..KEY_LEN * 2]),
        encode(&material[KEY_LEN * 2..]),
    ))
}
