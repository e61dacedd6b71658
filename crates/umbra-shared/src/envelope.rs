//! The direct-message sealed envelope.
//!
//! Sending to a contact or group seals in two layers: the plaintext is
//! signed with the sender's long-term Ed25519 key, then the signed bundle is
//! encrypted to the recipient's X25519 key under an ephemeral keypair, so
//! only the recipient learns who wrote it.
//!
//! Wire layout of a sealed envelope:
//!
//! ```text
//! ephemeral_pub (32) || nonce (24) || ct( plaintext || sender_ed25519 (32) || signature (64) )
//! ```

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::constants::{
    KDF_CONTEXT_SEALED_ENVELOPE, NONCE_SIZE, PUBKEY_SIZE, SIGNATURE_SIZE,
};
use crate::crypto;
use crate::error::CryptoError;
use crate::identity::{verify_signature, Identity};
use crate::types::AccountId;

/// A successfully opened envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedEnvelope {
    pub plaintext: Vec<u8>,
    /// The sender's raw Ed25519 public key, as carried inside the envelope.
    pub sender_ed25519: [u8; 32],
    /// The sender's standard account id, derived from the key above.
    pub sender: AccountId,
}

/// Sign `plaintext` with the sender's long-term key and seal it to
/// `recipient_x25519`.
///
/// The signature covers the recipient key, so a sealed envelope cannot be
/// re-sealed to a different recipient without detection.
pub fn seal(
    plaintext: &[u8],
    sender: &Identity,
    recipient_x25519: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    let sender_ed25519 = sender.ed25519_public_key();

    let mut verification = Vec::with_capacity(plaintext.len() + PUBKEY_SIZE * 2);
    verification.extend_from_slice(plaintext);
    verification.extend_from_slice(&sender_ed25519);
    verification.extend_from_slice(recipient_x25519);
    let signature = sender.sign(&verification);

    let mut inner = Vec::with_capacity(plaintext.len() + PUBKEY_SIZE + SIGNATURE_SIZE);
    inner.extend_from_slice(plaintext);
    inner.extend_from_slice(&sender_ed25519);
    inner.extend_from_slice(&signature.to_bytes());

    seal_box(&inner, recipient_x25519)
}

/// Open a sealed envelope with the recipient's X25519 secret and verify the
/// embedded signature.
pub fn open(data: &[u8], recipient_x25519_secret: &[u8; 32]) -> Result<OpenedEnvelope, CryptoError> {
    let inner = open_box(data, recipient_x25519_secret)?;
    if inner.len() < PUBKEY_SIZE + SIGNATURE_SIZE {
        return Err(CryptoError::MalformedEnvelope);
    }

    let (rest, sig_bytes) = inner.split_at(inner.len() - SIGNATURE_SIZE);
    let (plaintext, sender_bytes) = rest.split_at(rest.len() - PUBKEY_SIZE);

    let mut sender_ed25519 = [0u8; 32];
    sender_ed25519.copy_from_slice(sender_bytes);

    let recipient_public = PublicKey::from(&StaticSecret::from(*recipient_x25519_secret));

    let mut verification = Vec::with_capacity(plaintext.len() + PUBKEY_SIZE * 2);
    verification.extend_from_slice(plaintext);
    verification.extend_from_slice(&sender_ed25519);
    verification.extend_from_slice(recipient_public.as_bytes());

    let signature = ed25519_dalek::Signature::from_slice(sig_bytes)
        .map_err(|_| CryptoError::InvalidSignature)?;
    verify_signature(&sender_ed25519, &verification, &signature)?;

    let sender = sender_account_id(&sender_ed25519)?;

    Ok(OpenedEnvelope {
        plaintext: plaintext.to_vec(),
        sender_ed25519,
        sender,
    })
}

/// Derive the standard account id for a raw Ed25519 public key.
pub fn sender_account_id(ed25519_public: &[u8; 32]) -> Result<AccountId, CryptoError> {
    let verifying = ed25519_dalek::VerifyingKey::from_bytes(ed25519_public)
        .map_err(|_| CryptoError::InvalidKey)?;
    Ok(AccountId::standard(verifying.to_montgomery().to_bytes()))
}

/// Anonymous sealed box: encrypt to a recipient's X25519 key under a fresh
/// ephemeral keypair. Output is `ephemeral_pub || nonce || ciphertext`.
pub fn seal_box(plaintext: &[u8], recipient_pub: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pub = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient_pub));

    let key = crypto::derive_key(
        KDF_CONTEXT_SEALED_ENVELOPE,
        &[shared.as_bytes(), ephemeral_pub.as_bytes(), recipient_pub],
    );
    let ciphertext = crypto::encrypt(&key, plaintext)?;

    let mut out = Vec::with_capacity(PUBKEY_SIZE + ciphertext.len());
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a sealed box produced by [`seal_box`].
pub fn open_box(data: &[u8], recipient_secret: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < PUBKEY_SIZE + NONCE_SIZE {
        return Err(CryptoError::MalformedEnvelope);
    }

    let (ephemeral_bytes, ciphertext) = data.split_at(PUBKEY_SIZE);
    let mut ephemeral_pub = [0u8; 32];
    ephemeral_pub.copy_from_slice(ephemeral_bytes);

    let secret = StaticSecret::from(*recipient_secret);
    let recipient_pub = PublicKey::from(&secret);
    let shared = secret.diffie_hellman(&PublicKey::from(ephemeral_pub));

    let key = crypto::derive_key(
        KDF_CONTEXT_SEALED_ENVELOPE,
        &[shared.as_bytes(), &ephemeral_pub, recipient_pub.as_bytes()],
    );
    crypto::decrypt(&key, ciphertext)
}
