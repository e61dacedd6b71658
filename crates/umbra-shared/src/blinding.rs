//! Per-server pseudonymous ("blinded") keypairs.
//!
//! A user's activity on a community server must not be linkable to their
//! standard account id or to their identity on any other server. Each server
//! therefore gets its own keypair, derived deterministically from the
//! server's public key and the user's long-term Ed25519 key:
//!
//! ```text
//! k  = reduce64(BLAKE3-XOF(server_pubkey))      // the blinding factor
//! ka = k * a                                     // blinded secret scalar
//! kA = k * A = ka * B                            // blinded public key
//! ```
//!
//! Signatures under a blinded key use a Schnorr construction with
//! domain-separated hashing rather than plain Ed25519, so a blinded
//! signature can never be confused with (or replayed as) a standard one.

use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::scalar::{clamp_integer, Scalar};

use crate::constants::{
    KDF_CONTEXT_BLINDED_CHALLENGE, KDF_CONTEXT_BLINDED_NONCE, KDF_CONTEXT_BLINDED_SHARED,
    KDF_CONTEXT_BLINDING_FACTOR, SIGNATURE_SIZE,
};
use crate::crypto;
use crate::error::CryptoError;
use crate::identity::Identity;
use crate::types::AccountId;

/// A keypair valid only within one community server.
#[derive(Clone)]
pub struct BlindedKeyPair {
    secret: Scalar,
    pub public: [u8; 32],
}

impl BlindedKeyPair {
    /// Derive the blinded keypair for `identity` on the server identified by
    /// `server_pubkey`. Deterministic: the same inputs always yield the same
    /// pair.
    pub fn derive(identity: &Identity, server_pubkey: &[u8; 32]) -> Self {
        let k = blinding_factor(server_pubkey);
        let a = Scalar::from_bytes_mod_order(clamp_integer(identity.x25519_secret_bytes()));
        let secret = k * a;
        let public = (ED25519_BASEPOINT_TABLE * &secret).compress().to_bytes();
        Self { secret, public }
    }

    pub fn account_id(&self) -> AccountId {
        AccountId::blinded15(self.public)
    }

    /// Schnorr-style signature under the blinded key: `R || s`, 64 bytes.
    ///
    /// The nonce is derived deterministically from the secret and message,
    /// so signing never needs an RNG and cannot reuse a nonce.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let r = Scalar::from_bytes_mod_order_wide(&crypto::derive_wide(
            KDF_CONTEXT_BLINDED_NONCE,
            &[&self.secret.to_bytes(), &self.public, message],
        ));
        let big_r = (ED25519_BASEPOINT_TABLE * &r).compress();

        let c = challenge(big_r.as_bytes(), &self.public, message);
        let s = r + c * self.secret;

        let mut sig = [0u8; SIGNATURE_SIZE];
        sig[..32].copy_from_slice(big_r.as_bytes());
        sig[32..].copy_from_slice(&s.to_bytes());
        sig
    }
}

/// The deterministic blinding factor for a server.
pub fn blinding_factor(server_pubkey: &[u8; 32]) -> Scalar {
    Scalar::from_bytes_mod_order_wide(&crypto::derive_wide(
        KDF_CONTEXT_BLINDING_FACTOR,
        &[server_pubkey],
    ))
}

fn challenge(big_r: &[u8], public: &[u8; 32], message: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order_wide(&crypto::derive_wide(
        KDF_CONTEXT_BLINDED_CHALLENGE,
        &[big_r, public, message],
    ))
}

/// Verify a blinded signature produced by [`BlindedKeyPair::sign`].
pub fn verify_blinded(
    public: &[u8; 32],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    if signature.len() != SIGNATURE_SIZE {
        return Err(CryptoError::InvalidSignature);
    }
    let (big_r_bytes, s_bytes) = signature.split_at(32);

    let mut s_arr = [0u8; 32];
    s_arr.copy_from_slice(s_bytes);
    let s = Option::<Scalar>::from(Scalar::from_canonical_bytes(s_arr))
        .ok_or(CryptoError::InvalidSignature)?;

    let a_point = CompressedEdwardsY::from_slice(public)
        .map_err(|_| CryptoError::InvalidKey)?
        .decompress()
        .ok_or(CryptoError::InvalidKey)?;

    let c = challenge(big_r_bytes, public, message);

    // R' = s*B - c*A must equal the R carried in the signature.
    let expected =
        curve25519_dalek::edwards::EdwardsPoint::vartime_double_scalar_mul_basepoint(
            &-c, &a_point, &s,
        );

    if expected.compress().as_bytes() == big_r_bytes {
        Ok(())
    } else {
        Err(CryptoError::InvalidSignature)
    }
}

/// Encrypt a pseudonymous direct message to another blinded id on the same
/// server. Both ends derive `ka * kB == kb * kA`, so only the two blinded
/// keys can read it.
pub fn seal_to_blinded(
    plaintext: &[u8],
    sender: &BlindedKeyPair,
    recipient_public: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    let key = blinded_shared_key(&sender.secret, &sender.public, recipient_public, true)?;
    crypto::encrypt(&key, plaintext)
}

/// Open a pseudonymous direct message addressed to our blinded id.
pub fn open_from_blinded(
    data: &[u8],
    recipient: &BlindedKeyPair,
    sender_public: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    let key = blinded_shared_key(&recipient.secret, &recipient.public, sender_public, false)?;
    crypto::decrypt(&key, data)
}

fn blinded_shared_key(
    own_secret: &Scalar,
    own_public: &[u8; 32],
    other_public: &[u8; 32],
    we_are_sender: bool,
) -> Result<[u8; 32], CryptoError> {
    let other_point = CompressedEdwardsY::from_slice(other_public)
        .map_err(|_| CryptoError::InvalidKey)?
        .decompress()
        .ok_or(CryptoError::InvalidKey)?;
    let shared = (own_secret * other_point).compress();

    // Key input order is always (sender_pub, recipient_pub).
    let (sender_pub, recipient_pub) = if we_are_sender {
        (own_public, other_public)
    } else {
        (other_public, own_public)
    };
    Ok(crypto::derive_key(
        KDF_CONTEXT_BLINDED_SHARED,
        &[shared.as_bytes(), sender_pub, recipient_pub],
    ))
}
