use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::CryptoError;
use crate::types::AccountId;

/// The user's long-term cryptographic identity.
///
/// One Ed25519 keypair underlies everything: signatures use it directly,
/// the standard [`AccountId`] is its X25519 (Montgomery) form, and the
/// per-server blinded ids are derived from it in [`crate::blinding`].
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore an identity from its 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// The 32-byte seed, for persistence.
    pub fn seed(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    /// The standard account id: prefix byte plus the X25519 public key.
    pub fn account_id(&self) -> AccountId {
        AccountId::standard(self.x25519_public_key())
    }

    pub fn ed25519_public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The X25519 form of the public key (Montgomery u-coordinate).
    pub fn x25519_public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_montgomery().to_bytes()
    }

    /// The X25519 private key bytes. Not clamped: X25519 implementations
    /// clamp on use, which yields the scalar behind [`Self::x25519_public_key`].
    pub fn x25519_secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_scalar_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Derive the at-rest database encryption key from the seed.
    pub fn derive_db_key(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new_derive_key(crate::constants::KDF_CONTEXT_DB_KEY);
        hasher.update(self.signing_key.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&hasher.finalize().as_bytes()[..32]);
        key
    }
}

/// Verify an Ed25519 signature against a raw public key.
pub fn verify_signature(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &Signature,
) -> Result<(), CryptoError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| CryptoError::InvalidKey)?;
    verifying_key
        .verify(message, signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_roundtrip() {
        let id = Identity::generate();
        let restored = Identity::from_seed(id.seed());
        assert_eq!(id.account_id(), restored.account_id());
    }

    #[test]
    fn account_id_is_standard() {
        let id = Identity::generate();
        assert!(id.account_id().is_standard());
        assert_eq!(id.account_id().key, id.x25519_public_key());
    }

    #[test]
    fn sign_and_verify() {
        let id = Identity::generate();
        let message = b"swarm retrieval request";
        let signature = id.sign(message);

        assert!(verify_signature(&id.ed25519_public_key(), message, &signature).is_ok());
        assert!(verify_signature(&id.ed25519_public_key(), b"tampered", &signature).is_err());
    }

    #[test]
    fn db_key_is_deterministic() {
        let id = Identity::generate();
        assert_eq!(id.derive_db_key(), id.derive_db_key());
    }

    #[test]
    fn x25519_conversion_matches_dh() {
        // DH between the converted static keys must agree from both sides.
        let a = Identity::generate();
        let b = Identity::generate();

        let ab = x25519_dalek::x25519(a.x25519_secret_bytes(), b.x25519_public_key());
        let ba = x25519_dalek::x25519(b.x25519_secret_bytes(), a.x25519_public_key());
        assert_eq!(ab, ba);
    }
}
