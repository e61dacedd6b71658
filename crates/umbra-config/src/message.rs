use serde::{Deserialize, Serialize};
use umbra_shared::constants::KDF_CONTEXT_CONFIG_KEY;
use umbra_shared::{crypto, ConfigNamespace};

use crate::error::ConfigError;
use crate::object;

/// An encrypted config snapshot as it travels through swarm storage.
///
/// The symmetric key is derived from the owner's key material and the
/// namespace, so snapshots for different namespaces never share a key. For
/// group namespaces the material is the group encryption secret; readers
/// who joined after a rotation trial-open with each retained key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMessage {
    pub namespace: ConfigNamespace,
    pub seqno: u64,
    pub sent_at_ms: u64,
    ciphertext: Vec<u8>,
}

impl ConfigMessage {
    pub fn seal(
        namespace: ConfigNamespace,
        seqno: u64,
        plaintext: &[u8],
        key_material: &[u8; 32],
        now_ms: u64,
    ) -> Result<Self, ConfigError> {
        let key = namespace_key(namespace, key_material);
        let ciphertext = crypto::encrypt(&key, plaintext)?;
        Ok(Self {
            namespace,
            seqno,
            sent_at_ms: now_ms,
            ciphertext,
        })
    }

    /// Decrypt the snapshot. Fails with a crypto error when `key_material`
    /// is not the one it was sealed under.
    pub fn open(&self, key_material: &[u8; 32]) -> Result<Vec<u8>, ConfigError> {
        let key = namespace_key(self.namespace, key_material);
        Ok(crypto::decrypt(&key, &self.ciphertext)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        object::to_bytes(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ConfigError> {
        object::from_bytes(data)
    }
}

fn namespace_key(namespace: ConfigNamespace, key_material: &[u8; 32]) -> [u8; 32] {
    crypto::derive_key(
        KDF_CONTEXT_CONFIG_KEY,
        &[key_material, &namespace.value().to_le_bytes()],
    )
}
