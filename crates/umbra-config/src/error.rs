use thiserror::Error;
use umbra_shared::ConfigNamespace;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Crypto(#[from] umbra_shared::CryptoError),

    #[error("delta for wrong namespace: expected {expected:?}, got {got:?}")]
    NamespaceMismatch {
        expected: ConfigNamespace,
        got: ConfigNamespace,
    },
}
