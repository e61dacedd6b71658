use thiserror::Error;

#[derive(Error, Debug)]
pub enum UmbraError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key bytes")]
    InvalidKey,

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Envelope too short or malformed")]
    MalformedEnvelope,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid account id: {0}")]
    InvalidAccountId(String),

    #[error("Unknown id prefix: {0:#04x}")]
    UnknownPrefix(u8),

    #[error("Unknown storage namespace: {0}")]
    UnknownNamespace(i32),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Message exceeds maximum size ({size} > {max} bytes)")]
    MessageTooLarge { size: usize, max: usize },
}
