use thiserror::Error;

use umbra_net::{ErrorClass, NetError};
use umbra_shared::{AccountId, CryptoError, ProtocolError};

/// Errors surfaced by the client orchestration layer.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Store(#[from] umbra_store::StoreError),

    #[error(transparent)]
    Config(#[from] umbra_config::ConfigError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The operation requires admin rights on the group.
    #[error("Not an admin of group {0}")]
    NotAdmin(AccountId),

    /// The group has no encryption key yet, so nothing can be sealed to it.
    #[error("No encryption key known for group {0}")]
    NoGroupKey(AccountId),

    /// A key rotation for this group is already distributing.
    #[error("Key rotation already in progress for group {0}")]
    RotationInProgress(AccountId),

    /// No community row matches the given key.
    #[error("Unknown community: {0}")]
    UnknownCommunity(String),

    /// The caller tried to send a message with neither body nor attachments.
    #[error("Message has no content")]
    EmptyMessage,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// Classify for retry handling, extending [`NetError::classify`] to the
    /// local error kinds.
    ///
    /// Store errors are transient: the database may be briefly locked, and
    /// retrying a job against it is harmless. Everything protocol-shaped is
    /// terminal, since re-running cannot make bad bytes good.
    pub fn classify(&self) -> ErrorClass {
        match self {
            ClientError::Net(e) => e.classify(),
            ClientError::Store(_) | ClientError::RotationInProgress(_) => ErrorClass::Transient,
            ClientError::Config(_)
            | ClientError::Crypto(_)
            | ClientError::Protocol(_)
            | ClientError::NotAdmin(_)
            | ClientError::NoGroupKey(_)
            | ClientError::UnknownCommunity(_)
            | ClientError::EmptyMessage
            | ClientError::Serialization(_) => ErrorClass::Terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.classify() == ErrorClass::Terminal
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;

pub(crate) fn to_bytes<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| ClientError::Serialization(e.to_string()))
}

pub(crate) fn from_bytes<'a, T: serde::Deserialize<'a>>(data: &'a [u8]) -> Result<T> {
    bincode::deserialize(data).map_err(|e| ClientError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_classification_passes_through() {
        let error = ClientError::Net(NetError::ClockOutOfSync);
        assert_eq!(error.classify(), ErrorClass::Terminal);

        let error = ClientError::Net(NetError::Status {
            status: 500,
            body: String::new(),
        });
        assert_eq!(error.classify(), ErrorClass::Transient);
    }

    #[test]
    fn local_errors_are_classified() {
        let group = AccountId::standard([1; 32]);
        assert_eq!(
            ClientError::NotAdmin(group).classify(),
            ErrorClass::Terminal
        );
        assert_eq!(
            ClientError::Store(umbra_store::StoreError::NotFound).classify(),
            ErrorClass::Transient
        );
        assert_eq!(
            ClientError::Crypto(CryptoError::DecryptionFailed).classify(),
            ErrorClass::Terminal
        );
    }
}
