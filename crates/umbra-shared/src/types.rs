use serde::{Deserialize, Serialize};

use crate::constants::ACCOUNT_ID_SIZE;
use crate::error::ProtocolError;

/// First byte of an account id, identifying how the trailing public key was
/// derived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum IdPrefix {
    /// The user's real X25519 public key; the address of their swarm.
    Standard = 0x05,
    /// Per-server pseudonymous key, first-generation blinding.
    Blinded15 = 0x15,
    /// Per-server pseudonymous key, second-generation blinding.
    Blinded25 = 0x25,
}

impl IdPrefix {
    pub fn from_byte(b: u8) -> Result<Self, ProtocolError> {
        match b {
            0x05 => Ok(Self::Standard),
            0x15 => Ok(Self::Blinded15),
            0x25 => Ok(Self::Blinded25),
            other => Err(ProtocolError::UnknownPrefix(other)),
        }
    }
}

/// A public-key-derived identifier: one prefix byte plus a 32-byte key.
///
/// Immutable once created. A standard id doubles as the address of the
/// owner's swarm; blinded ids exist only within the community server they
/// were derived for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId {
    pub prefix: IdPrefix,
    pub key: [u8; 32],
}

impl AccountId {
    pub fn standard(key: [u8; 32]) -> Self {
        Self {
            prefix: IdPrefix::Standard,
            key,
        }
    }

    pub fn blinded15(key: [u8; 32]) -> Self {
        Self {
            prefix: IdPrefix::Blinded15,
            key,
        }
    }

    pub fn blinded25(key: [u8; 32]) -> Self {
        Self {
            prefix: IdPrefix::Blinded25,
            key,
        }
    }

    pub fn is_standard(&self) -> bool {
        self.prefix == IdPrefix::Standard
    }

    pub fn is_blinded(&self) -> bool {
        matches!(self.prefix, IdPrefix::Blinded15 | IdPrefix::Blinded25)
    }

    pub fn to_bytes(&self) -> [u8; ACCOUNT_ID_SIZE] {
        let mut out = [0u8; ACCOUNT_ID_SIZE];
        out[0] = self.prefix as u8;
        out[1..].copy_from_slice(&self.key);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != ACCOUNT_ID_SIZE {
            return Err(ProtocolError::InvalidAccountId(format!(
                "expected {} bytes, got {}",
                ACCOUNT_ID_SIZE,
                bytes.len()
            )));
        }
        let prefix = IdPrefix::from_byte(bytes[0])?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[1..]);
        Ok(Self { prefix, key })
    }

    /// Hex string form: 66 characters, prefix byte first.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, ProtocolError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| ProtocolError::InvalidAccountId(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Storage namespaces within a swarm. Each config namespace owns exactly one
/// authoritative config object per identity; the message namespaces hold
/// sealed envelopes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigNamespace {
    /// Direct messages addressed to the identity.
    Default,
    /// The owner's name and picture.
    UserProfile,
    /// The owner's contact list.
    Contacts,
    /// Groups and communities the owner participates in.
    UserGroups,
    /// Messages addressed to a group.
    GroupMessages,
    /// A group's name, description, and picture.
    GroupInfo,
    /// A group's member roster.
    GroupMembers,
    /// A group's encryption key history.
    GroupKeys,
}

impl ConfigNamespace {
    /// The integer the storage network files this namespace under.
    pub fn value(self) -> i32 {
        match self {
            Self::Default => 0,
            Self::UserProfile => 2,
            Self::Contacts => 3,
            Self::UserGroups => 5,
            Self::GroupMessages => 11,
            Self::GroupInfo => 12,
            Self::GroupMembers => 13,
            Self::GroupKeys => 14,
        }
    }

    pub fn from_value(value: i32) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Default),
            2 => Ok(Self::UserProfile),
            3 => Ok(Self::Contacts),
            5 => Ok(Self::UserGroups),
            11 => Ok(Self::GroupMessages),
            12 => Ok(Self::GroupInfo),
            13 => Ok(Self::GroupMembers),
            14 => Ok(Self::GroupKeys),
            other => Err(ProtocolError::UnknownNamespace(other)),
        }
    }

    /// True for namespaces carrying encrypted config deltas rather than
    /// sealed message envelopes.
    pub fn is_config(self) -> bool {
        !matches!(self, Self::Default | Self::GroupMessages)
    }

    /// Namespaces polled from the owner's own swarm.
    pub fn user_namespaces() -> &'static [ConfigNamespace] {
        &[
            Self::Default,
            Self::UserProfile,
            Self::Contacts,
            Self::UserGroups,
        ]
    }

    /// Namespaces polled from a group's swarm.
    pub fn group_namespaces() -> &'static [ConfigNamespace] {
        &[
            Self::GroupMessages,
            Self::GroupInfo,
            Self::GroupMembers,
            Self::GroupKeys,
        ]
    }
}

/// A member's role within a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GroupRole {
    Admin,
    Standard,
    /// Removed by consensus but not yet cryptographically purged.
    Zombie,
}

/// Delivery state of the invite or promotion that put a member in its role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GroupRoleStatus {
    Pending,
    Accepted,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_hex_roundtrip() {
        let id = AccountId::standard([0x42; 32]);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 66);
        assert!(hex.starts_with("05"));
        assert_eq!(AccountId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn account_id_rejects_bad_prefix() {
        let mut bytes = [0u8; 33];
        bytes[0] = 0x99;
        assert!(AccountId::from_bytes(&bytes).is_err());
    }

    #[test]
    fn account_id_rejects_bad_length() {
        assert!(AccountId::from_hex("05abcd").is_err());
    }

    #[test]
    fn blinded_ids_are_blinded() {
        assert!(AccountId::blinded15([1; 32]).is_blinded());
        assert!(AccountId::blinded25([1; 32]).is_blinded());
        assert!(!AccountId::standard([1; 32]).is_blinded());
    }

    #[test]
    fn namespace_values_roundtrip() {
        for ns in [
            ConfigNamespace::Default,
            ConfigNamespace::UserProfile,
            ConfigNamespace::Contacts,
            ConfigNamespace::UserGroups,
            ConfigNamespace::GroupMessages,
            ConfigNamespace::GroupInfo,
            ConfigNamespace::GroupMembers,
            ConfigNamespace::GroupKeys,
        ] {
            assert_eq!(ConfigNamespace::from_value(ns.value()).unwrap(), ns);
        }
        assert!(ConfigNamespace::from_value(99).is_err());
    }

    #[test]
    fn config_namespaces_flagged() {
        assert!(ConfigNamespace::Contacts.is_config());
        assert!(!ConfigNamespace::Default.is_config());
        assert!(!ConfigNamespace::GroupMessages.is_config());
    }
}
