use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::types::AccountId;

/// The decrypted payload carried inside every message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Content {
    /// A user-visible chat message
    Visible(VisibleMessage),

    /// Invitation into a group, carrying its current secret material
    GroupInvite(GroupInvite),

    /// Promotion of a member to admin
    GroupPromote(GroupPromote),

    /// A rotated group encryption keypair
    GroupKeyUpdate(GroupKeyUpdate),

    /// A member announcing it has left the group
    GroupMemberLeft(GroupMemberLeft),

    /// Read receipt for previously delivered messages
    ReadReceipt(ReadReceipt),
}

/// A chat message as composed by the sender
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibleMessage {
    /// Message UUID for deduplication
    pub message_id: Uuid,
    /// Text body, absent for attachment-only messages
    pub body: Option<String>,
    /// Ids of attachments already uploaded to the recipient-reachable store
    pub attachment_ids: Vec<Uuid>,
    /// Sender profile piggybacked on the message, if it changed recently
    pub profile: Option<ProfileUpdate>,
    /// Sender clock at composition time (unix millis)
    pub sent_at_ms: u64,
}

/// Profile fields a sender attaches to outgoing messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: String,
    pub picture_url: Option<String>,
    /// Key for the encrypted profile picture blob
    pub picture_key: Option<Vec<u8>>,
}

/// Everything a new member needs to participate in a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInvite {
    pub group: AccountId,
    pub name: String,
    /// Current group encryption keypair
    pub encryption_public: [u8; 32],
    pub encryption_secret: [u8; 32],
    pub members: Vec<AccountId>,
    pub admins: Vec<AccountId>,
    pub invited_at_ms: u64,
}

/// Grants admin rights by sharing the group's identity seed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupPromote {
    pub group: AccountId,
    pub identity_seed: [u8; 32],
}

/// Distributed to remaining members when the group key rotates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupKeyUpdate {
    pub group: AccountId,
    pub public_key: [u8; 32],
    pub secret_key: [u8; 32],
    pub rotated_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMemberLeft {
    pub group: AccountId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    /// `sent_at_ms` values of the messages being acknowledged
    pub timestamps: Vec<u64>,
}

impl Content {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(data).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}
