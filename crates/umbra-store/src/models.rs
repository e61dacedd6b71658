//! Domain model structs persisted in the local database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the application layer and embedded in events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use umbra_shared::{AccountId, GroupRole, GroupRoleStatus};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A known contact. The primary key is the account id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: AccountId,
    pub name: String,
    /// Local nickname override; cleared when the contact is deleted remotely.
    pub nickname: Option<String>,
    pub picture_url: Option<String>,
    pub picture_key: Option<Vec<u8>>,
    pub is_approved: bool,
    pub did_approve_me: bool,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Thread
// ---------------------------------------------------------------------------

/// What kind of conversation a thread row represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ThreadKind {
    Direct,
    Group,
    Community,
}

impl ThreadKind {
    pub fn to_i64(self) -> i64 {
        match self {
            ThreadKind::Direct => 0,
            ThreadKind::Group => 1,
            ThreadKind::Community => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(ThreadKind::Direct),
            1 => Some(ThreadKind::Group),
            2 => Some(ThreadKind::Community),
            _ => None,
        }
    }
}

/// A visible conversation. Existence is the visibility bit: hiding a
/// conversation deletes its thread row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thread {
    /// Account id hex for direct/group threads, community key otherwise.
    pub id: String,
    pub kind: ThreadKind,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A group the user participates in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: AccountId,
    pub name: String,
    /// The group identity seed; present only for admins.
    pub identity_seed: Option<[u8; 32]>,
    pub created_at: DateTime<Utc>,
}

/// One member row of a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMember {
    pub group_id: AccountId,
    pub member_id: AccountId,
    pub role: GroupRole,
    pub role_status: GroupRoleStatus,
    pub added_at: DateTime<Utc>,
}

/// A group encryption keypair with rotation bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupKeyPair {
    pub group_id: AccountId,
    pub public_key: [u8; 32],
    pub secret_key: [u8; 32],
    pub received_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Community
// ---------------------------------------------------------------------------

/// A community room on an open server, polled pseudonymously.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Community {
    /// Normalized "server_url/room" key.
    pub key: String,
    pub server_url: String,
    pub room: String,
    pub server_pubkey: [u8; 32],
    /// Capability strings advertised by the server.
    pub capabilities: Vec<String>,
    /// Poll cursor for room messages.
    pub last_message_id: i64,
    /// Poll cursor for the blinded inbox.
    pub last_inbox_id: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Delivery state of a message row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageStatus {
    Received,
    Sending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn to_i64(self) -> i64 {
        match self {
            MessageStatus::Received => 0,
            MessageStatus::Sending => 1,
            MessageStatus::Sent => 2,
            MessageStatus::Failed => 3,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(MessageStatus::Received),
            1 => Some(MessageStatus::Sending),
            2 => Some(MessageStatus::Sent),
            3 => Some(MessageStatus::Failed),
            _ => None,
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: String,
    pub sender: AccountId,
    pub body: Option<String>,
    /// Sender clock at composition time.
    pub sent_at: DateTime<Utc>,
    /// Local clock when the row was written.
    pub received_at: DateTime<Utc>,
    pub is_outgoing: bool,
    pub status: MessageStatus,
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// An attachment blob, uploaded before the owning message is sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: Uuid,
    pub message_id: Option<Uuid>,
    pub remote_url: Option<String>,
    pub key: Option<Vec<u8>>,
    pub size: u64,
    pub uploaded: bool,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A durable retryable unit of work, persisted so app restarts do not lose
/// the intent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub variant: String,
    pub thread_id: Option<String>,
    /// Serialized job payload, interpreted by the matching executor.
    pub details: Vec<u8>,
    pub failure_count: u32,
    pub max_failure_count: u32,
    /// Jobs sharing a uniqueness key are coalesced, never double-run.
    pub uniqueness_key: Option<String>,
    /// Earliest time the next attempt may run; `None` means immediately.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Role conversions (stored as INTEGER columns)
// ---------------------------------------------------------------------------

pub fn role_to_i64(role: GroupRole) -> i64 {
    match role {
        GroupRole::Admin => 0,
        GroupRole::Standard => 1,
        GroupRole::Zombie => 2,
    }
}

pub fn role_from_i64(value: i64) -> Option<GroupRole> {
    match value {
        0 => Some(GroupRole::Admin),
        1 => Some(GroupRole::Standard),
        2 => Some(GroupRole::Zombie),
        _ => None,
    }
}

pub fn role_status_to_i64(status: GroupRoleStatus) -> i64 {
    match status {
        GroupRoleStatus::Pending => 0,
        GroupRoleStatus::Accepted => 1,
        GroupRoleStatus::Failed => 2,
    }
}

pub fn role_status_from_i64(value: i64) -> Option<GroupRoleStatus> {
    match value {
        0 => Some(GroupRoleStatus::Pending),
        1 => Some(GroupRoleStatus::Accepted),
        2 => Some(GroupRoleStatus::Failed),
        _ => None,
    }
}
