//! Durable background jobs.
//!
//! A job is a persisted row describing work that must survive restarts:
//! sending a message, pushing a config snapshot, delivering a group invite
//! or promotion. The [`runner::JobRunner`] loads due rows, dispatches them
//! to the registered per-variant executor, and applies the retry policy.
//! Rows are deleted only on success or permanent failure.

pub mod config_sync;
pub mod group_invite;
pub mod group_promote;
pub mod message_send;
pub mod runner;

pub use runner::{JobRunner, JobSpec};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use umbra_shared::{AccountId, ConfigNamespace};
use umbra_store::Job;

use crate::error::Result;
use crate::pipeline::Destination;

pub const VARIANT_MESSAGE_SEND: &str = "message_send";
pub const VARIANT_CONFIG_SYNC: &str = "config_sync";
pub const VARIANT_GROUP_INVITE: &str = "group_invite";
pub const VARIANT_GROUP_PROMOTE: &str = "group_promote";

/// Attempt budget for ordinary message sends.
pub const MESSAGE_SEND_MAX_FAILURES: u32 = 10;
/// Attempt budget for config pushes.
pub const CONFIG_SYNC_MAX_FAILURES: u32 = 10;
/// Invites and promotions get one retry at the job layer; further retries
/// are an explicit user action.
pub const GROUP_OP_MAX_FAILURES: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSendDetails {
    pub destination: Destination,
    /// Serialized [`Content`](umbra_shared::protocol::Content). Sealed at
    /// execution time so each attempt uses a fresh nonce and the current
    /// group key.
    pub content: Vec<u8>,
    /// Local message row to move through Sending → Sent/Failed. Control
    /// messages (receipts) have none.
    pub message_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfigSyncDetails {
    pub owner: AccountId,
    pub namespace: ConfigNamespace,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GroupInviteDetails {
    pub group: AccountId,
    pub member: AccountId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GroupPromoteDetails {
    pub group: AccountId,
    pub member: AccountId,
}

/// What an executor run produced, other than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    /// Not ready yet; reschedule without counting a failure.
    Deferred,
}

/// Runs one job variant.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    fn variant(&self) -> &'static str;

    async fn run(&self, job: &Job) -> Result<JobOutcome>;

    /// Called once when the job fails terminally, before the row is
    /// deleted. Executors mark messages failed, flip role statuses, etc.
    async fn on_permanent_failure(&self, _job: &Job) -> Result<()> {
        Ok(())
    }
}

/// Lifecycle callbacks surfaced as a broadcast stream.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Succeeded {
        id: Uuid,
        variant: String,
    },
    Failed {
        id: Uuid,
        variant: String,
        permanent: bool,
    },
    Deferred {
        id: Uuid,
        variant: String,
    },
}
