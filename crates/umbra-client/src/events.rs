//! Events emitted to the embedding application, and the user-notification
//! boundary.
//!
//! [`ClientEvent`] is a broadcast stream the UI subscribes to; missing an
//! event is never a correctness problem because the store is the source of
//! truth. [`Notifier`] is the fire-and-forget boundary for user-facing
//! toasts and push subscriptions; the core never depends on its result.

use serde::Serialize;
use umbra_shared::{AccountId, GroupRoleStatus};
use uuid::Uuid;

/// State changes worth telling the UI about.
#[derive(Debug, Clone, Serialize)]
pub enum ClientEvent {
    MessageReceived {
        thread_id: String,
        message_id: Uuid,
        sender: AccountId,
    },
    ThreadCreated {
        thread_id: String,
    },
    ThreadDeleted {
        thread_id: String,
    },
    ContactsUpdated {
        changed: Vec<AccountId>,
        removed: Vec<AccountId>,
    },
    ProfileUpdated,
    GroupUpdated {
        group: AccountId,
    },
    GroupKeyRotated {
        group: AccountId,
    },
    MemberStatusChanged {
        group: AccountId,
        member: AccountId,
        status: GroupRoleStatus,
    },
    ReadReceipts {
        thread_id: String,
        timestamps: Vec<u64>,
    },
}

/// A user-facing notification. Delivery and formatting are the embedder's
/// concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserNotification {
    /// Aggregated toast for a burst of failed group invites/promotions.
    GroupOperationFailed {
        group: AccountId,
        members: Vec<AccountId>,
    },
    /// A message reached terminal send failure.
    MessageFailed { thread_id: String },
}

/// Fire-and-forget notification boundary.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: UserNotification);

    /// Register an account id for push notification delivery. Best effort.
    fn subscribe_push(&self, _account: &AccountId) {}
}

/// Discards everything. Used by headless embedders and tests.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: UserNotification) {}
}
