//! Message send and receive pipelines.
//!
//! Sending persists the message locally first, then hands delivery to a
//! durable job so it survives restarts and flaky links. Receiving unseals
//! the transport envelope, decodes the protocol [`Content`], and applies it
//! to the store.
//!
//! [`Content`]: umbra_shared::protocol::Content

pub mod receive;
pub mod send;

pub use receive::{ProcessedMessage, ReceivePipeline};
pub use send::{OutgoingAttachment, SendPipeline};

use serde::{Deserialize, Serialize};

use umbra_shared::AccountId;

/// Where a message is going. Determines the sealing scheme and the store
/// endpoint the delivery job talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// One-to-one, sealed to the contact's identity key.
    Contact(AccountId),
    /// Group swarm, sealed to the current group encryption key.
    Group(AccountId),
    /// Public community room, signed under the server-blinded id.
    CommunityRoom { community_key: String },
    /// Direct message relayed through a community server.
    CommunityInbox {
        community_key: String,
        recipient: AccountId,
    },
}

impl Destination {
    /// The local thread the message belongs to.
    pub fn thread_id(&self) -> String {
        match self {
            Destination::Contact(id) | Destination::Group(id) => id.to_hex(),
            Destination::CommunityRoom { community_key }
            | Destination::CommunityInbox { community_key, .. } => community_key.clone(),
        }
    }
}
