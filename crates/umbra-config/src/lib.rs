//! # umbra-config
//!
//! Synchronized state objects, one per [`ConfigNamespace`]: contacts, the
//! user's own profile, the user's group/community list, and per-group
//! info/members/keys.
//!
//! Every object follows the same lifecycle: local writes mark it dirty,
//! [`ConfigObject::push`] serializes a complete snapshot for the network,
//! [`ConfigObject::confirm_pushed`] clears the dirty flag once the push is
//! acknowledged, and [`ConfigObject::merge`] folds incoming remote snapshots
//! into local state field by field, last-writer-wins.
//!
//! [`ConfigNamespace`]: umbra_shared::ConfigNamespace

pub mod contacts;
pub mod group_info;
pub mod group_keys;
pub mod group_members;
pub mod lww;
pub mod message;
pub mod object;
pub mod user_groups;
pub mod user_profile;

mod error;

pub use contacts::{ContactChanges, ContactEntry, ContactsConfig};
pub use error::ConfigError;
pub use group_info::GroupInfoConfig;
pub use group_keys::{GroupKeyEntry, GroupKeysConfig};
pub use group_members::{GroupMemberChanges, GroupMemberEntry, GroupMembersConfig};
pub use message::ConfigMessage;
pub use object::{ConfigDelta, ConfigObject, PendingPush};
pub use user_groups::{UserGroupChanges, UserGroupsConfig};
pub use user_profile::UserProfileConfig;
