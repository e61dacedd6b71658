//! # umbra-shared
//!
//! Identity, crypto primitives, and wire protocol types shared by every
//! Umbra crate.
//!
//! - [`identity`] — the user's long-term Ed25519 keypair and its X25519 form
//! - [`envelope`] — the direct-message sealed envelope (sign, then seal to
//!   the recipient's X25519 key)
//! - [`blinding`] — per-server pseudonymous keypairs and their tweaked
//!   Schnorr signatures
//! - [`protocol`] — the decoded message content exchanged between clients
//! - [`types`] — account ids, storage namespaces, roles

pub mod blinding;
pub mod constants;
pub mod crypto;
pub mod envelope;
pub mod identity;
pub mod protocol;
pub mod types;

mod error;

pub use error::{CryptoError, ProtocolError, UmbraError};
pub use identity::Identity;
pub use types::{AccountId, ConfigNamespace, GroupRole, GroupRoleStatus, IdPrefix};
