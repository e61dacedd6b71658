//! # umbra-store
//!
//! Local storage for the Umbra client, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model: contacts, conversation threads, groups and their key history,
//! communities, messages, attachments, durable jobs, config dumps, and the
//! swarm retrieval cursors.

pub mod attachments;
pub mod communities;
pub mod config_dumps;
pub mod contacts;
pub mod cursors;
pub mod database;
pub mod group_keys;
pub mod group_members;
pub mod groups;
pub mod identity;
pub mod jobs;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod threads;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
