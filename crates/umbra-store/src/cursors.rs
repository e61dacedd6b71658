//! Poll cursors and duplicate suppression.
//!
//! `last_hashes` remembers the newest message hash retrieved per
//! `(target, namespace)` so polls only ask for what is new. `seen_messages`
//! records every processed hash so redelivered messages are dropped.

use chrono::{DateTime, Utc};
use rusqlite::params;
use umbra_shared::AccountId;

use crate::database::Database;
use crate::error::Result;

impl Database {
    // ------------------------------------------------------------------
    // Retrieval cursors
    // ------------------------------------------------------------------

    /// Remember the hash of the newest message retrieved for a namespace.
    pub fn set_last_hash(&self, target: &AccountId, namespace: i32, hash: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO last_hashes (target, namespace, last_hash)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (target, namespace) DO UPDATE SET last_hash = excluded.last_hash",
            params![target.to_hex(), namespace, hash],
        )?;
        Ok(())
    }

    /// The stored cursor for a namespace, or `None` on the first poll.
    pub fn last_hash(&self, target: &AccountId, namespace: i32) -> Result<Option<String>> {
        let result = self.conn().query_row(
            "SELECT last_hash FROM last_hashes WHERE target = ?1 AND namespace = ?2",
            params![target.to_hex(), namespace],
            |row| row.get(0),
        );
        match result {
            Ok(hash) => Ok(Some(hash)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(other.into()),
        }
    }

    /// Drop all cursors for a target, forcing the next poll to start over.
    pub fn clear_last_hashes(&self, target: &AccountId) -> Result<()> {
        self.conn().execute(
            "DELETE FROM last_hashes WHERE target = ?1",
            params![target.to_hex()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Seen-message dedup
    // ------------------------------------------------------------------

    /// Record a message hash as processed. Returns `false` if the hash was
    /// already present, meaning the message is a redelivery.
    pub fn mark_seen(&self, hash: &str, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO seen_messages (hash, seen_at) VALUES (?1, ?2)",
            params![hash, now.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Delete seen-message records older than `cutoff`. Returns how many
    /// rows were pruned.
    pub fn prune_seen(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM seen_messages WHERE seen_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_shared::Identity;

    #[test]
    fn last_hash_upserts_per_namespace() {
        let db = Database::open_in_memory().unwrap();
        let target = Identity::generate().account_id();

        assert!(db.last_hash(&target, 0).unwrap().is_none());

        db.set_last_hash(&target, 0, "aaa").unwrap();
        db.set_last_hash(&target, 5, "bbb").unwrap();
        db.set_last_hash(&target, 0, "ccc").unwrap();

        assert_eq!(db.last_hash(&target, 0).unwrap().as_deref(), Some("ccc"));
        assert_eq!(db.last_hash(&target, 5).unwrap().as_deref(), Some("bbb"));

        db.clear_last_hashes(&target).unwrap();
        assert!(db.last_hash(&target, 0).unwrap().is_none());
        assert!(db.last_hash(&target, 5).unwrap().is_none());
    }

    #[test]
    fn mark_seen_detects_redelivery() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        assert!(db.mark_seen("h1", now).unwrap());
        assert!(!db.mark_seen("h1", now).unwrap());
        assert!(db.mark_seen("h2", now).unwrap());
    }

    #[test]
    fn prune_seen_removes_only_old_entries() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let old = now - chrono::Duration::days(30);

        db.mark_seen("old", old).unwrap();
        db.mark_seen("new", now).unwrap();

        let pruned = db.prune_seen(now - chrono::Duration::days(14)).unwrap();
        assert_eq!(pruned, 1);
        assert!(!db.mark_seen("new", now).unwrap());
        assert!(db.mark_seen("old", now).unwrap());
    }
}
