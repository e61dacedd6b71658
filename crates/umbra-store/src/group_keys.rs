//! CRUD operations for [`GroupKeyPair`] records.
//!
//! Multiple keypairs coexist per group while a rotation propagates; readers
//! fetch them newest-first for trial decryption.

use chrono::{DateTime, Utc};
use rusqlite::params;
use umbra_shared::AccountId;

use crate::database::Database;
use crate::error::Result;
use crate::models::GroupKeyPair;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Record a keypair.  Returns `true` if it was new.
    pub fn insert_group_key_pair(&self, pair: &GroupKeyPair) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO group_key_pairs
                 (group_id, public_key, secret_key, received_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                pair.group_id.to_hex(),
                hex::encode(pair.public_key),
                pair.secret_key.to_vec(),
                pair.received_at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// All keypairs for a group, most recently received first.
    pub fn list_group_key_pairs(&self, group_id: &AccountId) -> Result<Vec<GroupKeyPair>> {
        let mut stmt = self.conn().prepare(
            "SELECT group_id, public_key, secret_key, received_at
             FROM group_key_pairs
             WHERE group_id = ?1
             ORDER BY received_at DESC, public_key DESC",
        )?;

        let rows = stmt.query_map(params![group_id.to_hex()], row_to_key_pair)?;

        let mut pairs = Vec::new();
        for row in rows {
            pairs.push(row?);
        }
        Ok(pairs)
    }

    /// The keypair new messages should be encrypted under.
    pub fn current_group_key_pair(&self, group_id: &AccountId) -> Result<Option<GroupKeyPair>> {
        Ok(self.list_group_key_pairs(group_id)?.into_iter().next())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete one keypair.  Returns `true` if a row was deleted.
    pub fn delete_group_key_pair(&self, group_id: &AccountId, public_key: &[u8; 32]) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM group_key_pairs WHERE group_id = ?1 AND public_key = ?2",
            params![group_id.to_hex(), hex::encode(public_key)],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`GroupKeyPair`].
fn row_to_key_pair(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupKeyPair> {
    let group_str: String = row.get(0)?;
    let public_hex: String = row.get(1)?;
    let secret_blob: Vec<u8> = row.get(2)?;
    let received_str: String = row.get(3)?;

    let group_id = AccountId::from_hex(&group_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let public_vec = hex::decode(&public_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let public_key = <[u8; 32]>::try_from(public_vec.as_slice()).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("public key must be 32 bytes, got {}", public_vec.len()).into(),
        )
    })?;
    let secret_key = <[u8; 32]>::try_from(secret_blob.as_slice()).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Blob,
            format!("secret key must be 32 bytes, got {}", secret_blob.len()).into(),
        )
    })?;

    let received_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&received_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(GroupKeyPair {
        group_id,
        public_key,
        secret_key,
        received_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Group;

    fn group_id() -> AccountId {
        AccountId::standard([7u8; 32])
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_group(&Group {
            id: group_id(),
            name: "g".into(),
            identity_seed: None,
            created_at: Utc::now(),
        })
        .unwrap();
        db
    }

    #[test]
    fn newest_key_pair_listed_first() {
        let db = setup();
        let early = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2026-02-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        db.insert_group_key_pair(&GroupKeyPair {
            group_id: group_id(),
            public_key: [1u8; 32],
            secret_key: [10u8; 32],
            received_at: early,
        })
        .unwrap();
        db.insert_group_key_pair(&GroupKeyPair {
            group_id: group_id(),
            public_key: [2u8; 32],
            secret_key: [20u8; 32],
            received_at: late,
        })
        .unwrap();

        let pairs = db.list_group_key_pairs(&group_id()).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].public_key, [2u8; 32]);
        assert_eq!(
            db.current_group_key_pair(&group_id()).unwrap().unwrap().public_key,
            [2u8; 32]
        );
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let db = setup();
        let pair = GroupKeyPair {
            group_id: group_id(),
            public_key: [1u8; 32],
            secret_key: [10u8; 32],
            received_at: Utc::now(),
        };
        assert!(db.insert_group_key_pair(&pair).unwrap());
        assert!(!db.insert_group_key_pair(&pair).unwrap());
    }
}
