//! Persistence for serialized config objects.
//!
//! Each `(namespace, owner)` pair holds at most one dump: the full
//! serialized state of a config object, written after every local mutation
//! or merge so a restart resumes from the latest state.

use chrono::{DateTime, Utc};
use rusqlite::params;
use umbra_shared::AccountId;

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Store the current dump for a config object, replacing any previous
    /// one.
    pub fn save_config_dump(
        &self,
        namespace: i32,
        owner: &AccountId,
        dump: &[u8],
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO config_dumps (namespace, owner, dump, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (namespace, owner) DO UPDATE SET
                 dump = excluded.dump,
                 updated_at = excluded.updated_at",
            params![namespace, owner.to_hex(), dump, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Load the dump for a config object.
    pub fn load_config_dump(&self, namespace: i32, owner: &AccountId) -> Result<Vec<u8>> {
        self.conn()
            .query_row(
                "SELECT dump FROM config_dumps WHERE namespace = ?1 AND owner = ?2",
                params![namespace, owner.to_hex()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Delete every dump belonging to `owner`. Used when a group is left or
    /// destroyed.
    pub fn delete_config_dumps_for_owner(&self, owner: &AccountId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM config_dumps WHERE owner = ?1",
            params![owner.to_hex()],
        )?;
        Ok(affected)
    }
}
