//! CRUD operations for [`Group`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use umbra_shared::AccountId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Group;

impl Database {
    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Insert a group, or update its name if it already exists.
    pub fn upsert_group(&self, group: &Group) -> Result<()> {
        self.conn().execute(
            "INSERT INTO groups (id, name, identity_seed, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![
                group.id.to_hex(),
                group.name,
                group.identity_seed.map(|s| s.to_vec()),
                group.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Record the group identity seed after a promotion to admin.
    pub fn set_group_identity_seed(&self, id: &AccountId, seed: &[u8; 32]) -> Result<()> {
        self.conn().execute(
            "UPDATE groups SET identity_seed = ?2 WHERE id = ?1",
            params![id.to_hex(), seed.to_vec()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single group by account id.
    pub fn get_group(&self, id: &AccountId) -> Result<Group> {
        self.conn()
            .query_row(
                "SELECT id, name, identity_seed, created_at
                 FROM groups
                 WHERE id = ?1",
                params![id.to_hex()],
                row_to_group,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List all groups, ordered by creation date descending.
    pub fn list_groups(&self) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, identity_seed, created_at
             FROM groups
             ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([], row_to_group)?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        Ok(groups)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a group and, via cascade, its members and key history.
    /// Returns `true` if a row was deleted.
    pub fn delete_group(&self, id: &AccountId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM groups WHERE id = ?1", params![id.to_hex()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Group`].
fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let seed_blob: Option<Vec<u8>> = row.get(2)?;
    let created_str: String = row.get(3)?;

    let id = AccountId::from_hex(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let identity_seed = match seed_blob {
        Some(blob) => Some(<[u8; 32]>::try_from(blob.as_slice()).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Blob,
                format!("identity seed must be 32 bytes, got {}", blob.len()).into(),
            )
        })?),
        None => None,
    };

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Group {
        id,
        name,
        identity_seed,
        created_at,
    })
}
