//! CRUD operations for [`Community`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Community;

impl Database {
    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Insert a community, or update its capability list.
    pub fn upsert_community(&self, community: &Community) -> Result<()> {
        let capabilities = serde_json::to_string(&community.capabilities)?;
        self.conn().execute(
            "INSERT INTO communities
                 (key, server_url, room, server_pubkey, capabilities,
                  last_message_id, last_inbox_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(key) DO UPDATE SET capabilities = excluded.capabilities",
            params![
                community.key,
                community.server_url,
                community.room,
                hex::encode(community.server_pubkey),
                capabilities,
                community.last_message_id,
                community.last_inbox_id,
                community.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Replace the stored capability strings after a capabilities fetch.
    pub fn set_community_capabilities(&self, key: &str, capabilities: &[String]) -> Result<()> {
        let json = serde_json::to_string(capabilities)?;
        self.conn().execute(
            "UPDATE communities SET capabilities = ?2 WHERE key = ?1",
            params![key, json],
        )?;
        Ok(())
    }

    /// Advance the room and inbox poll cursors.
    pub fn set_community_cursors(
        &self,
        key: &str,
        last_message_id: i64,
        last_inbox_id: i64,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE communities SET last_message_id = ?2, last_inbox_id = ?3 WHERE key = ?1",
            params![key, last_message_id, last_inbox_id],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single community by its normalized key.
    pub fn get_community(&self, key: &str) -> Result<Community> {
        self.conn()
            .query_row(
                "SELECT key, server_url, room, server_pubkey, capabilities,
                        last_message_id, last_inbox_id, created_at
                 FROM communities
                 WHERE key = ?1",
                params![key],
                row_to_community,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List all joined communities.
    pub fn list_communities(&self) -> Result<Vec<Community>> {
        let mut stmt = self.conn().prepare(
            "SELECT key, server_url, room, server_pubkey, capabilities,
                    last_message_id, last_inbox_id, created_at
             FROM communities
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map([], row_to_community)?;

        let mut communities = Vec::new();
        for row in rows {
            communities.push(row?);
        }
        Ok(communities)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a community.  Returns `true` if a row was deleted.
    pub fn delete_community(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM communities WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Community`].
fn row_to_community(row: &rusqlite::Row<'_>) -> rusqlite::Result<Community> {
    let key: String = row.get(0)?;
    let server_url: String = row.get(1)?;
    let room: String = row.get(2)?;
    let pubkey_hex: String = row.get(3)?;
    let capabilities_json: String = row.get(4)?;
    let last_message_id: i64 = row.get(5)?;
    let last_inbox_id: i64 = row.get(6)?;
    let created_str: String = row.get(7)?;

    let pubkey_vec = hex::decode(&pubkey_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let server_pubkey = <[u8; 32]>::try_from(pubkey_vec.as_slice()).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("server pubkey must be 32 bytes, got {}", pubkey_vec.len()).into(),
        )
    })?;

    let capabilities: Vec<String> = serde_json::from_str(&capabilities_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Community {
        key,
        server_url,
        room,
        server_pubkey,
        capabilities,
        last_message_id,
        last_inbox_id,
        created_at,
    })
}
