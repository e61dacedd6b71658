//! CRUD operations for [`Attachment`] records.

use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Attachment;

impl Database {
    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Insert a new attachment row.
    pub fn insert_attachment(&self, attachment: &Attachment) -> Result<()> {
        self.conn().execute(
            "INSERT INTO attachments (id, message_id, remote_url, key, size, uploaded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                attachment.id.to_string(),
                attachment.message_id.map(|m| m.to_string()),
                attachment.remote_url,
                attachment.key,
                attachment.size as i64,
                attachment.uploaded,
            ],
        )?;
        Ok(())
    }

    /// Tie an attachment to the message that carries it.
    pub fn link_attachment(&self, id: Uuid, message_id: Uuid) -> Result<()> {
        self.conn().execute(
            "UPDATE attachments SET message_id = ?2 WHERE id = ?1",
            params![id.to_string(), message_id.to_string()],
        )?;
        Ok(())
    }

    /// Record a completed upload.
    pub fn mark_attachment_uploaded(&self, id: Uuid, remote_url: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE attachments SET uploaded = 1, remote_url = ?2 WHERE id = ?1",
            params![id.to_string(), remote_url],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single attachment by UUID.
    pub fn get_attachment(&self, id: Uuid) -> Result<Attachment> {
        self.conn()
            .query_row(
                "SELECT id, message_id, remote_url, key, size, uploaded
                 FROM attachments
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_attachment,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List the attachments carried by a message.
    pub fn list_attachments_for_message(&self, message_id: Uuid) -> Result<Vec<Attachment>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, message_id, remote_url, key, size, uploaded
             FROM attachments
             WHERE message_id = ?1",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], row_to_attachment)?;

        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(row?);
        }
        Ok(attachments)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete an attachment by UUID.  Returns `true` if a row was deleted.
    pub fn delete_attachment(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM attachments WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to an [`Attachment`].
fn row_to_attachment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Attachment> {
    let id_str: String = row.get(0)?;
    let message_str: Option<String> = row.get(1)?;
    let remote_url: Option<String> = row.get(2)?;
    let key: Option<Vec<u8>> = row.get(3)?;
    let size: i64 = row.get(4)?;
    let uploaded: bool = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let message_id = message_str
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Attachment {
        id,
        message_id,
        remote_url,
        key,
        size: size as u64,
        uploaded,
    })
}
