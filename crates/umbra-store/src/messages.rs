//! CRUD operations for [`Message`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use umbra_shared::AccountId;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, MessageStatus};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new message.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages
                 (id, thread_id, sender, body, sent_at, received_at, is_outgoing, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.id.to_string(),
                message.thread_id,
                message.sender.to_hex(),
                message.body,
                message.sent_at.to_rfc3339(),
                message.received_at.to_rfc3339(),
                message.is_outgoing,
                message.status.to_i64(),
            ],
        )?;
        Ok(())
    }

    /// Update the delivery status of a message.
    pub fn set_message_status(&self, id: Uuid, status: MessageStatus) -> Result<()> {
        self.conn().execute(
            "UPDATE messages SET status = ?2 WHERE id = ?1",
            params![id.to_string(), status.to_i64()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single message by UUID.
    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, thread_id, sender, body, sent_at, received_at, is_outgoing, status
                 FROM messages
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Page through a thread's messages, newest first.
    pub fn list_messages_for_thread(
        &self,
        thread_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, thread_id, sender, body, sent_at, received_at, is_outgoing, status
             FROM messages
             WHERE thread_id = ?1
             ORDER BY sent_at DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(
            params![thread_id, limit as i64, offset as i64],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a message by UUID.  Returns `true` if a row was deleted.
    pub fn delete_message(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    /// Delete every message in a thread.  Returns how many were removed.
    pub fn delete_messages_for_thread(&self, thread_id: &str) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE thread_id = ?1",
            params![thread_id],
        )?;
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let thread_id: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let body: Option<String> = row.get(3)?;
    let sent_str: String = row.get(4)?;
    let received_str: String = row.get(5)?;
    let is_outgoing: bool = row.get(6)?;
    let status_raw: i64 = row.get(7)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let sender = AccountId::from_hex(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let sent_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&sent_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let received_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&received_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let status = MessageStatus::from_i64(status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Integer,
            format!("unknown message status {status_raw}").into(),
        )
    })?;

    Ok(Message {
        id,
        thread_id,
        sender,
        body,
        sent_at,
        received_at,
        is_outgoing,
        status,
    })
}
