//! CRUD operations for [`Thread`] records.
//!
//! Thread existence doubles as conversation visibility: the sync engine
//! creates a thread when a conversation becomes visible and deletes it
//! (cascading to its messages) when it is hidden.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Thread, ThreadKind};

impl Database {
    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Insert a thread if it does not exist yet; updates priority otherwise.
    pub fn upsert_thread(&self, thread: &Thread) -> Result<()> {
        self.conn().execute(
            "INSERT INTO threads (id, kind, priority, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET priority = excluded.priority",
            params![
                thread.id,
                thread.kind.to_i64(),
                thread.priority,
                thread.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn set_thread_priority(&self, id: &str, priority: i32) -> Result<()> {
        self.conn().execute(
            "UPDATE threads SET priority = ?2 WHERE id = ?1",
            params![id, priority],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single thread by id.
    pub fn get_thread(&self, id: &str) -> Result<Thread> {
        self.conn()
            .query_row(
                "SELECT id, kind, priority, created_at
                 FROM threads
                 WHERE id = ?1",
                params![id],
                row_to_thread,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn thread_exists(&self, id: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM threads WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// List all threads, pinned (higher priority) first, then newest.
    pub fn list_threads(&self) -> Result<Vec<Thread>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, kind, priority, created_at
             FROM threads
             ORDER BY priority DESC, created_at DESC",
        )?;

        let rows = stmt.query_map([], row_to_thread)?;

        let mut threads = Vec::new();
        for row in rows {
            threads.push(row?);
        }
        Ok(threads)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a thread and, via cascade, its messages.  Returns `true` if a
    /// row was deleted.
    pub fn delete_thread(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM threads WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Thread`].
fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    let id: String = row.get(0)?;
    let kind_raw: i64 = row.get(1)?;
    let priority: i32 = row.get(2)?;
    let created_str: String = row.get(3)?;

    let kind = ThreadKind::from_i64(kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Integer,
            format!("unknown thread kind {kind_raw}").into(),
        )
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Thread {
        id,
        kind,
        priority,
        created_at,
    })
}
