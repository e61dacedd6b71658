//! CRUD operations for durable [`Job`] records.
//!
//! Jobs are created by callers, mutated only by the job runner, and deleted
//! on terminal success or failure. A partial unique index on
//! `uniqueness_key` backs the coalescing guarantee at the storage level.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Job;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new job. Fails on a duplicate uniqueness key; callers who
    /// want coalescing should check [`Database::find_job_by_uniqueness`]
    /// first.
    pub fn insert_job(&self, job: &Job) -> Result<()> {
        self.conn().execute(
            "INSERT INTO jobs
                 (id, variant, thread_id, details, failure_count, max_failure_count,
                  uniqueness_key, next_attempt_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id.to_string(),
                job.variant,
                job.thread_id,
                job.details,
                job.failure_count,
                job.max_failure_count,
                job.uniqueness_key,
                job.next_attempt_at.map(|t| t.to_rfc3339()),
                job.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Record a failed attempt and when the job may run again.
    pub fn set_job_retry(
        &self,
        id: Uuid,
        failure_count: u32,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE jobs SET failure_count = ?2, next_attempt_at = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                failure_count,
                next_attempt_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single job by UUID.
    pub fn get_job(&self, id: Uuid) -> Result<Job> {
        self.conn()
            .query_row(
                "SELECT id, variant, thread_id, details, failure_count, max_failure_count,
                        uniqueness_key, next_attempt_at, created_at
                 FROM jobs
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_job,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Find the pending job with a given uniqueness key, if any.
    pub fn find_job_by_uniqueness(&self, uniqueness_key: &str) -> Result<Option<Job>> {
        let result = self.conn().query_row(
            "SELECT id, variant, thread_id, details, failure_count, max_failure_count,
                    uniqueness_key, next_attempt_at, created_at
             FROM jobs
             WHERE uniqueness_key = ?1",
            params![uniqueness_key],
            row_to_job,
        );
        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// All persisted jobs, oldest first. Used to reload the runner on start.
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, variant, thread_id, details, failure_count, max_failure_count,
                    uniqueness_key, next_attempt_at, created_at
             FROM jobs
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map([], row_to_job)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    /// Jobs whose next attempt is due at or before `now`, oldest first.
    pub fn list_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, variant, thread_id, details, failure_count, max_failure_count,
                    uniqueness_key, next_attempt_at, created_at
             FROM jobs
             WHERE next_attempt_at IS NULL OR next_attempt_at <= ?1
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![now.to_rfc3339()], row_to_job)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a job on terminal success or failure.  Returns `true` if a row
    /// was deleted.
    pub fn delete_job(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Job`].
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let id_str: String = row.get(0)?;
    let variant: String = row.get(1)?;
    let thread_id: Option<String> = row.get(2)?;
    let details: Vec<u8> = row.get(3)?;
    let failure_count: u32 = row.get(4)?;
    let max_failure_count: u32 = row.get(5)?;
    let uniqueness_key: Option<String> = row.get(6)?;
    let next_attempt_str: Option<String> = row.get(7)?;
    let created_str: String = row.get(8)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let next_attempt_at = next_attempt_str
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        7,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
        })
        .transpose()?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Job {
        id,
        variant,
        thread_id,
        details,
        failure_count,
        max_failure_count,
        uniqueness_key,
        next_attempt_at,
        created_at,
    })
}
