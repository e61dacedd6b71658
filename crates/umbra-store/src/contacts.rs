//! CRUD operations for [`Contact`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use umbra_shared::AccountId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Contact;

impl Database {
    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Insert a contact, or update the synced fields if it already exists.
    /// `created_at` and `nickname` are preserved on update.
    pub fn upsert_contact(&self, contact: &Contact) -> Result<()> {
        self.conn().execute(
            "INSERT INTO contacts
                 (account_id, name, nickname, picture_url, picture_key,
                  is_approved, did_approve_me, is_blocked, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(account_id) DO UPDATE SET
                 name = excluded.name,
                 picture_url = excluded.picture_url,
                 picture_key = excluded.picture_key,
                 is_approved = excluded.is_approved,
                 did_approve_me = excluded.did_approve_me,
                 is_blocked = excluded.is_blocked",
            params![
                contact.id.to_hex(),
                contact.name,
                contact.nickname,
                contact.picture_url,
                contact.picture_key,
                contact.is_approved,
                contact.did_approve_me,
                contact.is_blocked,
                contact.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Set or clear the local nickname.
    pub fn set_contact_nickname(&self, id: &AccountId, nickname: Option<&str>) -> Result<()> {
        self.conn().execute(
            "UPDATE contacts SET nickname = ?2 WHERE account_id = ?1",
            params![id.to_hex(), nickname],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single contact by account id.
    pub fn get_contact(&self, id: &AccountId) -> Result<Contact> {
        self.conn()
            .query_row(
                "SELECT account_id, name, nickname, picture_url, picture_key,
                        is_approved, did_approve_me, is_blocked, created_at
                 FROM contacts
                 WHERE account_id = ?1",
                params![id.to_hex()],
                row_to_contact,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List all contacts, ordered by name.
    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut stmt = self.conn().prepare(
            "SELECT account_id, name, nickname, picture_url, picture_key,
                    is_approved, did_approve_me, is_blocked, created_at
             FROM contacts
             ORDER BY name ASC",
        )?;

        let rows = stmt.query_map([], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a contact.  Returns `true` if a row was deleted.
    pub fn delete_contact(&self, id: &AccountId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM contacts WHERE account_id = ?1",
            params![id.to_hex()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Contact`].
fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let nickname: Option<String> = row.get(2)?;
    let picture_url: Option<String> = row.get(3)?;
    let picture_key: Option<Vec<u8>> = row.get(4)?;
    let is_approved: bool = row.get(5)?;
    let did_approve_me: bool = row.get(6)?;
    let is_blocked: bool = row.get(7)?;
    let created_str: String = row.get(8)?;

    let id = AccountId::from_hex(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Contact {
        id,
        name,
        nickname,
        picture_url,
        picture_key,
        is_approved,
        did_approve_me,
        is_blocked,
        created_at,
    })
}
