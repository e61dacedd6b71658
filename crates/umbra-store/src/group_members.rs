//! CRUD operations for [`GroupMember`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use umbra_shared::{AccountId, GroupRole, GroupRoleStatus};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    role_from_i64, role_status_from_i64, role_status_to_i64, role_to_i64, GroupMember,
};

impl Database {
    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Insert a member row, or update its role and status.
    pub fn upsert_group_member(&self, member: &GroupMember) -> Result<()> {
        self.conn().execute(
            "INSERT INTO group_members (group_id, member_id, role, role_status, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(group_id, member_id) DO UPDATE SET
                 role = excluded.role,
                 role_status = excluded.role_status",
            params![
                member.group_id.to_hex(),
                member.member_id.to_hex(),
                role_to_i64(member.role),
                role_status_to_i64(member.role_status),
                member.added_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn set_group_member_status(
        &self,
        group_id: &AccountId,
        member_id: &AccountId,
        status: GroupRoleStatus,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE group_members SET role_status = ?3
             WHERE group_id = ?1 AND member_id = ?2",
            params![
                group_id.to_hex(),
                member_id.to_hex(),
                role_status_to_i64(status)
            ],
        )?;
        Ok(())
    }

    pub fn set_group_member_role(
        &self,
        group_id: &AccountId,
        member_id: &AccountId,
        role: GroupRole,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE group_members SET role = ?3
             WHERE group_id = ?1 AND member_id = ?2",
            params![group_id.to_hex(), member_id.to_hex(), role_to_i64(role)],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch one member row.
    pub fn get_group_member(
        &self,
        group_id: &AccountId,
        member_id: &AccountId,
    ) -> Result<GroupMember> {
        self.conn()
            .query_row(
                "SELECT group_id, member_id, role, role_status, added_at
                 FROM group_members
                 WHERE group_id = ?1 AND member_id = ?2",
                params![group_id.to_hex(), member_id.to_hex()],
                row_to_group_member,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List all members of a group, admins first.
    pub fn list_group_members(&self, group_id: &AccountId) -> Result<Vec<GroupMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT group_id, member_id, role, role_status, added_at
             FROM group_members
             WHERE group_id = ?1
             ORDER BY role ASC, added_at ASC",
        )?;

        let rows = stmt.query_map(params![group_id.to_hex()], row_to_group_member)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete one member row.  Returns `true` if a row was deleted.
    pub fn delete_group_member(
        &self,
        group_id: &AccountId,
        member_id: &AccountId,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND member_id = ?2",
            params![group_id.to_hex(), member_id.to_hex()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`GroupMember`].
fn row_to_group_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupMember> {
    let group_str: String = row.get(0)?;
    let member_str: String = row.get(1)?;
    let role_raw: i64 = row.get(2)?;
    let status_raw: i64 = row.get(3)?;
    let added_str: String = row.get(4)?;

    let group_id = AccountId::from_hex(&group_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let member_id = AccountId::from_hex(&member_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let role = role_from_i64(role_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Integer,
            format!("unknown role {role_raw}").into(),
        )
    })?;
    let role_status = role_status_from_i64(status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Integer,
            format!("unknown role status {status_raw}").into(),
        )
    })?;

    let added_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&added_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(GroupMember {
        group_id,
        member_id,
        role,
        role_status,
        added_at,
    })
}
