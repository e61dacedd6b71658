use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use umbra_shared::{AccountId, ConfigNamespace, GroupRole, GroupRoleStatus};

use crate::error::ConfigError;
use crate::lww::Lww;
use crate::object::{self, ConfigDelta, ConfigObject, PendingPush, SyncState};

/// One member's synced role and invite/promote progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMemberEntry {
    role: Lww<GroupRole>,
    role_status: Lww<GroupRoleStatus>,
    added_at_ms: u64,
    #[serde(default)]
    known_remote: bool,
}

impl GroupMemberEntry {
    fn new(role: GroupRole, status: GroupRoleStatus, now_ms: u64) -> Self {
        Self {
            role: Lww::new(role, now_ms),
            role_status: Lww::new(status, now_ms),
            added_at_ms: now_ms,
            known_remote: false,
        }
    }

    pub fn role(&self) -> GroupRole {
        *self.role.get()
    }

    pub fn role_status(&self) -> GroupRoleStatus {
        *self.role_status.get()
    }

    pub fn added_at_ms(&self) -> u64 {
        self.added_at_ms
    }

    pub fn is_zombie(&self) -> bool {
        self.role() == GroupRole::Zombie
    }

    fn merge_from(&mut self, other: &GroupMemberEntry) -> bool {
        let mut changed = false;
        changed |= self.role.merge(&other.role);
        changed |= self.role_status.merge(&other.role_status);
        changed
    }

    fn latest_ts(&self) -> u64 {
        [
            self.role.updated_at_ms(),
            self.role_status.updated_at_ms(),
            self.added_at_ms,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

#[derive(Debug, Default, Clone)]
pub struct GroupMemberChanges {
    pub changed: Vec<AccountId>,
    pub removed: Vec<AccountId>,
}

/// The shared member roster of one group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupMembersConfig {
    members: BTreeMap<AccountId, GroupMemberEntry>,
    state: SyncState,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    snapshot_at_ms: u64,
    members: BTreeMap<AccountId, GroupMemberEntry>,
}

impl GroupMembersConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &AccountId) -> Option<&GroupMemberEntry> {
        self.members.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &GroupMemberEntry)> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members still cryptographically present (admins and standard, not
    /// zombies).
    pub fn active(&self) -> impl Iterator<Item = (&AccountId, &GroupMemberEntry)> {
        self.members.iter().filter(|(_, m)| !m.is_zombie())
    }

    pub fn admins(&self) -> impl Iterator<Item = &AccountId> {
        self.members
            .iter()
            .filter(|(_, m)| m.role() == GroupRole::Admin)
            .map(|(id, _)| id)
    }

    pub fn zombies(&self) -> impl Iterator<Item = &AccountId> {
        self.members
            .iter()
            .filter(|(_, m)| m.is_zombie())
            .map(|(id, _)| id)
    }

    pub fn is_admin(&self, id: &AccountId) -> bool {
        self.get(id).map(|m| m.role() == GroupRole::Admin) == Some(true)
    }

    pub fn add(&mut self, id: AccountId, role: GroupRole, status: GroupRoleStatus, now_ms: u64) {
        match self.members.get_mut(&id) {
            Some(entry) => {
                let mut changed = entry.role.set(role, now_ms);
                changed |= entry.role_status.set(status, now_ms);
                if changed {
                    self.state.mark_mutated();
                }
            }
            None => {
                self.members
                    .insert(id, GroupMemberEntry::new(role, status, now_ms));
                self.state.mark_mutated();
            }
        }
    }

    pub fn set_role(&mut self, id: &AccountId, role: GroupRole, now_ms: u64) {
        if let Some(entry) = self.members.get_mut(id) {
            if entry.role.set(role, now_ms) {
                self.state.mark_mutated();
            }
        }
    }

    pub fn set_role_status(&mut self, id: &AccountId, status: GroupRoleStatus, now_ms: u64) {
        if let Some(entry) = self.members.get_mut(id) {
            if entry.role_status.set(status, now_ms) {
                self.state.mark_mutated();
            }
        }
    }

    /// A member who left on their own is kept as a zombie until an admin
    /// runs the hard-removal pass.
    pub fn mark_zombie(&mut self, id: &AccountId, now_ms: u64) {
        self.set_role(id, GroupRole::Zombie, now_ms);
    }

    pub fn remove(&mut self, id: &AccountId) -> bool {
        if self.members.remove(id).is_some() {
            self.state.mark_mutated();
            true
        } else {
            false
        }
    }
}

impl ConfigObject for GroupMembersConfig {
    const NAMESPACE: ConfigNamespace = ConfigNamespace::GroupMembers;

    type Changes = GroupMemberChanges;

    fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    fn merge(&mut self, deltas: &[ConfigDelta]) -> Result<GroupMemberChanges, ConfigError> {
        let mut changed = BTreeSet::new();
        let mut removed = Vec::new();

        for delta in deltas {
            let snapshot: Snapshot = object::from_bytes(&delta.data)?;
            for (id, incoming) in &snapshot.members {
                match self.members.get_mut(id) {
                    Some(local) => {
                        if local.merge_from(incoming) {
                            changed.insert(*id);
                        }
                        local.known_remote = true;
                    }
                    None => {
                        let mut entry = incoming.clone();
                        entry.known_remote = true;
                        self.members.insert(*id, entry);
                        changed.insert(*id);
                    }
                }
            }

            let stale: Vec<AccountId> = self
                .members
                .iter()
                .filter(|(id, entry)| {
                    !snapshot.members.contains_key(id)
                        && entry.known_remote
                        && entry.latest_ts() < snapshot.snapshot_at_ms
                })
                .map(|(id, _)| *id)
                .collect();
            for id in stale {
                self.members.remove(&id);
                changed.remove(&id);
                removed.push(id);
            }

            self.state.observe_remote_seqno(delta.seqno);
        }

        Ok(GroupMemberChanges {
            changed: changed.into_iter().collect(),
            removed,
        })
    }

    fn push(&mut self, now_ms: u64) -> Result<PendingPush, ConfigError> {
        let data = object::to_bytes(&Snapshot {
            snapshot_at_ms: now_ms,
            members: self.members.clone(),
        })?;
        self.state.record_push();
        Ok(PendingPush {
            namespace: Self::NAMESPACE,
            seqno: self.state.next_seqno(),
            data,
        })
    }

    fn confirm_pushed(&mut self, seqno: u64) {
        self.state.confirm(seqno);
    }

    fn dump(&self) -> Result<Vec<u8>, ConfigError> {
        object::to_bytes(self)
    }

    fn from_dump(data: &[u8]) -> Result<Self, ConfigError> {
        object::from_bytes(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> AccountId {
        AccountId::standard([byte; 32])
    }

    fn delta_from(config: &mut GroupMembersConfig, now_ms: u64) -> ConfigDelta {
        let push = config.push(now_ms).unwrap();
        config.confirm_pushed(push.seqno);
        ConfigDelta {
            seqno: push.seqno,
            data: push.data,
        }
    }

    #[test]
    fn pending_to_accepted_propagates() {
        let mut admin = GroupMembersConfig::new();
        admin.add(id(1), GroupRole::Standard, GroupRoleStatus::Pending, 100);
        let first = delta_from(&mut admin, 110);

        let mut other = GroupMembersConfig::new();
        other.merge(&[first]).unwrap();
        assert_eq!(
            other.get(&id(1)).unwrap().role_status(),
            GroupRoleStatus::Pending
        );

        admin.set_role_status(&id(1), GroupRoleStatus::Accepted, 200);
        let second = delta_from(&mut admin, 210);
        let changes = other.merge(&[second]).unwrap();
        assert_eq!(changes.changed, vec![id(1)]);
        assert_eq!(
            other.get(&id(1)).unwrap().role_status(),
            GroupRoleStatus::Accepted
        );
    }

    #[test]
    fn zombies_are_excluded_from_active() {
        let mut config = GroupMembersConfig::new();
        config.add(id(1), GroupRole::Admin, GroupRoleStatus::Accepted, 100);
        config.add(id(2), GroupRole::Standard, GroupRoleStatus::Accepted, 100);
        config.mark_zombie(&id(2), 200);

        assert_eq!(config.active().count(), 1);
        assert_eq!(config.zombies().copied().collect::<Vec<_>>(), vec![id(2)]);
        assert!(config.is_admin(&id(1)));
    }

    #[test]
    fn hard_removed_member_disappears_everywhere() {
        let mut admin = GroupMembersConfig::new();
        admin.add(id(1), GroupRole::Admin, GroupRoleStatus::Accepted, 100);
        admin.add(id(2), GroupRole::Standard, GroupRoleStatus::Accepted, 100);
        let first = delta_from(&mut admin, 110);

        let mut member = GroupMembersConfig::new();
        member.merge(&[first]).unwrap();

        admin.remove(&id(2));
        let second = delta_from(&mut admin, 300);
        let changes = member.merge(&[second]).unwrap();
        assert_eq!(changes.removed, vec![id(2)]);
        assert!(member.get(&id(2)).is_none());
    }
}
