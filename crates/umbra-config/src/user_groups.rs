use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use umbra_shared::{AccountId, ConfigNamespace};

use crate::error::ConfigError;
use crate::lww::Lww;
use crate::object::{self, ConfigDelta, ConfigObject, PendingPush, SyncState};

/// A group the user belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEntry {
    name: Lww<String>,
    priority: Lww<i32>,
    hidden: Lww<bool>,
    joined_at_ms: u64,
    #[serde(default)]
    known_remote: bool,
}

impl GroupEntry {
    fn new(name: String, now_ms: u64) -> Self {
        Self {
            name: Lww::new(name, now_ms),
            priority: Lww::new(0, 0),
            hidden: Lww::new(false, 0),
            joined_at_ms: now_ms,
            known_remote: false,
        }
    }

    pub fn name(&self) -> &str {
        self.name.get()
    }

    pub fn priority(&self) -> i32 {
        *self.priority.get()
    }

    pub fn hidden(&self) -> bool {
        *self.hidden.get()
    }

    pub fn joined_at_ms(&self) -> u64 {
        self.joined_at_ms
    }

    fn merge_from(&mut self, other: &GroupEntry) -> bool {
        let mut changed = false;
        changed |= self.name.merge(&other.name);
        changed |= self.priority.merge(&other.priority);
        changed |= self.hidden.merge(&other.hidden);
        changed
    }

    fn latest_ts(&self) -> u64 {
        [
            self.name.updated_at_ms(),
            self.priority.updated_at_ms(),
            self.hidden.updated_at_ms(),
            self.joined_at_ms,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// A community room the user has joined on some server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityEntry {
    pub server_url: String,
    pub room: String,
    pub server_pubkey: [u8; 32],
    priority: Lww<i32>,
    hidden: Lww<bool>,
    joined_at_ms: u64,
    #[serde(default)]
    known_remote: bool,
}

impl CommunityEntry {
    pub fn priority(&self) -> i32 {
        *self.priority.get()
    }

    pub fn hidden(&self) -> bool {
        *self.hidden.get()
    }

    pub fn joined_at_ms(&self) -> u64 {
        self.joined_at_ms
    }

    fn merge_from(&mut self, other: &CommunityEntry) -> bool {
        let mut changed = false;
        changed |= self.priority.merge(&other.priority);
        changed |= self.hidden.merge(&other.hidden);
        changed
    }

    fn latest_ts(&self) -> u64 {
        [
            self.priority.updated_at_ms(),
            self.hidden.updated_at_ms(),
            self.joined_at_ms,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Stable map key for a community: normalized server url plus room token.
pub fn community_key(server_url: &str, room: &str) -> String {
    let url = server_url.trim_end_matches('/').to_ascii_lowercase();
    format!("{url}/{room}")
}

#[derive(Debug, Default, Clone)]
pub struct UserGroupChanges {
    pub groups_changed: Vec<AccountId>,
    pub groups_removed: Vec<AccountId>,
    pub communities_changed: Vec<String>,
    pub communities_removed: Vec<String>,
}

/// The user's synced list of groups and communities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserGroupsConfig {
    groups: BTreeMap<AccountId, GroupEntry>,
    communities: BTreeMap<String, CommunityEntry>,
    state: SyncState,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    snapshot_at_ms: u64,
    groups: BTreeMap<AccountId, GroupEntry>,
    communities: BTreeMap<String, CommunityEntry>,
}

impl UserGroupsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, id: &AccountId) -> Option<&GroupEntry> {
        self.groups.get(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&AccountId, &GroupEntry)> {
        self.groups.iter()
    }

    pub fn community(&self, server_url: &str, room: &str) -> Option<&CommunityEntry> {
        self.communities.get(&community_key(server_url, room))
    }

    pub fn communities(&self) -> impl Iterator<Item = &CommunityEntry> {
        self.communities.values()
    }

    pub fn add_group(&mut self, id: AccountId, name: String, now_ms: u64) {
        match self.groups.get_mut(&id) {
            Some(entry) => {
                if entry.name.set(name, now_ms) {
                    self.state.mark_mutated();
                }
            }
            None => {
                self.groups.insert(id, GroupEntry::new(name, now_ms));
                self.state.mark_mutated();
            }
        }
    }

    pub fn set_group_priority(&mut self, id: &AccountId, priority: i32, now_ms: u64) {
        if let Some(entry) = self.groups.get_mut(id) {
            if entry.priority.set(priority, now_ms) {
                self.state.mark_mutated();
            }
        }
    }

    pub fn set_group_hidden(&mut self, id: &AccountId, hidden: bool, now_ms: u64) {
        if let Some(entry) = self.groups.get_mut(id) {
            if entry.hidden.set(hidden, now_ms) {
                self.state.mark_mutated();
            }
        }
    }

    pub fn remove_group(&mut self, id: &AccountId) -> bool {
        if self.groups.remove(id).is_some() {
            self.state.mark_mutated();
            true
        } else {
            false
        }
    }

    pub fn add_community(
        &mut self,
        server_url: String,
        room: String,
        server_pubkey: [u8; 32],
        now_ms: u64,
    ) {
        let key = community_key(&server_url, &room);
        if self.communities.contains_key(&key) {
            return;
        }
        self.communities.insert(
            key,
            CommunityEntry {
                server_url,
                room,
                server_pubkey,
                priority: Lww::new(0, 0),
                hidden: Lww::new(false, 0),
                joined_at_ms: now_ms,
                known_remote: false,
            },
        );
        self.state.mark_mutated();
    }

    pub fn remove_community(&mut self, server_url: &str, room: &str) -> bool {
        if self
            .communities
            .remove(&community_key(server_url, room))
            .is_some()
        {
            self.state.mark_mutated();
            true
        } else {
            false
        }
    }
}

impl ConfigObject for UserGroupsConfig {
    const NAMESPACE: ConfigNamespace = ConfigNamespace::UserGroups;

    type Changes = UserGroupChanges;

    fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    fn merge(&mut self, deltas: &[ConfigDelta]) -> Result<UserGroupChanges, ConfigError> {
        let mut groups_changed = BTreeSet::new();
        let mut groups_removed = Vec::new();
        let mut communities_changed = BTreeSet::new();
        let mut communities_removed = Vec::new();

        for delta in deltas {
            let snapshot: Snapshot = object::from_bytes(&delta.data)?;

            for (id, incoming) in &snapshot.groups {
                match self.groups.get_mut(id) {
                    Some(local) => {
                        if local.merge_from(incoming) {
                            groups_changed.insert(*id);
                        }
                        local.known_remote = true;
                    }
                    None => {
                        let mut entry = incoming.clone();
                        entry.known_remote = true;
                        self.groups.insert(*id, entry);
                        groups_changed.insert(*id);
                    }
                }
            }
            let stale: Vec<AccountId> = self
                .groups
                .iter()
                .filter(|(id, entry)| {
                    !snapshot.groups.contains_key(id)
                        && entry.known_remote
                        && entry.latest_ts() < snapshot.snapshot_at_ms
                })
                .map(|(id, _)| *id)
                .collect();
            for id in stale {
                self.groups.remove(&id);
                groups_changed.remove(&id);
                groups_removed.push(id);
            }

            for (key, incoming) in &snapshot.communities {
                match self.communities.get_mut(key) {
                    Some(local) => {
                        if local.merge_from(incoming) {
                            communities_changed.insert(key.clone());
                        }
                        local.known_remote = true;
                    }
                    None => {
                        let mut entry = incoming.clone();
                        entry.known_remote = true;
                        self.communities.insert(key.clone(), entry);
                        communities_changed.insert(key.clone());
                    }
                }
            }
            let stale: Vec<String> = self
                .communities
                .iter()
                .filter(|(key, entry)| {
                    !snapshot.communities.contains_key(*key)
                        && entry.known_remote
                        && entry.latest_ts() < snapshot.snapshot_at_ms
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                self.communities.remove(&key);
                communities_changed.remove(&key);
                communities_removed.push(key);
            }

            self.state.observe_remote_seqno(delta.seqno);
        }

        Ok(UserGroupChanges {
            groups_changed: groups_changed.into_iter().collect(),
            groups_removed,
            communities_changed: communities_changed.into_iter().collect(),
            communities_removed,
        })
    }

    fn push(&mut self, now_ms: u64) -> Result<PendingPush, ConfigError> {
        let data = object::to_bytes(&Snapshot {
            snapshot_at_ms: now_ms,
            groups: self.groups.clone(),
            communities: self.communities.clone(),
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

    fn delta_from(config: &mut UserGroupsConfig, now_ms: u64) -> ConfigDelta {
        let push = config.push(now_ms).unwrap();
        config.confirm_pushed(push.seqno);
        ConfigDelta {
            seqno: push.seqno,
            data: push.data,
        }
    }

    #[test]
    fn community_key_is_normalized() {
        assert_eq!(
            community_key("https://Example.Org/", "rust"),
            community_key("https://example.org", "rust"),
        );
    }

    #[test]
    fn merged_group_appears_locally() {
        let mut remote = UserGroupsConfig::new();
        remote.add_group(id(1), "book club".into(), 100);
        let delta = delta_from(&mut remote, 110);

        let mut local = UserGroupsConfig::new();
        let changes = local.merge(&[delta]).unwrap();
        assert_eq!(changes.groups_changed, vec![id(1)]);
        assert_eq!(local.group(&id(1)).unwrap().name(), "book club");
    }

    #[test]
    fn remotely_left_community_is_removed() {
        let mut remote = UserGroupsConfig::new();
        remote.add_community("https://example.org".into(), "rust".into(), [9u8; 32], 100);
        let first = delta_from(&mut remote, 110);

        let mut local = UserGroupsConfig::new();
        local.merge(&[first]).unwrap();
        assert!(local.community("https://example.org", "rust").is_some());

        remote.remove_community("https://example.org", "rust");
        let second = delta_from(&mut remote, 300);
        let changes = local.merge(&[second]).unwrap();
        assert_eq!(changes.communities_removed.len(), 1);
        assert!(local.community("https://example.org", "rust").is_none());
    }

    #[test]
    fn hidden_flag_merges_by_timestamp() {
        let mut remote = UserGroupsConfig::new();
        remote.add_group(id(1), "g".into(), 100);
        remote.set_group_hidden(&id(1), true, 200);
        let delta = delta_from(&mut remote, 210);

        let mut local = UserGroupsConfig::new();
        local.add_group(id(1), "g".into(), 100);
        local.merge(&[delta]).unwrap();
        assert!(local.group(&id(1)).unwrap().hidden());
    }
}
