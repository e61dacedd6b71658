use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use umbra_shared::{AccountId, ConfigNamespace};

use crate::error::ConfigError;
use crate::lww::{Lww, MonotoneFlag};
use crate::object::{self, ConfigDelta, ConfigObject, PendingPush, SyncState};

/// One synced contact record.
///
/// Approval flags are monotone: a merge may only raise them, never lower,
/// while `is_blocked` flips freely since either device may legitimately
/// change it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactEntry {
    name: Lww<String>,
    nickname: Lww<Option<String>>,
    picture_url: Lww<Option<String>>,
    picture_key: Lww<Option<Vec<u8>>>,
    is_approved: MonotoneFlag,
    did_approve_me: MonotoneFlag,
    is_blocked: Lww<bool>,
    /// Conversation sort priority; pinned threads sort first.
    priority: Lww<i32>,
    /// Hidden threads exist in config but have no local conversation row.
    hidden: Lww<bool>,
    created_at_ms: u64,
    /// Whether this entry has ever appeared in a remote snapshot. Only such
    /// entries may be deleted by absence from a newer snapshot.
    #[serde(default)]
    known_remote: bool,
}

impl ContactEntry {
    fn new(created_at_ms: u64) -> Self {
        Self {
            name: Lww::new(String::new(), 0),
            nickname: Lww::new(None, 0),
            picture_url: Lww::new(None, 0),
            picture_key: Lww::new(None, 0),
            is_approved: MonotoneFlag::new(false, 0),
            did_approve_me: MonotoneFlag::new(false, 0),
            is_blocked: Lww::new(false, 0),
            priority: Lww::new(0, 0),
            hidden: Lww::new(false, 0),
            created_at_ms,
            known_remote: false,
        }
    }

    pub fn name(&self) -> &str {
        self.name.get()
    }

    pub fn nickname(&self) -> Option<&str> {
        self.nickname.get().as_deref()
    }

    pub fn picture_url(&self) -> Option<&str> {
        self.picture_url.get().as_deref()
    }

    pub fn picture_key(&self) -> Option<&[u8]> {
        self.picture_key.get().as_deref()
    }

    pub fn is_approved(&self) -> bool {
        self.is_approved.get()
    }

    pub fn did_approve_me(&self) -> bool {
        self.did_approve_me.get()
    }

    pub fn is_blocked(&self) -> bool {
        *self.is_blocked.get()
    }

    pub fn priority(&self) -> i32 {
        *self.priority.get()
    }

    pub fn hidden(&self) -> bool {
        *self.hidden.get()
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    fn merge_from(&mut self, other: &ContactEntry) -> bool {
        let mut changed = false;
        changed |= self.name.merge(&other.name);
        changed |= self.nickname.merge(&other.nickname);
        changed |= self.picture_url.merge(&other.picture_url);
        changed |= self.picture_key.merge(&other.picture_key);
        changed |= self.is_approved.merge(&other.is_approved);
        changed |= self.did_approve_me.merge(&other.did_approve_me);
        changed |= self.is_blocked.merge(&other.is_blocked);
        changed |= self.priority.merge(&other.priority);
        changed |= self.hidden.merge(&other.hidden);
        changed
    }

    /// Newest write timestamp across all fields.
    fn latest_ts(&self) -> u64 {
        [
            self.name.updated_at_ms(),
            self.nickname.updated_at_ms(),
            self.picture_url.updated_at_ms(),
            self.picture_key.updated_at_ms(),
            self.is_approved.updated_at_ms(),
            self.did_approve_me.updated_at_ms(),
            self.is_blocked.updated_at_ms(),
            self.priority.updated_at_ms(),
            self.hidden.updated_at_ms(),
            self.created_at_ms,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// What a merge changed, by contact id.
#[derive(Debug, Default, Clone)]
pub struct ContactChanges {
    pub changed: Vec<AccountId>,
    pub removed: Vec<AccountId>,
}

/// The authoritative synced contact list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactsConfig {
    entries: BTreeMap<AccountId, ContactEntry>,
    state: SyncState,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    snapshot_at_ms: u64,
    entries: BTreeMap<AccountId, ContactEntry>,
}

impl ContactsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &AccountId) -> Option<&ContactEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &AccountId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &ContactEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_name(&mut self, id: AccountId, name: String, now_ms: u64) {
        let entry = self.entry_mut(id, now_ms);
        if entry.name.set(name, now_ms) {
            self.state.mark_mutated();
        }
    }

    pub fn set_nickname(&mut self, id: AccountId, nickname: Option<String>, now_ms: u64) {
        let entry = self.entry_mut(id, now_ms);
        if entry.nickname.set(nickname, now_ms) {
            self.state.mark_mutated();
        }
    }

    pub fn set_picture(
        &mut self,
        id: AccountId,
        url: Option<String>,
        key: Option<Vec<u8>>,
        now_ms: u64,
    ) {
        let entry = self.entry_mut(id, now_ms);
        let mut changed = entry.picture_url.set(url, now_ms);
        changed |= entry.picture_key.set(key, now_ms);
        if changed {
            self.state.mark_mutated();
        }
    }

    pub fn set_approved(&mut self, id: AccountId, now_ms: u64) {
        let entry = self.entry_mut(id, now_ms);
        if entry.is_approved.set_true(now_ms) {
            self.state.mark_mutated();
        }
    }

    pub fn set_did_approve_me(&mut self, id: AccountId, now_ms: u64) {
        let entry = self.entry_mut(id, now_ms);
        if entry.did_approve_me.set_true(now_ms) {
            self.state.mark_mutated();
        }
    }

    pub fn set_blocked(&mut self, id: AccountId, blocked: bool, now_ms: u64) {
        let entry = self.entry_mut(id, now_ms);
        if entry.is_blocked.set(blocked, now_ms) {
            self.state.mark_mutated();
        }
    }

    pub fn set_priority(&mut self, id: AccountId, priority: i32, now_ms: u64) {
        let entry = self.entry_mut(id, now_ms);
        if entry.priority.set(priority, now_ms) {
            self.state.mark_mutated();
        }
    }

    pub fn set_hidden(&mut self, id: AccountId, hidden: bool, now_ms: u64) {
        let entry = self.entry_mut(id, now_ms);
        if entry.hidden.set(hidden, now_ms) {
            self.state.mark_mutated();
        }
    }

    pub fn remove(&mut self, id: &AccountId) -> bool {
        if self.entries.remove(id).is_some() {
            self.state.mark_mutated();
            true
        } else {
            false
        }
    }

    fn entry_mut(&mut self, id: AccountId, now_ms: u64) -> &mut ContactEntry {
        self.entries
            .entry(id)
            .or_insert_with(|| ContactEntry::new(now_ms))
    }
}

impl ConfigObject for ContactsConfig {
    const NAMESPACE: ConfigNamespace = ConfigNamespace::Contacts;

    type Changes = ContactChanges;

    fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    fn merge(&mut self, deltas: &[ConfigDelta]) -> Result<ContactChanges, ConfigError> {
        let mut changed = BTreeSet::new();
        let mut removed = Vec::new();

        for delta in deltas {
            let snapshot: Snapshot = object::from_bytes(&delta.data)?;
            for (id, incoming) in &snapshot.entries {
                match self.entries.get_mut(id) {
                    Some(local) => {
                        if local.merge_from(incoming) {
                            changed.insert(*id);
                        }
                        local.known_remote = true;
                    }
                    None => {
                        let mut entry = incoming.clone();
                        entry.known_remote = true;
                        self.entries.insert(*id, entry);
                        changed.insert(*id);
                    }
                }
            }

            // A complete snapshot that is newer than everything we know about
            // an entry, and no longer carries it, deletes it.
            let stale: Vec<AccountId> = self
                .entries
                .iter()
                .filter(|(id, entry)| {
                    !snapshot.entries.contains_key(id)
                        && entry.known_remote
                        && entry.latest_ts() < snapshot.snapshot_at_ms
                })
                .map(|(id, _)| *id)
                .collect();
            for id in stale {
                self.entries.remove(&id);
                changed.remove(&id);
                removed.push(id);
            }

            self.state.observe_remote_seqno(delta.seqno);
        }

        Ok(ContactChanges {
            changed: changed.into_iter().collect(),
            removed,
        })
    }

    fn push(&mut self, now_ms: u64) -> Result<PendingPush, ConfigError> {
        let data = object::to_bytes(&Snapshot {
            snapshot_at_ms: now_ms,
            entries: self.entries.clone(),
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

    fn delta_from(config: &mut ContactsConfig, now_ms: u64) -> ConfigDelta {
        let push = config.push(now_ms).unwrap();
        config.confirm_pushed(push.seqno);
        ConfigDelta {
            seqno: push.seqno,
            data: push.data,
        }
    }

    #[test]
    fn local_write_marks_dirty_until_confirmed() {
        let mut config = ContactsConfig::new();
        assert!(!config.is_dirty());

        config.set_name(id(1), "alice".into(), 100);
        assert!(config.is_dirty());

        let push = config.push(101).unwrap();
        config.confirm_pushed(push.seqno);
        assert!(!config.is_dirty());
    }

    #[test]
    fn newer_nickname_wins_and_stale_reapply_is_noop() {
        let mut older = ContactsConfig::new();
        older.set_nickname(id(1), Some("Bob".into()), 100);
        let old_delta = delta_from(&mut older, 100);

        let mut newer = ContactsConfig::new();
        newer.set_nickname(id(1), Some("Robert".into()), 200);
        let new_delta = delta_from(&mut newer, 200);

        let mut local = ContactsConfig::new();
        local.merge(&[old_delta.clone()]).unwrap();
        local.merge(&[new_delta]).unwrap();
        assert_eq!(local.get(&id(1)).unwrap().nickname(), Some("Robert"));

        let replay = local.merge(&[old_delta]).unwrap();
        assert!(replay.changed.is_empty());
        assert_eq!(local.get(&id(1)).unwrap().nickname(), Some("Robert"));
    }

    #[test]
    fn merge_order_does_not_matter() {
        let mut a = ContactsConfig::new();
        a.set_name(id(1), "from-a".into(), 100);
        a.set_blocked(id(2), true, 150);
        let delta_a = delta_from(&mut a, 160);

        let mut b = ContactsConfig::new();
        b.set_name(id(1), "from-b".into(), 120);
        b.set_priority(id(3), 7, 130);
        let delta_b = delta_from(&mut b, 140);

        let mut forward = ContactsConfig::new();
        forward.merge(&[delta_a.clone(), delta_b.clone()]).unwrap();
        let mut backward = ContactsConfig::new();
        backward.merge(&[delta_b, delta_a]).unwrap();

        assert_eq!(forward.get(&id(1)).unwrap().name(), "from-a");
        assert_eq!(
            forward.get(&id(1)).unwrap().name(),
            backward.get(&id(1)).unwrap().name()
        );
        assert_eq!(forward.len(), backward.len());
    }

    #[test]
    fn approval_cannot_be_revoked_by_merge() {
        let mut local = ContactsConfig::new();
        local.set_approved(id(1), 100);

        // Remote entry with approval still false, written later.
        let mut remote = ContactsConfig::new();
        remote.set_name(id(1), "alice".into(), 900);
        let delta = delta_from(&mut remote, 900);

        local.merge(&[delta]).unwrap();
        assert!(local.get(&id(1)).unwrap().is_approved());
    }

    #[test]
    fn blocked_flips_freely() {
        let mut local = ContactsConfig::new();
        local.set_blocked(id(1), true, 100);

        let mut remote = ContactsConfig::new();
        remote.set_blocked(id(1), false, 200);
        let delta = delta_from(&mut remote, 200);

        local.merge(&[delta]).unwrap();
        assert!(!local.get(&id(1)).unwrap().is_blocked());
    }

    #[test]
    fn unpushed_local_contact_survives_complete_snapshot() {
        let mut remote = ContactsConfig::new();
        remote.set_name(id(1), "alice".into(), 100);
        let delta = delta_from(&mut remote, 500);

        let mut local = ContactsConfig::new();
        local.set_name(id(9), "draft".into(), 200);
        let changes = local.merge(&[delta]).unwrap();

        assert!(changes.removed.is_empty());
        assert!(local.contains(&id(9)));
        assert!(local.contains(&id(1)));
    }

    #[test]
    fn remotely_deleted_contact_is_removed() {
        let mut remote = ContactsConfig::new();
        remote.set_name(id(1), "alice".into(), 100);
        remote.set_name(id(2), "bob".into(), 100);
        let first = delta_from(&mut remote, 110);

        let mut local = ContactsConfig::new();
        local.merge(&[first]).unwrap();
        assert!(local.contains(&id(2)));

        remote.remove(&id(2));
        let second = delta_from(&mut remote, 300);
        let changes = local.merge(&[second]).unwrap();

        assert_eq!(changes.removed, vec![id(2)]);
        assert!(!local.contains(&id(2)));
        assert!(local.contains(&id(1)));
    }

    #[test]
    fn idempotent_remerge_reports_nothing() {
        let mut remote = ContactsConfig::new();
        remote.set_name(id(1), "alice".into(), 100);
        let delta = delta_from(&mut remote, 110);

        let mut local = ContactsConfig::new();
        local.merge(&[delta.clone()]).unwrap();
        let again = local.merge(&[delta]).unwrap();
        assert!(again.changed.is_empty());
        assert!(again.removed.is_empty());
    }

    #[test]
    fn dump_roundtrip_preserves_state() {
        let mut config = ContactsConfig::new();
        config.set_name(id(1), "alice".into(), 100);
        config.set_approved(id(1), 110);

        let dump = config.dump().unwrap();
        let restored = ContactsConfig::from_dump(&dump).unwrap();
        assert_eq!(restored.get(&id(1)).unwrap().name(), "alice");
        assert!(restored.get(&id(1)).unwrap().is_approved());
        assert_eq!(restored.is_dirty(), config.is_dirty());
    }
}
