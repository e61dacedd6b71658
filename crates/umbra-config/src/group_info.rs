use serde::{Deserialize, Serialize};
use umbra_shared::ConfigNamespace;

use crate::error::ConfigError;
use crate::lww::Lww;
use crate::object::{self, ConfigDelta, ConfigObject, PendingPush, SyncState};

/// Shared metadata for one group: name, description, picture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfoConfig {
    name: Lww<String>,
    description: Lww<Option<String>>,
    picture_url: Lww<Option<String>>,
    picture_key: Lww<Option<Vec<u8>>>,
    created_at_ms: u64,
    state: SyncState,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    name: Lww<String>,
    description: Lww<Option<String>>,
    picture_url: Lww<Option<String>>,
    picture_key: Lww<Option<Vec<u8>>>,
    created_at_ms: u64,
}

impl GroupInfoConfig {
    pub fn new(name: String, now_ms: u64) -> Self {
        Self {
            name: Lww::new(name, now_ms),
            description: Lww::new(None, 0),
            picture_url: Lww::new(None, 0),
            picture_key: Lww::new(None, 0),
            created_at_ms: now_ms,
            state: SyncState::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.name.get()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.get().as_deref()
    }

    pub fn picture_url(&self) -> Option<&str> {
        self.picture_url.get().as_deref()
    }

    pub fn picture_key(&self) -> Option<&[u8]> {
        self.picture_key.get().as_deref()
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn set_name(&mut self, name: String, now_ms: u64) {
        if self.name.set(name, now_ms) {
            self.state.mark_mutated();
        }
    }

    pub fn set_description(&mut self, description: Option<String>, now_ms: u64) {
        if self.description.set(description, now_ms) {
            self.state.mark_mutated();
        }
    }

    pub fn set_picture(&mut self, url: Option<String>, key: Option<Vec<u8>>, now_ms: u64) {
        let mut changed = self.picture_url.set(url, now_ms);
        changed |= self.picture_key.set(key, now_ms);
        if changed {
            self.state.mark_mutated();
        }
    }
}

impl ConfigObject for GroupInfoConfig {
    const NAMESPACE: ConfigNamespace = ConfigNamespace::GroupInfo;

    /// True when the merge changed any info field.
    type Changes = bool;

    fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    fn merge(&mut self, deltas: &[ConfigDelta]) -> Result<bool, ConfigError> {
        let mut changed = false;
        for delta in deltas {
            let snapshot: Snapshot = object::from_bytes(&delta.data)?;
            changed |= self.name.merge(&snapshot.name);
            changed |= self.description.merge(&snapshot.description);
            changed |= self.picture_url.merge(&snapshot.picture_url);
            changed |= self.picture_key.merge(&snapshot.picture_key);
            if snapshot.created_at_ms != 0 && snapshot.created_at_ms < self.created_at_ms {
                self.created_at_ms = snapshot.created_at_ms;
            }
            self.state.observe_remote_seqno(delta.seqno);
        }
        Ok(changed)
    }

    fn push(&mut self, _now_ms: u64) -> Result<PendingPush, ConfigError> {
        let data = object::to_bytes(&Snapshot {
            name: self.name.clone(),
            description: self.description.clone(),
            picture_url: self.picture_url.clone(),
            picture_key: self.picture_key.clone(),
            created_at_ms: self.created_at_ms,
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

    #[test]
    fn rename_merges_by_timestamp() {
        let mut admin = GroupInfoConfig::new("old".into(), 100);
        admin.set_name("renamed".into(), 200);
        let push = admin.push(210).unwrap();

        let mut member = GroupInfoConfig::new("old".into(), 100);
        let changed = member
            .merge(&[ConfigDelta {
                seqno: push.seqno,
                data: push.data,
            }])
            .unwrap();
        assert!(changed);
        assert_eq!(member.name(), "renamed");
    }

    #[test]
    fn earliest_creation_time_wins() {
        let mut late = GroupInfoConfig::new("g".into(), 500);
        let mut early = GroupInfoConfig::new("g".into(), 100);
        let push = early.push(510).unwrap();

        late.merge(&[ConfigDelta {
            seqno: push.seqno,
            data: push.data,
        }])
        .unwrap();
        assert_eq!(late.created_at_ms(), 100);
    }
}
