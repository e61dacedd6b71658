use serde::{Deserialize, Serialize};
use umbra_shared::protocol::ProfileUpdate;
use umbra_shared::ConfigNamespace;

use crate::error::ConfigError;
use crate::lww::Lww;
use crate::object::{self, ConfigDelta, ConfigObject, PendingPush, SyncState};

/// The user's own synced profile: display name, picture, and the
/// note-to-self conversation priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfileConfig {
    name: Lww<String>,
    picture_url: Lww<Option<String>>,
    picture_key: Lww<Option<Vec<u8>>>,
    nts_priority: Lww<i32>,
    state: SyncState,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    name: Lww<String>,
    picture_url: Lww<Option<String>>,
    picture_key: Lww<Option<Vec<u8>>>,
    nts_priority: Lww<i32>,
}

impl Default for UserProfileConfig {
    fn default() -> Self {
        Self {
            name: Lww::new(String::new(), 0),
            picture_url: Lww::new(None, 0),
            picture_key: Lww::new(None, 0),
            nts_priority: Lww::new(0, 0),
            state: SyncState::default(),
        }
    }
}

impl UserProfileConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        self.name.get()
    }

    pub fn picture_url(&self) -> Option<&str> {
        self.picture_url.get().as_deref()
    }

    pub fn picture_key(&self) -> Option<&[u8]> {
        self.picture_key.get().as_deref()
    }

    pub fn nts_priority(&self) -> i32 {
        *self.nts_priority.get()
    }

    pub fn set_name(&mut self, name: String, now_ms: u64) {
        if self.name.set(name, now_ms) {
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

    pub fn set_nts_priority(&mut self, priority: i32, now_ms: u64) {
        if self.nts_priority.set(priority, now_ms) {
            self.state.mark_mutated();
        }
    }

    /// The wire form piggybacked on outgoing visible messages, if a name has
    /// been set.
    pub fn as_profile_update(&self) -> Option<ProfileUpdate> {
        if self.name.get().is_empty() {
            return None;
        }
        Some(ProfileUpdate {
            name: self.name.get().clone(),
            picture_url: self.picture_url.get().clone(),
            picture_key: self.picture_key.get().clone(),
        })
    }
}

impl ConfigObject for UserProfileConfig {
    const NAMESPACE: ConfigNamespace = ConfigNamespace::UserProfile;

    /// True when the merge changed any profile field.
    type Changes = bool;

    fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    fn merge(&mut self, deltas: &[ConfigDelta]) -> Result<bool, ConfigError> {
        let mut changed = false;
        for delta in deltas {
            let snapshot: Snapshot = object::from_bytes(&delta.data)?;
            changed |= self.name.merge(&snapshot.name);
            changed |= self.picture_url.merge(&snapshot.picture_url);
            changed |= self.picture_key.merge(&snapshot.picture_key);
            changed |= self.nts_priority.merge(&snapshot.nts_priority);
            self.state.observe_remote_seqno(delta.seqno);
        }
        Ok(changed)
    }

    fn push(&mut self, _now_ms: u64) -> Result<PendingPush, ConfigError> {
        let data = object::to_bytes(&Snapshot {
            name: self.name.clone(),
            picture_url: self.picture_url.clone(),
            picture_key: self.picture_key.clone(),
            nts_priority: self.nts_priority.clone(),
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
