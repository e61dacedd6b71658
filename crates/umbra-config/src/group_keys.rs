use serde::{Deserialize, Serialize};
use umbra_shared::ConfigNamespace;

use crate::error::ConfigError;
use crate::object::{self, ConfigDelta, ConfigObject, PendingPush, SyncState};

/// One group encryption keypair with the time we learned about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupKeyEntry {
    pub public: [u8; 32],
    pub secret: [u8; 32],
    pub received_at_ms: u64,
}

/// The rotation history of one group's encryption keys.
///
/// Merge is a union keyed on the public key: rotation only ever adds keys,
/// and snapshots never delete them. Old keys are dropped locally by
/// [`GroupKeysConfig::purge_expired`] once they fall outside the retention
/// window, since messages in flight during a rotation may still use the
/// prior key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupKeysConfig {
    keys: Vec<GroupKeyEntry>,
    state: SyncState,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    keys: Vec<GroupKeyEntry>,
}

impl GroupKeysConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, public: &[u8; 32]) -> bool {
        self.keys.iter().any(|k| &k.public == public)
    }

    /// Record a keypair. Returns false if it was already known.
    pub fn add_key(&mut self, public: [u8; 32], secret: [u8; 32], now_ms: u64) -> bool {
        if self.contains(&public) {
            return false;
        }
        self.keys.push(GroupKeyEntry {
            public,
            secret,
            received_at_ms: now_ms,
        });
        self.state.mark_mutated();
        true
    }

    /// All keys, most recently received first. Trial decryption walks this
    /// order and stops at the first success.
    pub fn newest_first(&self) -> Vec<&GroupKeyEntry> {
        let mut keys: Vec<&GroupKeyEntry> = self.keys.iter().collect();
        keys.sort_by(|a, b| {
            b.received_at_ms
                .cmp(&a.received_at_ms)
                .then_with(|| b.public.cmp(&a.public))
        });
        keys
    }

    /// The key new messages are encrypted under.
    pub fn current(&self) -> Option<&GroupKeyEntry> {
        self.newest_first().into_iter().next()
    }

    /// Drop keys older than the retention window. The current key is always
    /// kept. Returns how many were dropped.
    pub fn purge_expired(&mut self, retention_ms: u64, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(retention_ms);
        let current_public = match self.current() {
            Some(key) => key.public,
            None => return 0,
        };
        let before = self.keys.len();
        self.keys
            .retain(|k| k.public == current_public || k.received_at_ms >= cutoff);
        before - self.keys.len()
    }
}

impl ConfigObject for GroupKeysConfig {
    const NAMESPACE: ConfigNamespace = ConfigNamespace::GroupKeys;

    /// Public keys of the keypairs the merge added.
    type Changes = Vec<[u8; 32]>;

    fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    fn merge(&mut self, deltas: &[ConfigDelta]) -> Result<Vec<[u8; 32]>, ConfigError> {
        let mut added = Vec::new();
        for delta in deltas {
            let snapshot: Snapshot = object::from_bytes(&delta.data)?;
            for key in snapshot.keys {
                if !self.contains(&key.public) {
                    added.push(key.public);
                    self.keys.push(key);
                }
            }
            self.state.observe_remote_seqno(delta.seqno);
        }
        Ok(added)
    }

    fn push(&mut self, _now_ms: u64) -> Result<PendingPush, ConfigError> {
        let data = object::to_bytes(&Snapshot {
            keys: self.keys.clone(),
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
