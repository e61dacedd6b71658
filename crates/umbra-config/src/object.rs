use serde::{Deserialize, Serialize};
use umbra_shared::ConfigNamespace;

use crate::error::ConfigError;

/// A decrypted remote snapshot handed to [`ConfigObject::merge`].
#[derive(Debug, Clone)]
pub struct ConfigDelta {
    pub seqno: u64,
    pub data: Vec<u8>,
}

/// A serialized local snapshot awaiting network push.
#[derive(Debug, Clone)]
pub struct PendingPush {
    pub namespace: ConfigNamespace,
    pub seqno: u64,
    pub data: Vec<u8>,
}

/// One synchronized state object per namespace.
///
/// Mutation is always read-modify-push: local writes mark the object dirty,
/// `push` serializes a complete snapshot, `confirm_pushed` settles it, and
/// `merge` folds remote snapshots in. `dump`/`from_dump` are for local
/// persistence and include sync bookkeeping the wire snapshot does not.
pub trait ConfigObject: Sized {
    const NAMESPACE: ConfigNamespace;

    /// Typed description of what a merge changed locally.
    type Changes;

    /// True when local mutations have not yet been confirmed pushed.
    fn is_dirty(&self) -> bool;

    /// Fold remote snapshots into local state, newest field values winning.
    fn merge(&mut self, deltas: &[ConfigDelta]) -> Result<Self::Changes, ConfigError>;

    /// Serialize the current complete state for network transmission.
    fn push(&mut self, now_ms: u64) -> Result<PendingPush, ConfigError>;

    /// Acknowledge that the push with this seqno reached the server.
    fn confirm_pushed(&mut self, seqno: u64);

    fn dump(&self) -> Result<Vec<u8>, ConfigError>;

    fn from_dump(data: &[u8]) -> Result<Self, ConfigError>;
}

/// Push/ack bookkeeping shared by every config object.
///
/// Local writes between `record_push` and `confirm` keep the object dirty,
/// so nothing is lost when the user edits during a network round trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct SyncState {
    seqno: u64,
    mutations: u64,
    confirmed: u64,
    pending: u64,
}

impl SyncState {
    pub fn mark_mutated(&mut self) {
        self.mutations += 1;
    }

    pub fn is_dirty(&self) -> bool {
        self.mutations > self.confirmed
    }

    pub fn next_seqno(&self) -> u64 {
        self.seqno + 1
    }

    pub fn record_push(&mut self) {
        self.pending = self.mutations;
    }

    pub fn confirm(&mut self, seqno: u64) {
        if seqno == self.seqno + 1 {
            self.seqno = seqno;
            self.confirmed = self.pending;
        }
    }

    /// A remote snapshot with a higher seqno advances ours.
    pub fn observe_remote_seqno(&mut self, seqno: u64) {
        if seqno > self.seqno {
            self.seqno = seqno;
        }
    }
}

pub(crate) fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ConfigError> {
    bincode::serialize(value).map_err(|e| ConfigError::Serialization(e.to_string()))
}

pub(crate) fn from_bytes<'a, T: Deserialize<'a>>(data: &'a [u8]) -> Result<T, ConfigError> {
    bincode::deserialize(data).map_err(|e| ConfigError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_until_mutated() {
        let mut state = SyncState::default();
        assert!(!state.is_dirty());
        state.mark_mutated();
        assert!(state.is_dirty());
    }

    #[test]
    fn push_then_confirm_clears_dirty() {
        let mut state = SyncState::default();
        state.mark_mutated();

        let seqno = state.next_seqno();
        state.record_push();
        state.confirm(seqno);
        assert!(!state.is_dirty());
        assert_eq!(state.next_seqno(), 2);
    }

    #[test]
    fn write_during_push_keeps_dirty() {
        let mut state = SyncState::default();
        state.mark_mutated();

        let seqno = state.next_seqno();
        state.record_push();
        state.mark_mutated();
        state.confirm(seqno);
        assert!(state.is_dirty());
    }

    #[test]
    fn stale_confirm_is_ignored() {
        let mut state = SyncState::default();
        state.mark_mutated();
        state.record_push();
        state.confirm(7);
        assert!(state.is_dirty());
        assert_eq!(state.next_seqno(), 1);
    }

    #[test]
    fn remote_seqno_advances_ours() {
        let mut state = SyncState::default();
        state.observe_remote_seqno(5);
        assert_eq!(state.next_seqno(), 6);
        state.observe_remote_seqno(3);
        assert_eq!(state.next_seqno(), 6);
    }
}
