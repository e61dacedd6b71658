//! Last-writer-wins cells, the per-field unit of conflict resolution.

use serde::{Deserialize, Serialize};

/// A value paired with the timestamp of its last write.
///
/// Merging keeps the strictly newer value. Equal timestamps with differing
/// values are broken deterministically by comparing serialized bytes, so
/// merge order never matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lww<T> {
    value: T,
    updated_at_ms: u64,
}

impl<T: Clone + PartialEq + Serialize> Lww<T> {
    pub fn new(value: T, now_ms: u64) -> Self {
        Self {
            value,
            updated_at_ms: now_ms,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn updated_at_ms(&self) -> u64 {
        self.updated_at_ms
    }

    /// Local write. Returns true if the value actually changed; unchanged
    /// values do not move the timestamp.
    pub fn set(&mut self, value: T, now_ms: u64) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        self.updated_at_ms = now_ms.max(self.updated_at_ms + 1);
        true
    }

    /// Merge a remote cell. Returns true if the local value changed.
    pub fn merge(&mut self, other: &Lww<T>) -> bool {
        let take = match other.updated_at_ms.cmp(&self.updated_at_ms) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => {
                self.value != other.value && serialized(&other.value) > serialized(&self.value)
            }
        };
        if !take {
            return false;
        }
        let changed = self.value != other.value;
        self.value = other.value.clone();
        self.updated_at_ms = other.updated_at_ms;
        changed
    }
}

fn serialized<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).unwrap_or_default()
}

/// A boolean that merges only toward `true`.
///
/// Used for approval flags: a stale remote snapshot must never silently
/// revoke trust that was already granted locally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonotoneFlag {
    value: bool,
    updated_at_ms: u64,
}

impl MonotoneFlag {
    pub fn new(value: bool, now_ms: u64) -> Self {
        Self {
            value,
            updated_at_ms: now_ms,
        }
    }

    pub fn get(&self) -> bool {
        self.value
    }

    pub fn updated_at_ms(&self) -> u64 {
        self.updated_at_ms
    }

    /// Local write, upward only. Returns true on the false -> true edge.
    pub fn set_true(&mut self, now_ms: u64) -> bool {
        if self.value {
            return false;
        }
        self.value = true;
        self.updated_at_ms = now_ms.max(self.updated_at_ms + 1);
        true
    }

    /// Merge a remote flag: only ever raises, never lowers.
    pub fn merge(&mut self, other: &MonotoneFlag) -> bool {
        if other.updated_at_ms > self.updated_at_ms {
            self.updated_at_ms = other.updated_at_ms;
        }
        if other.value && !self.value {
            self.value = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_write_wins() {
        let mut local = Lww::new("Bob".to_string(), 100);
        let remote = Lww::new("Robert".to_string(), 200);

        assert!(local.merge(&remote));
        assert_eq!(local.get(), "Robert");
    }

    #[test]
    fn older_write_is_a_noop() {
        let mut local = Lww::new("Robert".to_string(), 200);
        let stale = Lww::new("Bob".to_string(), 100);

        assert!(!local.merge(&stale));
        assert_eq!(local.get(), "Robert");
    }

    #[test]
    fn merge_is_order_insensitive() {
        let a = Lww::new("x".to_string(), 100);
        let b = Lww::new("y".to_string(), 100);

        let mut left = a.clone();
        left.merge(&b);
        let mut right = b.clone();
        right.merge(&a);
        assert_eq!(left.get(), right.get());
    }

    #[test]
    fn unchanged_set_keeps_timestamp() {
        let mut cell = Lww::new(5u32, 100);
        assert!(!cell.set(5, 900));
        assert_eq!(cell.updated_at_ms(), 100);
    }

    #[test]
    fn set_never_moves_time_backwards() {
        let mut cell = Lww::new(1u32, 100);
        assert!(cell.set(2, 50));
        assert!(cell.updated_at_ms() > 100);
    }

    #[test]
    fn monotone_flag_never_lowers() {
        let mut approved = MonotoneFlag::new(true, 100);
        let stale = MonotoneFlag::new(false, 900);

        assert!(!approved.merge(&stale));
        assert!(approved.get());
    }

    #[test]
    fn monotone_flag_raises() {
        let mut approved = MonotoneFlag::new(false, 100);
        let remote = MonotoneFlag::new(true, 50);

        assert!(approved.merge(&remote));
        assert!(approved.get());
    }
}
