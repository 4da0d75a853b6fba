//! Local bounded key-value store with replication bookkeeping.

use crate::id::NodeId;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const MAX_STORE_SIZE: usize = 1000;
pub const MAX_KEY_SIZE: usize = 1024;
pub const MAX_VALUE_SIZE: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("key exceeds MAX_KEY_SIZE ({0} > {MAX_KEY_SIZE})")]
    KeyTooLarge(usize),
    #[error("value exceeds MAX_VALUE_SIZE ({0} > {MAX_VALUE_SIZE})")]
    ValueTooLarge(usize),
    #[error("key is empty")]
    EmptyKey,
    #[error("value is missing or a reserved placeholder")]
    InvalidValue,
}

/// One stored entry, keyed externally by its `key_hash`.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub value: Vec<u8>,
    pub stored_at: Instant,
    pub replicated_to: HashSet<NodeId>,
    pub origin_local: bool,
    /// The raw key string, when known (always known for locally-originated
    /// puts; `None` for entries learned from an inbound STORE that only
    /// carried the already-hashed key). Replication sends this when present
    /// so receivers don't have to treat every replicated STORE as pre-hashed.
    pub original_key: Option<String>,
}

/// Bounded local store. Capacity enforcement and eviction happen on every
/// insert; callers never need to call a separate prune step for size, only
/// for scheduled replication/republish sweeps.
#[derive(Debug)]
pub struct Storage {
    entries: HashMap<NodeId, StoredEntry>,
    max_size: usize,
    max_key_size: usize,
    max_value_size: usize,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(MAX_STORE_SIZE, MAX_KEY_SIZE, MAX_VALUE_SIZE)
    }
}

impl Storage {
    #[must_use]
    pub fn new(max_size: usize, max_key_size: usize, max_value_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_size,
            max_key_size,
            max_value_size,
        }
    }

    /// Validate a `put`'s key/value against this store's configured size
    /// caps (spec §4.4 step 1: `KeyTooLarge` / `ValueTooLarge`).
    pub fn validate_put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::EmptyKey);
        }
        if key.len() > self.max_key_size {
            return Err(StorageError::KeyTooLarge(key.len()));
        }
        if value.len() > self.max_value_size {
            return Err(StorageError::ValueTooLarge(value.len()));
        }
        Ok(())
    }

    /// Validates an inbound STORE's raw fields: rejects placeholder strings
    /// and empty keys, as spec'd for the inbound handler.
    pub fn validate_inbound(key: &str, value: &str) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::EmptyKey);
        }
        if matches!(value, ":" | "undefined" | "null") {
            return Err(StorageError::InvalidValue);
        }
        Ok(())
    }

    /// Insert or overwrite an entry, evicting if necessary to stay within
    /// `max_size`. Returns the ids evicted, if any.
    pub fn put(
        &mut self,
        key_hash: NodeId,
        value: Vec<u8>,
        origin_local: bool,
        original_key: Option<String>,
    ) -> Vec<NodeId> {
        let mut evicted = Vec::new();
        if !self.entries.contains_key(&key_hash) && self.entries.len() >= self.max_size {
            if let Some(victim) = self.select_eviction_victim() {
                self.entries.remove(&victim);
                evicted.push(victim);
            }
        }
        self.entries.insert(
            key_hash,
            StoredEntry {
                value,
                stored_at: Instant::now(),
                replicated_to: HashSet::new(),
                origin_local,
                original_key,
            },
        );
        evicted
    }

    /// Smallest `stored_at` among non-local-origin entries first; ties
    /// broken by insertion order (HashMap iteration order is not
    /// insertion-stable, so this best-effort tie-break favors the first
    /// candidate encountered with the minimal timestamp).
    fn select_eviction_victim(&self) -> Option<NodeId> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.origin_local)
            .min_by_key(|(_, e)| e.stored_at)
            .map(|(id, _)| *id)
            .or_else(|| self.entries.iter().min_by_key(|(_, e)| e.stored_at).map(|(id, _)| *id))
    }

    #[must_use]
    pub fn get(&self, key_hash: &NodeId) -> Option<&StoredEntry> {
        self.entries.get(key_hash)
    }

    pub fn record_replicated(&mut self, key_hash: &NodeId, peer: NodeId) {
        if let Some(entry) = self.entries.get_mut(key_hash) {
            entry.replicated_to.insert(peer);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All stored key hashes, for replication/republish sweeps.
    pub fn keys(&self) -> impl Iterator<Item = &NodeId> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &StoredEntry)> {
        self.entries.iter()
    }

    /// Entries whose origin is local and older than `age`, i.e. due for
    /// republish.
    pub fn local_entries_older_than(&self, age: Duration) -> Vec<NodeId> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|(_, e)| e.origin_local && now.duration_since(e.stored_at) >= age)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> NodeId {
        NodeId::from_bytes([b; 20])
    }

    #[test]
    fn put_then_get_round_trips() {
        let mut storage = Storage::new(MAX_STORE_SIZE, MAX_KEY_SIZE, MAX_VALUE_SIZE);
        storage.put(id(1), b"hello".to_vec(), true, None);
        assert_eq!(storage.get(&id(1)).unwrap().value, b"hello");
    }

    #[test]
    fn validate_put_rejects_oversized_key_and_value() {
        let storage = Storage::default();
        let big_key = "x".repeat(MAX_KEY_SIZE + 1);
        assert_eq!(
            storage.validate_put(&big_key, b"v"),
            Err(StorageError::KeyTooLarge(big_key.len()))
        );
        let big_value = vec![0u8; MAX_VALUE_SIZE + 1];
        assert_eq!(
            storage.validate_put("k", &big_value),
            Err(StorageError::ValueTooLarge(big_value.len()))
        );
    }

    #[test]
    fn validate_put_honors_configured_caps() {
        let storage = Storage::new(MAX_STORE_SIZE, 4, 4);
        assert_eq!(
            storage.validate_put("toolong", b"v"),
            Err(StorageError::KeyTooLarge(7))
        );
        assert!(storage.validate_put("ok", b"v").is_ok());
    }

    #[test]
    fn validate_inbound_rejects_placeholder_values() {
        assert!(Storage::validate_inbound("k", "undefined").is_err());
        assert!(Storage::validate_inbound("k", "null").is_err());
        assert!(Storage::validate_inbound("k", ":").is_err());
        assert!(Storage::validate_inbound("", "v").is_err());
        assert!(Storage::validate_inbound("k", "v").is_ok());
    }

    #[test]
    fn size_never_exceeds_cap_after_many_puts() {
        let mut storage = Storage::new(4, MAX_KEY_SIZE, MAX_VALUE_SIZE);
        for i in 0u8..20 {
            storage.put(id(i), vec![i], false, None);
            assert!(storage.len() <= 4);
        }
    }

    #[test]
    fn eviction_prefers_non_local_origin_entries() {
        let mut storage = Storage::new(2, MAX_KEY_SIZE, MAX_VALUE_SIZE);
        storage.put(id(1), b"local".to_vec(), true, None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        storage.put(id(2), b"remote".to_vec(), false, None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        // Third insert should evict id(2) (non-local, oldest among non-local)
        // rather than the local-origin id(1), even though id(1) is older.
        storage.put(id(3), b"remote2".to_vec(), false, None);
        assert!(storage.get(&id(1)).is_some());
        assert!(storage.get(&id(2)).is_none());
    }

    #[test]
    fn record_replicated_tracks_peers() {
        let mut storage = Storage::new(MAX_STORE_SIZE, MAX_KEY_SIZE, MAX_VALUE_SIZE);
        storage.put(id(1), b"v".to_vec(), true, None);
        storage.record_replicated(&id(1), id(2));
        assert!(storage.get(&id(1)).unwrap().replicated_to.contains(&id(2)));
    }
}
