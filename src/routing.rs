//! Routing table: a binary trie of k-buckets addressed by common prefix
//! length with the local node id.

use crate::id::NodeId;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Maximum peers per leaf bucket, and the result size of `closest`.
pub const K: usize = 20;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("refusing to insert the local node id into its own routing table")]
    SelfInsert,
}

/// Result of [`RoutingTable::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
    Rejected,
}

/// A peer record as held by the routing table.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: NodeId,
    pub last_seen: Instant,
    /// Advisory round-trip quality signal, populated opportunistically from
    /// session PING round-trips. Not used for routing decisions.
    pub connection_quality: Option<f32>,
}

impl PeerRecord {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            last_seen: Instant::now(),
            connection_quality: None,
        }
    }
}

/// A leaf k-bucket: an LRU-ordered list of up to `K` peers, most-recently-seen
/// at the tail.
#[derive(Debug, Default)]
struct KBucket {
    peers: VecDeque<PeerRecord>,
}

impl KBucket {
    fn is_full(&self, k: usize) -> bool {
        self.peers.len() >= k
    }

    fn position(&self, id: &NodeId) -> Option<usize> {
        self.peers.iter().position(|p| &p.id == id)
    }

    fn touch(&mut self, id: &NodeId) -> bool {
        if let Some(pos) = self.position(id) {
            let mut record = self.peers.remove(pos).expect("position just checked");
            record.last_seen = Instant::now();
            self.peers.push_back(record);
            true
        } else {
            false
        }
    }

    fn insert_new(&mut self, id: NodeId) {
        self.peers.push_back(PeerRecord::new(id));
    }

    fn remove(&mut self, id: &NodeId) -> bool {
        if let Some(pos) = self.position(id) {
            self.peers.remove(pos);
            true
        } else {
            false
        }
    }
}

/// A node in the routing trie: either a leaf bucket or a split on one bit.
enum Bucket {
    Leaf {
        prefix_len: usize,
        bucket: KBucket,
    },
    Split {
        prefix_len: usize,
        /// Child for bit value 0 at `prefix_len`.
        zero: Box<Bucket>,
        /// Child for bit value 1 at `prefix_len`.
        one: Box<Bucket>,
    },
}

impl Bucket {
    fn leaf(prefix_len: usize) -> Self {
        Bucket::Leaf {
            prefix_len,
            bucket: KBucket::default(),
        }
    }

    fn prefix_len(&self) -> usize {
        match self {
            Bucket::Leaf { prefix_len, .. } => *prefix_len,
            Bucket::Split { prefix_len, .. } => *prefix_len,
        }
    }
}

/// Tree of k-buckets covering the 160-bit id space, split only along the
/// path that contains the local node's own id.
pub struct RoutingTable {
    local_id: NodeId,
    root: Bucket,
    /// Maximum peers per leaf bucket (spec §6.3's `k` constructor option;
    /// defaults to [`K`]).
    k: usize,
}

impl RoutingTable {
    #[must_use]
    pub fn new(local_id: NodeId) -> Self {
        Self::with_k(local_id, K)
    }

    #[must_use]
    pub fn with_k(local_id: NodeId, k: usize) -> Self {
        Self {
            local_id,
            root: Bucket::leaf(0),
            k,
        }
    }

    #[must_use]
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Add or refresh a peer. See spec'd semantics in module docs.
    pub fn add(&mut self, id: NodeId) -> Result<AddOutcome, RoutingError> {
        if id == self.local_id {
            return Err(RoutingError::SelfInsert);
        }
        Ok(Self::add_into(&mut self.root, self.local_id, id, self.k))
    }

    fn add_into(node: &mut Bucket, local_id: NodeId, id: NodeId, k: usize) -> AddOutcome {
        match node {
            Bucket::Split { prefix_len, zero, one } => {
                let child = if id.bit(*prefix_len) { one } else { zero };
                Self::add_into(child, local_id, id, k)
            }
            Bucket::Leaf { prefix_len, bucket } => {
                if bucket.touch(&id) {
                    return AddOutcome::AlreadyPresent;
                }
                if !bucket.is_full(k) {
                    bucket.insert_new(id);
                    return AddOutcome::Added;
                }
                let splittable = *prefix_len < NodeId::BITS - 1 && Self::covers_local_prefix(*prefix_len, local_id, id);
                if splittable {
                    Self::split_leaf(node, local_id);
                    return Self::add_into(node, local_id, id, k);
                }
                AddOutcome::Rejected
            }
        }
    }

    /// True if the bucket at `prefix_len` (as reached while inserting `id`)
    /// is the bucket that would also contain `local_id`, i.e. `id` and
    /// `local_id` share at least `prefix_len` leading bits.
    fn covers_local_prefix(prefix_len: usize, local_id: NodeId, id: NodeId) -> bool {
        id.common_prefix_len(&local_id) >= prefix_len
    }

    fn split_leaf(node: &mut Bucket, local_id: NodeId) {
        let (prefix_len, old) = match std::mem::replace(node, Bucket::leaf(0)) {
            Bucket::Leaf { prefix_len, bucket } => (prefix_len, bucket),
            split @ Bucket::Split { .. } => {
                *node = split;
                return;
            }
        };
        let mut zero = KBucket::default();
        let mut one = KBucket::default();
        for peer in old.peers {
            if peer.id.bit(prefix_len) {
                one.peers.push_back(peer);
            } else {
                zero.peers.push_back(peer);
            }
        }
        let _ = local_id;
        tracing::debug!(prefix_len, peers = zero.peers.len() + one.peers.len(), "routing bucket split");
        *node = Bucket::Split {
            prefix_len,
            zero: Box::new(Bucket::Leaf {
                prefix_len: prefix_len + 1,
                bucket: zero,
            }),
            one: Box::new(Bucket::Leaf {
                prefix_len: prefix_len + 1,
                bucket: one,
            }),
        };
    }

    /// Remove a peer by id. Returns true if it was present.
    pub fn remove(&mut self, id: &NodeId) -> bool {
        Self::remove_from(&mut self.root, *id)
    }

    fn remove_from(node: &mut Bucket, id: NodeId) -> bool {
        match node {
            Bucket::Split { prefix_len, zero, one } => {
                let child = if id.bit(*prefix_len) { one } else { zero };
                Self::remove_from(child, id)
            }
            Bucket::Leaf { bucket, .. } => bucket.remove(&id),
        }
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.get(id).is_some()
    }

    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<PeerRecord> {
        Self::get_from(&self.root, *id)
    }

    fn get_from(node: &Bucket, id: NodeId) -> Option<PeerRecord> {
        match node {
            Bucket::Split { prefix_len, zero, one } => {
                let child = if id.bit(*prefix_len) { one.as_ref() } else { zero.as_ref() };
                Self::get_from(child, id)
            }
            Bucket::Leaf { bucket, .. } => {
                bucket.peers.iter().find(|p| p.id == id).cloned()
            }
        }
    }

    /// Up to `n` peers closest to `target`, ascending by XOR distance, ties
    /// broken by lower id.
    #[must_use]
    pub fn closest(&self, target: &NodeId, n: usize) -> Vec<PeerRecord> {
        let mut all = Vec::new();
        Self::collect(&self.root, &mut all);
        all.sort_by(|a, b| {
            let da = a.id.distance(target);
            let db = b.id.distance(target);
            da.cmp(&db).then_with(|| a.id.cmp(&b.id))
        });
        all.truncate(n);
        all
    }

    fn collect(node: &Bucket, out: &mut Vec<PeerRecord>) {
        match node {
            Bucket::Split { zero, one, .. } => {
                Self::collect(zero, out);
                Self::collect(one, out);
            }
            Bucket::Leaf { bucket, .. } => out.extend(bucket.peers.iter().cloned()),
        }
    }

    /// Per-leaf occupancy, `(prefix_len, peer_count)`, in trie traversal
    /// order.
    #[must_use]
    pub fn stats(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        Self::stats_from(&self.root, &mut out);
        out
    }

    fn stats_from(node: &Bucket, out: &mut Vec<(usize, usize)>) {
        match node {
            Bucket::Split { zero, one, .. } => {
                Self::stats_from(zero, out);
                Self::stats_from(one, out);
            }
            Bucket::Leaf { prefix_len, bucket } => out.push((*prefix_len, bucket.peers.len())),
        }
    }

    /// Total peer count across all leaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stats().into_iter().map(|(_, n)| n).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opportunistically record an RTT-derived connection quality sample for
    /// a known peer. No-op if the peer isn't present.
    pub fn update_quality(&mut self, id: &NodeId, quality: f32) {
        Self::update_quality_in(&mut self.root, *id, quality);
    }

    fn update_quality_in(node: &mut Bucket, id: NodeId, quality: f32) {
        match node {
            Bucket::Split { prefix_len, zero, one } => {
                let child = if id.bit(*prefix_len) { one.as_mut() } else { zero.as_mut() };
                Self::update_quality_in(child, id, quality);
            }
            Bucket::Leaf { bucket, .. } => {
                if let Some(peer) = bucket.peers.iter_mut().find(|p| p.id == id) {
                    peer.connection_quality = Some(quality.clamp(0.0, 1.0));
                }
            }
        }
    }

    /// Drop peers not seen within `max_age`. Used by routing-table
    /// maintenance; returns the ids removed.
    pub fn prune_stale(&mut self, max_age: Duration) -> Vec<NodeId> {
        let mut removed = Vec::new();
        Self::prune_from(&mut self.root, max_age, &mut removed);
        removed
    }

    fn prune_from(node: &mut Bucket, max_age: Duration, removed: &mut Vec<NodeId>) {
        match node {
            Bucket::Split { zero, one, .. } => {
                Self::prune_from(zero, max_age, removed);
                Self::prune_from(one, max_age, removed);
            }
            Bucket::Leaf { bucket, .. } => {
                let now = Instant::now();
                bucket.peers.retain(|p| {
                    let keep = now.duration_since(p.last_seen) <= max_age;
                    if !keep {
                        removed.push(p.id);
                    }
                    keep
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with_prefix_zero(tail: u8) -> NodeId {
        let mut bytes = [0u8; 20];
        bytes[19] = tail;
        NodeId::from_bytes(bytes)
    }

    #[test]
    fn rejects_self_insert() {
        let local = NodeId::random();
        let mut table = RoutingTable::new(local);
        assert!(matches!(table.add(local), Err(RoutingError::SelfInsert)));
    }

    #[test]
    fn add_then_add_again_is_idempotent_refresh() {
        let local = NodeId::from_bytes([0xff; 20]);
        let mut table = RoutingTable::new(local);
        let peer = NodeId::from_bytes([0x01; 20]);
        assert_eq!(table.add(peer).unwrap(), AddOutcome::Added);
        assert_eq!(table.add(peer).unwrap(), AddOutcome::AlreadyPresent);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn closest_is_sorted_ascending_by_distance() {
        let local = NodeId::from_bytes([0u8; 20]);
        let mut table = RoutingTable::new(local);
        for i in 1u8..10 {
            table.add(NodeId::from_bytes([i; 20])).unwrap();
        }
        let target = NodeId::from_bytes([0u8; 20]);
        let closest = table.closest(&target, 5);
        assert_eq!(closest.len(), 5);
        for w in closest.windows(2) {
            let d0 = w[0].id.distance(&target);
            let d1 = w[1].id.distance(&target);
            assert!(d0 <= d1);
        }
    }

    #[test]
    fn bucket_split_keeps_all_21_peers_reachable() {
        // local id 0x00...0; all 21 peers share id[0] == 0x00 with local,
        // forcing the first bucket to split to accommodate them (scenario
        // S4).
        let local = NodeId::from_bytes([0u8; 20]);
        let mut table = RoutingTable::new(local);
        for i in 1u8..=21 {
            let mut bytes = [0u8; 20];
            bytes[1] = i; // keeps id[0] == 0, varies a lower byte
            let peer = NodeId::from_bytes(bytes);
            let outcome = table.add(peer).unwrap();
            assert_ne!(outcome, AddOutcome::Rejected, "peer {i} was rejected");
        }
        assert_eq!(table.len(), 21);
        let all = table.closest(&local, 21);
        assert_eq!(all.len(), 21);
    }

    #[test]
    fn never_exceeds_k_per_leaf() {
        let local = NodeId::from_bytes([0u8; 20]);
        let mut table = RoutingTable::new(local);
        // Peers far from local (first bit set) never cover local's prefix,
        // so once a leaf covering them fills, further inserts reject
        // instead of splitting.
        let mut rejected = 0;
        for i in 0u8..60 {
            let mut bytes = [0xffu8; 20];
            bytes[10] = i;
            let peer = NodeId::from_bytes(bytes);
            if table.add(peer).unwrap() == AddOutcome::Rejected {
                rejected += 1;
            }
        }
        for (_, count) in table.stats() {
            assert!(count <= K);
        }
        assert!(rejected > 0);
    }

    #[test]
    fn remove_and_contains() {
        let local = NodeId::random();
        let mut table = RoutingTable::new(local);
        let peer = id_with_prefix_zero(5);
        table.add(peer).unwrap();
        assert!(table.contains(&peer));
        assert!(table.remove(&peer));
        assert!(!table.contains(&peer));
        assert!(!table.remove(&peer));
    }

    #[test]
    fn local_id_never_present() {
        let local = NodeId::random();
        let table = RoutingTable::new(local);
        assert!(!table.contains(&local));
    }
}
