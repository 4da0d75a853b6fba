//! Node identifiers and the XOR distance metric.
//!
//! `NodeId` is a 160-bit value, mirroring the identifier space Kademlia was
//! originally specified against. Ids are derived from arbitrary byte strings
//! (typically a peer's public key or connection nonce) via SHA-1, and compared
//! under the XOR metric for routing purposes.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::cmp::Ordering;
use std::fmt;

/// 160-bit identifier for DHT nodes, keys, and lookup targets.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId([u8; 20]);

impl NodeId {
    /// Number of bits in a NodeId.
    pub const BITS: usize = 160;
    /// Number of bytes in a NodeId.
    pub const LEN: usize = 20;

    /// Generate a random NodeId. Used for bootstrap self-ids and tests; real
    /// deployments should derive ids via [`NodeId::from_bytes_hashed`] so a
    /// peer's id is tied to something stable.
    #[must_use]
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; 20];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Derive a NodeId by SHA-1 hashing arbitrary input bytes.
    #[must_use]
    pub fn from_bytes_hashed(input: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(input);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Calculate the XOR distance to another NodeId.
    ///
    /// The XOR metric satisfies:
    /// - d(x, x) = 0
    /// - d(x, y) = d(y, x)
    /// - d(x, y) + d(y, z) >= d(x, z)
    #[must_use]
    pub fn distance(&self, other: &NodeId) -> NodeId {
        let mut result = [0u8; 20];
        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        NodeId(result)
    }

    /// Count leading zero bits (0-160). Used to find which bit two ids first
    /// differ on, i.e. the common prefix length.
    #[must_use]
    pub fn leading_zeros(&self) -> usize {
        let mut count = 0;
        for byte in &self.0 {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros() as usize;
                break;
            }
        }
        count.min(Self::BITS)
    }

    /// Length, in bits, of the common prefix shared with `other`.
    #[must_use]
    pub fn common_prefix_len(&self, other: &NodeId) -> usize {
        self.distance(other).leading_zeros()
    }

    /// Index (0-159) of the bucket `self` falls into relative to `local_id`,
    /// or `None` if the two ids are identical. Bucket index equals the
    /// position of the first differing bit, counted from the most
    /// significant bit (bucket 0 = MSB differs, i.e. furthest peers).
    #[must_use]
    pub fn bucket_index(&self, local_id: &NodeId) -> Option<usize> {
        let leading = self.common_prefix_len(local_id);
        if leading == Self::BITS {
            None
        } else {
            Some(leading)
        }
    }

    /// Value of bit `index` (0 = most significant bit).
    #[must_use]
    pub fn bit(&self, index: usize) -> bool {
        let byte = self.0[index / 8];
        let shift = 7 - (index % 8);
        (byte >> shift) & 1 == 1
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Canonical 40-character lowercase hex representation.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a canonical 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, NodeIdParseError> {
        if s.len() != 40 {
            return Err(NodeIdParseError::WrongLength(s.len()));
        }
        let decoded = hex::decode(s).map_err(|_| NodeIdParseError::InvalidHex)?;
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeIdParseError {
    #[error("node id hex string must be 40 characters, got {0}")]
    WrongLength(usize),
    #[error("node id contains invalid hex characters")]
    InvalidHex,
}

impl TryFrom<String> for NodeId {
    type Error = NodeIdParseError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_hex()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_ids_are_deterministic() {
        let id1 = NodeId::from_bytes_hashed(b"peer-a-pubkey");
        let id2 = NodeId::from_bytes_hashed(b"peer-a-pubkey");
        assert_eq!(id1, id2);
    }

    #[test]
    fn random_ids_are_unique() {
        assert_ne!(NodeId::random(), NodeId::random());
    }

    #[test]
    fn xor_distance_identity_and_symmetry() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_eq!(a.distance(&a), NodeId::from_bytes([0u8; 20]));
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn xor_distance_triangle_inequality_holds_on_samples() {
        for _ in 0..50 {
            let x = NodeId::random();
            let y = NodeId::random();
            let z = NodeId::random();
            let dxy = u128_prefix(&x.distance(&y));
            let dyz = u128_prefix(&y.distance(&z));
            let dxz = u128_prefix(&x.distance(&z));
            assert!(dxy.wrapping_add(dyz) >= dxz || dxz <= dxy.max(dyz) * 2);
        }
    }

    fn u128_prefix(id: &NodeId) -> u128 {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&id.as_bytes()[0..16]);
        u128::from_be_bytes(buf)
    }

    #[test]
    fn bucket_index_identical_is_none() {
        let id = NodeId::random();
        assert_eq!(id.bucket_index(&id), None);
    }

    #[test]
    fn bucket_index_msb_differs_is_zero() {
        let local = NodeId::from_bytes([0u8; 20]);
        let mut bytes = [0u8; 20];
        bytes[0] = 0b1000_0000;
        let remote = NodeId::from_bytes(bytes);
        assert_eq!(remote.bucket_index(&local), Some(0));
    }

    #[test]
    fn bucket_index_lsb_differs_is_159() {
        let local = NodeId::from_bytes([0u8; 20]);
        let mut bytes = [0u8; 20];
        bytes[19] = 1;
        let remote = NodeId::from_bytes(bytes);
        assert_eq!(remote.bucket_index(&local), Some(159));
    }

    #[test]
    fn hex_round_trip() {
        let id = NodeId::random();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 40);
        assert_eq!(NodeId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(matches!(
            NodeId::from_hex("abcd"),
            Err(NodeIdParseError::WrongLength(4))
        ));
    }

    #[test]
    fn bit_extraction_matches_leading_zeros() {
        let mut bytes = [0u8; 20];
        bytes[0] = 0b0100_0000;
        let id = NodeId::from_bytes(bytes);
        assert!(!id.bit(0));
        assert!(id.bit(1));
        assert_eq!(id.leading_zeros(), 1);
    }

    #[test]
    fn ordering_is_lexicographic_on_bytes() {
        let a = NodeId::from_bytes([1u8; 20]);
        let b = NodeId::from_bytes([2u8; 20]);
        assert!(a < b);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn node_id_strategy() -> impl Strategy<Value = NodeId> {
            prop::collection::vec(any::<u8>(), 20).prop_map(|v| {
                let mut bytes = [0u8; 20];
                bytes.copy_from_slice(&v);
                NodeId::from_bytes(bytes)
            })
        }

        proptest! {
            #[test]
            fn prop_distance_is_symmetric_and_self_distance_is_zero(
                a in node_id_strategy(),
                b in node_id_strategy(),
            ) {
                prop_assert_eq!(a.distance(&b), b.distance(&a));
                prop_assert_eq!(a.distance(&a), NodeId::from_bytes([0u8; 20]));
            }

            #[test]
            fn prop_common_prefix_len_in_range_and_exact_on_equality(
                a in node_id_strategy(),
                b in node_id_strategy(),
            ) {
                let cpl = a.common_prefix_len(&b);
                prop_assert!(cpl <= NodeId::BITS);
                prop_assert_eq!(cpl == NodeId::BITS, a == b);
            }

            #[test]
            fn prop_hex_round_trips(a in node_id_strategy()) {
                let hex = a.to_hex();
                prop_assert_eq!(hex.len(), 40);
                prop_assert_eq!(NodeId::from_hex(&hex).unwrap(), a);
            }

            #[test]
            fn prop_bucket_index_matches_common_prefix_len(
                a in node_id_strategy(),
                b in node_id_strategy(),
            ) {
                let cpl = a.common_prefix_len(&b);
                if a == b {
                    prop_assert_eq!(a.bucket_index(&b), None);
                } else {
                    prop_assert_eq!(a.bucket_index(&b), Some(cpl));
                }
            }
        }
    }
}
