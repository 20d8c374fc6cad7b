//! Trie nodes and their hashing.

use byzcoin_types::{sha256, Hash, InstanceId, StateInstance};
use parity_scale_codec::Encode;

const LEAF_TAG: u8 = 0x01;
const INTERIOR_TAG: u8 = 0x02;

/// A node of the trie. The absent child is represented by `Hash::ZERO`
/// rather than a stored node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Leaf {
        key: InstanceId,
        payload: StateInstance,
    },
    Interior {
        left: Hash,
        right: Hash,
    },
}

impl Node {
    pub fn hash(&self) -> Hash {
        match self {
            Node::Leaf { key, payload } => leaf_hash(key, payload),
            Node::Interior { left, right } => interior_hash(left, right),
        }
    }
}

/// `SHA-256(0x01 || key || payload)`.
pub fn leaf_hash(key: &InstanceId, payload: &StateInstance) -> Hash {
    let mut data = Vec::with_capacity(1 + 32 + 64);
    data.push(LEAF_TAG);
    data.extend_from_slice(key.as_bytes());
    data.extend_from_slice(&payload.encode());
    sha256(&data)
}

/// `SHA-256(0x02 || left || right)`.
pub fn interior_hash(left: &Hash, right: &Hash) -> Hash {
    let mut data = Vec::with_capacity(1 + 64);
    data.push(INTERIOR_TAG);
    data.extend_from_slice(left.as_bytes());
    data.extend_from_slice(right.as_bytes());
    sha256(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(version: u64) -> StateInstance {
        StateInstance {
            contract_id: "value".into(),
            version,
            value: vec![1, 2, 3],
            darc_id: Hash::ZERO,
            tombstone: false,
        }
    }

    #[test]
    fn leaf_hash_depends_on_payload() {
        let key = InstanceId([7u8; 32]);
        assert_ne!(leaf_hash(&key, &payload(0)), leaf_hash(&key, &payload(1)));
    }

    #[test]
    fn interior_hash_is_order_sensitive() {
        let a = Hash::of(b"a");
        let b = Hash::of(b"b");
        assert_ne!(interior_hash(&a, &b), interior_hash(&b, &a));
    }
}
