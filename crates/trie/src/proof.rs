//! Trie proof paths.

use crate::node::{interior_hash, leaf_hash};
use byzcoin_types::{sha256, Hash, InstanceId, StateInstance};
use parity_scale_codec::{Decode, Encode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("path does not hash to the expected root")]
    RootMismatch,
    #[error("witness leaf does not lie on the key's path")]
    MisplacedLeaf,
}

/// The sibling hashes along one key's path, plus the terminal leaf.
///
/// Serves as inclusion proof when the leaf carries the queried key live, and
/// as exclusion proof when the terminal is empty, a different leaf, or a
/// tombstone.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct TriePath {
    siblings: Vec<Hash>,
    leaf: Option<(InstanceId, StateInstance)>,
}

impl TriePath {
    pub fn new(siblings: Vec<Hash>, leaf: Option<(InstanceId, StateInstance)>) -> Self {
        Self { siblings, leaf }
    }

    /// The terminal leaf, live or tombstoned, if any.
    pub fn leaf(&self) -> Option<&(InstanceId, StateInstance)> {
        self.leaf.as_ref()
    }

    /// True when this path proves `key` present and live.
    pub fn matches(&self, key: &InstanceId) -> bool {
        matches!(&self.leaf, Some((k, payload)) if k == key && !payload.tombstone)
    }

    /// The proven value, when `matches`.
    pub fn value(&self) -> Option<&StateInstance> {
        match &self.leaf {
            Some((_, payload)) if !payload.tombstone => Some(payload),
            _ => None,
        }
    }

    /// Check the path against a trusted root for `key`.
    ///
    /// Returns the live instance for an inclusion proof, `None` for a valid
    /// exclusion proof, and an error for any tampered path.
    pub fn verify(&self, root: &Hash, key: &InstanceId) -> Result<Option<StateInstance>, PathError> {
        let query_path = sha256(key.as_bytes());

        let mut cursor = match &self.leaf {
            Some((leaf_key, payload)) => {
                if leaf_key != key {
                    // A foreign witness leaf must lie on the queried path:
                    // its own path bits agree for every traversed depth.
                    let leaf_path = sha256(leaf_key.as_bytes());
                    for depth in 0..self.siblings.len() {
                        if leaf_path.bit(depth) != query_path.bit(depth) {
                            return Err(PathError::MisplacedLeaf);
                        }
                    }
                }
                leaf_hash(leaf_key, payload)
            }
            None => Hash::ZERO,
        };

        for depth in (0..self.siblings.len()).rev() {
            cursor = if query_path.bit(depth) {
                interior_hash(&self.siblings[depth], &cursor)
            } else {
                interior_hash(&cursor, &self.siblings[depth])
            };
        }

        if cursor != *root {
            return Err(PathError::RootMismatch);
        }

        match &self.leaf {
            Some((leaf_key, payload)) if leaf_key == key && !payload.tombstone => {
                Ok(Some(payload.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::Trie;
    use byzcoin_types::{StateChange, StateChangeKind};

    fn populated_trie() -> Trie {
        let mut trie = Trie::new();
        let changes: Vec<StateChange> = (1..=8u8)
            .map(|i| StateChange {
                kind: StateChangeKind::Create,
                instance_id: InstanceId([i; 32]),
                contract_id: "value".into(),
                value: vec![i; 4],
                darc_id: Hash::ZERO,
                version: 0,
            })
            .collect();
        trie.apply(&changes).unwrap();
        trie
    }

    #[test]
    fn inclusion_proof_verifies() {
        let trie = populated_trie();
        let key = InstanceId([3; 32]);
        let path = trie.proof_path(&key).unwrap();
        assert!(path.matches(&key));
        let instance = path.verify(&trie.root(), &key).unwrap().unwrap();
        assert_eq!(instance.value, vec![3; 4]);
    }

    #[test]
    fn exclusion_proof_verifies() {
        let trie = populated_trie();
        let key = InstanceId([99; 32]);
        let path = trie.proof_path(&key).unwrap();
        assert!(!path.matches(&key));
        assert!(path.verify(&trie.root(), &key).unwrap().is_none());
    }

    #[test]
    fn tampered_value_is_rejected() {
        let trie = populated_trie();
        let key = InstanceId([3; 32]);
        let mut path = trie.proof_path(&key).unwrap();
        if let Some((_, payload)) = path.leaf.as_mut() {
            payload.value = vec![0xde, 0xad];
        }
        assert!(path.verify(&trie.root(), &key).is_err());
    }

    #[test]
    fn tampered_sibling_is_rejected() {
        let trie = populated_trie();
        let key = InstanceId([3; 32]);
        let mut path = trie.proof_path(&key).unwrap();
        if let Some(s) = path.siblings.first_mut() {
            *s = Hash::of(b"forged");
        }
        assert!(path.verify(&trie.root(), &key).is_err());
    }

    #[test]
    fn wrong_root_is_rejected() {
        let trie = populated_trie();
        let key = InstanceId([3; 32]);
        let path = trie.proof_path(&key).unwrap();
        assert!(path.verify(&Hash::of(b"other"), &key).is_err());
    }

    #[test]
    fn reused_path_never_proves_a_foreign_key() {
        let trie = populated_trie();
        let present = InstanceId([3; 32]);
        let path = trie.proof_path(&present).unwrap();
        // An inclusion path replayed for another key must not prove a value:
        // either the placement check rejects it or it degrades to exclusion.
        for other in [InstanceId([99; 32]), InstanceId([4; 32])] {
            let outcome = path.verify(&trie.root(), &other);
            assert!(matches!(outcome, Err(_) | Ok(None)));
        }
    }
}
