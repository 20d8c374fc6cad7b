//! The trie proper: lookup, change application, proof extraction.

use crate::node::{interior_hash, leaf_hash, Node};
use crate::proof::TriePath;
use byzcoin_types::{sha256, Hash, InstanceId, StateChange, StateChangeKind, StateInstance};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrieError {
    #[error("create on existing instance {0:?}")]
    AlreadyExists(InstanceId),
    #[error("update or remove on absent instance {0:?}")]
    Absent(InstanceId),
    #[error("ERR_STATE_CORRUPTED: missing node {0} under root")]
    MissingNode(Hash),
}

/// Read access to the latest staged view of the state.
///
/// Contract handlers receive a `&dyn TrieView`; within one transaction each
/// instruction sees the writes of the instructions before it.
pub trait TrieView {
    /// The live instance under `key`, or `None` if absent or tombstoned.
    fn get(&self, key: &InstanceId) -> Option<StateInstance>;
}

/// A content-addressed Merkle trie.
///
/// Old roots remain valid after `apply`; nodes are only ever added.
#[derive(Clone, Debug, Default)]
pub struct Trie {
    nodes: HashMap<Hash, Node>,
    root: Hash,
}

impl Trie {
    /// An empty trie; its root is the zero hash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a trie from exported nodes and a trusted root.
    pub fn with_nodes(nodes: HashMap<Hash, Node>, root: Hash) -> Self {
        Self { nodes, root }
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    /// All nodes, for persistence.
    pub fn nodes(&self) -> &HashMap<Hash, Node> {
        &self.nodes
    }

    fn node(&self, hash: &Hash) -> Result<&Node, TrieError> {
        self.nodes.get(hash).ok_or(TrieError::MissingNode(*hash))
    }

    /// Look up the live instance under `key` at the current root.
    pub fn get(&self, key: &InstanceId) -> Option<StateInstance> {
        self.get_at(self.root, key)
    }

    /// Look up under an explicit root (readers holding old snapshots).
    pub fn get_at(&self, root: Hash, key: &InstanceId) -> Option<StateInstance> {
        let path = sha256(key.as_bytes());
        let mut cursor = root;
        let mut depth = 0usize;
        loop {
            if cursor.is_zero() {
                return None;
            }
            match self.nodes.get(&cursor)? {
                Node::Leaf { key: k, payload } => {
                    return if k == key && !payload.tombstone {
                        Some(payload.clone())
                    } else {
                        None
                    };
                }
                Node::Interior { left, right } => {
                    cursor = if path.bit(depth) { *right } else { *left };
                    depth += 1;
                }
            }
        }
    }

    /// Apply an ordered change-set and return the new root, publishing it as
    /// the trie's current root.
    ///
    /// A pure function of the prior root and the change list: changes are
    /// stable-sorted by key first, so the result does not depend on the
    /// order in which they were produced.
    pub fn apply(&mut self, changes: &[StateChange]) -> Result<Hash, TrieError> {
        let root = self.apply_preview(changes)?;
        self.root = root;
        Ok(root)
    }

    /// Compute the root a change-set would produce without moving the
    /// current root. Inserted nodes are kept (they are content-addressed),
    /// so a later `set_root` makes the preview current.
    pub fn apply_preview(&mut self, changes: &[StateChange]) -> Result<Hash, TrieError> {
        let mut sorted: Vec<&StateChange> = changes.iter().collect();
        sorted.sort_by_key(|c| c.instance_id);

        let mut root = self.root;
        for change in sorted {
            root = self.apply_one(root, change)?;
        }
        Ok(root)
    }

    /// Adopt a previously previewed root.
    pub fn set_root(&mut self, root: Hash) {
        self.root = root;
    }

    /// Restore one leaf verbatim, tombstone flag included, and publish the
    /// new root. Used when rebuilding the trie from persisted instances;
    /// the structure is history-independent, so loading leaves in any
    /// order reproduces the original root.
    pub fn load_leaf(&mut self, key: InstanceId, payload: StateInstance) -> Result<Hash, TrieError> {
        let path = sha256(key.as_bytes());
        let root = self.insert(self.root, &path, key, payload, 0)?;
        self.root = root;
        Ok(root)
    }

    fn apply_one(&mut self, root: Hash, change: &StateChange) -> Result<Hash, TrieError> {
        let existing = self.get_any(root, &change.instance_id);
        match change.kind {
            StateChangeKind::Create => {
                if existing.is_some() {
                    return Err(TrieError::AlreadyExists(change.instance_id));
                }
            }
            StateChangeKind::Update | StateChangeKind::Remove => {
                if existing.is_none() {
                    return Err(TrieError::Absent(change.instance_id));
                }
            }
        }
        let payload = StateInstance {
            contract_id: change.contract_id.clone(),
            version: change.version,
            value: change.value.clone(),
            darc_id: change.darc_id,
            tombstone: change.kind == StateChangeKind::Remove,
        };
        let path = sha256(change.instance_id.as_bytes());
        self.insert(root, &path, change.instance_id, payload, 0)
    }

    /// Like `get` but also returns tombstoned leaves, so callers can
    /// distinguish "never existed" from "removed".
    pub fn get_with_tombstone(&self, key: &InstanceId) -> Option<StateInstance> {
        self.get_any(self.root, key)
    }

    /// Like `get_at` but also returns tombstoned leaves.
    fn get_any(&self, root: Hash, key: &InstanceId) -> Option<StateInstance> {
        let path = sha256(key.as_bytes());
        let mut cursor = root;
        let mut depth = 0usize;
        loop {
            if cursor.is_zero() {
                return None;
            }
            match self.nodes.get(&cursor)? {
                Node::Leaf { key: k, payload } => {
                    return (k == key).then(|| payload.clone());
                }
                Node::Interior { left, right } => {
                    cursor = if path.bit(depth) { *right } else { *left };
                    depth += 1;
                }
            }
        }
    }

    fn put(&mut self, node: Node) -> Hash {
        let hash = node.hash();
        self.nodes.insert(hash, node);
        hash
    }

    fn insert(
        &mut self,
        cursor: Hash,
        path: &Hash,
        key: InstanceId,
        payload: StateInstance,
        depth: usize,
    ) -> Result<Hash, TrieError> {
        if cursor.is_zero() {
            return Ok(self.put(Node::Leaf { key, payload }));
        }
        match self.node(&cursor)?.clone() {
            Node::Leaf {
                key: other_key,
                payload: other_payload,
            } => {
                if other_key == key {
                    return Ok(self.put(Node::Leaf { key, payload }));
                }
                // Split: push both leaves down until their paths diverge.
                let other_path = sha256(other_key.as_bytes());
                self.split(path, key, payload, &other_path, other_key, other_payload, depth)
            }
            Node::Interior { left, right } => {
                let (new_left, new_right) = if path.bit(depth) {
                    (left, self.insert(right, path, key, payload, depth + 1)?)
                } else {
                    (self.insert(left, path, key, payload, depth + 1)?, right)
                };
                Ok(self.put(Node::Interior {
                    left: new_left,
                    right: new_right,
                }))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn split(
        &mut self,
        path: &Hash,
        key: InstanceId,
        payload: StateInstance,
        other_path: &Hash,
        other_key: InstanceId,
        other_payload: StateInstance,
        depth: usize,
    ) -> Result<Hash, TrieError> {
        // Find the first bit where the two paths diverge, from `depth` on.
        let mut diverge = depth;
        while path.bit(diverge) == other_path.bit(diverge) {
            diverge += 1;
            debug_assert!(diverge < 256, "distinct keys share a full 256-bit path");
        }

        let new_leaf = self.put(Node::Leaf { key, payload });
        let other_leaf = self.put(Node::Leaf {
            key: other_key,
            payload: other_payload,
        });
        let mut node = if path.bit(diverge) {
            self.put(Node::Interior {
                left: other_leaf,
                right: new_leaf,
            })
        } else {
            self.put(Node::Interior {
                left: new_leaf,
                right: other_leaf,
            })
        };

        // Wrap in single-child interiors back up to `depth`.
        for d in (depth..diverge).rev() {
            node = if path.bit(d) {
                self.put(Node::Interior {
                    left: Hash::ZERO,
                    right: node,
                })
            } else {
                self.put(Node::Interior {
                    left: node,
                    right: Hash::ZERO,
                })
            };
        }
        Ok(node)
    }

    /// Extract the proof path for `key` at the current root.
    ///
    /// The same structure serves as inclusion proof (terminal leaf matches
    /// the key and is live) and exclusion proof (terminal is empty, a
    /// different leaf, or a tombstone).
    pub fn proof_path(&self, key: &InstanceId) -> Result<TriePath, TrieError> {
        let path = sha256(key.as_bytes());
        let mut siblings = Vec::new();
        let mut cursor = self.root;
        let mut depth = 0usize;
        loop {
            if cursor.is_zero() {
                return Ok(TriePath::new(siblings, None));
            }
            match self.node(&cursor)? {
                Node::Leaf { key: k, payload } => {
                    return Ok(TriePath::new(siblings, Some((*k, payload.clone()))));
                }
                Node::Interior { left, right } => {
                    if path.bit(depth) {
                        siblings.push(*left);
                        cursor = *right;
                    } else {
                        siblings.push(*right);
                        cursor = *left;
                    }
                    depth += 1;
                }
            }
        }
    }
}

impl TrieView for Trie {
    fn get(&self, key: &InstanceId) -> Option<StateInstance> {
        Trie::get(self, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(kind: StateChangeKind, seed: u8, version: u64) -> StateChange {
        StateChange {
            kind,
            instance_id: InstanceId([seed; 32]),
            contract_id: "value".into(),
            value: vec![seed, seed, seed],
            darc_id: Hash::ZERO,
            version,
        }
    }

    #[test]
    fn empty_trie_has_zero_root() {
        let trie = Trie::new();
        assert_eq!(trie.root(), Hash::ZERO);
        assert!(trie.get(&InstanceId([1; 32])).is_none());
    }

    #[test]
    fn create_then_get() {
        let mut trie = Trie::new();
        trie.apply(&[change(StateChangeKind::Create, 1, 0)]).unwrap();
        let got = trie.get(&InstanceId([1; 32])).unwrap();
        assert_eq!(got.value, vec![1, 1, 1]);
        assert_eq!(got.version, 0);
    }

    #[test]
    fn root_is_order_independent() {
        let a = change(StateChangeKind::Create, 1, 0);
        let b = change(StateChangeKind::Create, 2, 0);
        let c = change(StateChangeKind::Create, 3, 0);

        let mut t1 = Trie::new();
        let r1 = t1.apply(&[a.clone(), b.clone(), c.clone()]).unwrap();
        let mut t2 = Trie::new();
        let r2 = t2.apply(&[c, a, b]).unwrap();
        assert_eq!(r1, r2);
    }

    #[test]
    fn update_changes_root_deterministically() {
        let mut t1 = Trie::new();
        t1.apply(&[change(StateChangeKind::Create, 1, 0)]).unwrap();
        t1.apply(&[change(StateChangeKind::Update, 1, 1)]).unwrap();

        let mut t2 = Trie::new();
        t2.apply(&[change(StateChangeKind::Create, 1, 0)]).unwrap();
        t2.apply(&[change(StateChangeKind::Update, 1, 1)]).unwrap();
        assert_eq!(t1.root(), t2.root());
    }

    #[test]
    fn create_on_existing_fails() {
        let mut trie = Trie::new();
        trie.apply(&[change(StateChangeKind::Create, 1, 0)]).unwrap();
        let err = trie.apply(&[change(StateChangeKind::Create, 1, 0)]);
        assert!(matches!(err, Err(TrieError::AlreadyExists(_))));
    }

    #[test]
    fn update_on_absent_fails() {
        let mut trie = Trie::new();
        let err = trie.apply(&[change(StateChangeKind::Update, 1, 1)]);
        assert!(matches!(err, Err(TrieError::Absent(_))));
    }

    #[test]
    fn remove_tombstones_but_keeps_leaf() {
        let mut trie = Trie::new();
        trie.apply(&[change(StateChangeKind::Create, 1, 0)]).unwrap();
        trie.apply(&[change(StateChangeKind::Remove, 1, 1)]).unwrap();

        // get() answers absent, yet the proof path still carries the leaf.
        assert!(trie.get(&InstanceId([1; 32])).is_none());
        let path = trie.proof_path(&InstanceId([1; 32])).unwrap();
        assert!(!path.matches(&InstanceId([1; 32])));
        assert!(path.leaf().is_some());
    }

    #[test]
    fn preview_does_not_move_root() {
        let mut trie = Trie::new();
        let old_root = trie.root();
        let new_root = trie
            .apply_preview(&[change(StateChangeKind::Create, 1, 0)])
            .unwrap();
        assert_eq!(trie.root(), old_root);
        trie.set_root(new_root);
        assert!(trie.get(&InstanceId([1; 32])).is_some());
    }

    #[test]
    fn many_keys_round_trip() {
        let mut trie = Trie::new();
        let changes: Vec<StateChange> = (1..=50u8)
            .map(|i| change(StateChangeKind::Create, i, 0))
            .collect();
        trie.apply(&changes).unwrap();
        for i in 1..=50u8 {
            let got = trie.get(&InstanceId([i; 32])).unwrap();
            assert_eq!(got.value, vec![i, i, i]);
        }
        assert!(trie.get(&InstanceId([51; 32])).is_none());
    }
}
