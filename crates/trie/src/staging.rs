//! Staged view of the trie during transaction execution.
//!
//! Instructions within one transaction see each other's writes through the
//! staging layer; a failed transaction rolls back atomically without
//! touching the changes committed by earlier transactions in the block.

use crate::trie::{Trie, TrieError, TrieView};
use byzcoin_types::{InstanceId, StateChange, StateChangeKind, StateInstance};
use std::collections::BTreeMap;

fn instance_of(change: &StateChange) -> StateInstance {
    StateInstance {
        contract_id: change.contract_id.clone(),
        version: change.version,
        value: change.value.clone(),
        darc_id: change.darc_id,
        tombstone: change.kind == StateChangeKind::Remove,
    }
}

/// Overlay on top of an immutable trie snapshot.
///
/// Two layers: changes committed by earlier transactions of the block, and
/// changes pending for the transaction currently executing.
pub struct StagingTrie<'a> {
    base: &'a Trie,
    committed: BTreeMap<InstanceId, StateInstance>,
    committed_log: Vec<StateChange>,
    pending: BTreeMap<InstanceId, StateInstance>,
    pending_log: Vec<StateChange>,
}

impl<'a> StagingTrie<'a> {
    pub fn new(base: &'a Trie) -> Self {
        Self {
            base,
            committed: BTreeMap::new(),
            committed_log: Vec::new(),
            pending: BTreeMap::new(),
            pending_log: Vec::new(),
        }
    }

    /// The instance under `key` including tombstones, overlay first.
    fn get_any(&self, key: &InstanceId) -> Option<StateInstance> {
        if let Some(instance) = self.pending.get(key) {
            return Some(instance.clone());
        }
        if let Some(instance) = self.committed.get(key) {
            return Some(instance.clone());
        }
        self.base.get_with_tombstone(key)
    }

    /// Stage one change for the current transaction, validating it against
    /// the latest staged view.
    pub fn stage(&mut self, change: StateChange) -> Result<(), TrieError> {
        let existing = self.get_any(&change.instance_id);
        let live = existing.as_ref().is_some_and(|i| !i.tombstone);
        match change.kind {
            StateChangeKind::Create => {
                if existing.is_some() {
                    return Err(TrieError::AlreadyExists(change.instance_id));
                }
            }
            StateChangeKind::Update | StateChangeKind::Remove => {
                if !live {
                    return Err(TrieError::Absent(change.instance_id));
                }
            }
        }
        self.pending.insert(change.instance_id, instance_of(&change));
        self.pending_log.push(change);
        Ok(())
    }

    /// Make the current transaction's writes visible to the next one.
    pub fn commit_tx(&mut self) {
        self.committed.append(&mut self.pending);
        self.committed_log.append(&mut self.pending_log);
    }

    /// Discard the current transaction's writes.
    pub fn rollback_tx(&mut self) {
        self.pending.clear();
        self.pending_log.clear();
    }

    /// The ordered change log of all committed transactions.
    pub fn into_changes(self) -> Vec<StateChange> {
        self.committed_log
    }

    /// Number of changes committed so far (pending excluded).
    pub fn committed_len(&self) -> usize {
        self.committed_log.len()
    }
}

impl TrieView for StagingTrie<'_> {
    fn get(&self, key: &InstanceId) -> Option<StateInstance> {
        self.get_any(key).filter(|i| !i.tombstone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byzcoin_types::Hash;

    fn create(seed: u8) -> StateChange {
        StateChange::create(
            InstanceId([seed; 32]),
            "value".into(),
            vec![seed],
            Hash::ZERO,
        )
    }

    #[test]
    fn pending_writes_visible_within_tx() {
        let trie = Trie::new();
        let mut staging = StagingTrie::new(&trie);
        staging.stage(create(1)).unwrap();
        assert!(staging.get(&InstanceId([1; 32])).is_some());
    }

    #[test]
    fn rollback_discards_only_pending() {
        let trie = Trie::new();
        let mut staging = StagingTrie::new(&trie);

        staging.stage(create(1)).unwrap();
        staging.commit_tx();

        staging.stage(create(2)).unwrap();
        staging.rollback_tx();

        assert!(staging.get(&InstanceId([1; 32])).is_some());
        assert!(staging.get(&InstanceId([2; 32])).is_none());
        assert_eq!(staging.into_changes().len(), 1);
    }

    #[test]
    fn remove_hides_instance_from_later_instructions() {
        let trie = Trie::new();
        let mut staging = StagingTrie::new(&trie);
        staging.stage(create(1)).unwrap();
        staging
            .stage(StateChange::remove(
                InstanceId([1; 32]),
                "value".into(),
                Hash::ZERO,
                1,
            ))
            .unwrap();
        assert!(staging.get(&InstanceId([1; 32])).is_none());

        // Updating the tombstoned instance fails.
        let err = staging.stage(StateChange::update(
            InstanceId([1; 32]),
            "value".into(),
            vec![9],
            Hash::ZERO,
            2,
        ));
        assert!(err.is_err());
    }

    #[test]
    fn staged_changes_replay_onto_trie() {
        let mut trie = Trie::new();
        let changes = {
            let mut staging = StagingTrie::new(&trie);
            staging.stage(create(1)).unwrap();
            staging.stage(create(2)).unwrap();
            staging.commit_tx();
            staging.into_changes()
        };
        trie.apply(&changes).unwrap();
        assert!(trie.get(&InstanceId([1; 32])).is_some());
        assert!(trie.get(&InstanceId([2; 32])).is_some());
    }
}
