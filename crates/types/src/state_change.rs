//! State changes: the deltas a transaction makes to the trie.

use crate::hash::Hash;
use crate::identifiers::{ContractId, InstanceId};
use parity_scale_codec::{Decode, Encode};

/// What a single change does to its instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum StateChangeKind {
    /// Create a new instance.
    Create,
    /// Overwrite an existing instance's value.
    Update,
    /// Tombstone an instance. The leaf stays in the trie so exclusion
    /// proofs remain complete.
    Remove,
}

/// One ordered element of a transaction's effect on the trie.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct StateChange {
    pub kind: StateChangeKind,
    pub instance_id: InstanceId,
    pub contract_id: ContractId,
    pub value: Vec<u8>,
    /// Base id of the darc governing the instance after this change.
    pub darc_id: Hash,
    /// Version of the instance after this change.
    pub version: u64,
}

impl StateChange {
    pub fn create(
        instance_id: InstanceId,
        contract_id: ContractId,
        value: Vec<u8>,
        darc_id: Hash,
    ) -> Self {
        Self {
            kind: StateChangeKind::Create,
            instance_id,
            contract_id,
            value,
            darc_id,
            version: 0,
        }
    }

    pub fn update(
        instance_id: InstanceId,
        contract_id: ContractId,
        value: Vec<u8>,
        darc_id: Hash,
        version: u64,
    ) -> Self {
        Self {
            kind: StateChangeKind::Update,
            instance_id,
            contract_id,
            value,
            darc_id,
            version,
        }
    }

    pub fn remove(instance_id: InstanceId, contract_id: ContractId, darc_id: Hash, version: u64) -> Self {
        Self {
            kind: StateChangeKind::Remove,
            instance_id,
            contract_id,
            value: Vec::new(),
            darc_id,
            version,
        }
    }
}

/// The value stored at a live trie leaf.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct StateInstance {
    pub contract_id: ContractId,
    pub version: u64,
    pub value: Vec<u8>,
    pub darc_id: Hash,
    /// Set by Remove. A tombstoned instance answers `get` as absent but its
    /// leaf still anchors proofs.
    pub tombstone: bool,
}
