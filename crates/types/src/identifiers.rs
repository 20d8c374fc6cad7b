//! Newtype identifiers used across the ledger.

use crate::hash::Hash;
use parity_scale_codec::{Decode, Encode};
use std::fmt;

/// Identifies one logical chain by its genesis block hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode)]
pub struct ChainId(pub Hash);

impl ChainId {
    pub fn as_hash(&self) -> Hash {
        self.0
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain:{:?}", self.0)
    }
}

/// The 32-byte key of an instance in the state trie.
///
/// Derived from the spawning instruction's hash, or, for darcs, the darc's
/// base id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode)]
pub struct InstanceId(pub [u8; 32]);

impl InstanceId {
    /// The all-zero instance id, home of the chain config.
    pub const ZERO: InstanceId = InstanceId([0u8; 32]);

    pub fn from_hash(h: Hash) -> Self {
        InstanceId(h.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "iid:{}", &self.to_hex()[..12])
    }
}

impl AsRef<[u8]> for InstanceId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Registered name of a contract, e.g. `"config"`, `"darc"`, `"value"`.
pub type ContractId = String;

/// Position of a server within a roster. Doubles as the leader index of a
/// view modulo the roster size.
pub type NodeIndex = u32;
