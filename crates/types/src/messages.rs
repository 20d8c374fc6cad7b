//! Wire messages exchanged between roster members.

use crate::block::{Block, BlockHeader, DataBody};
use crate::crypto::BlsSignature;
use crate::hash::Hash;
use crate::identifiers::{ChainId, NodeIndex};
use crate::state_change::StateChange;
use parity_scale_codec::{Decode, Encode};

/// A candidate block the leader circulates for collective signing.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct BlockProposal {
    pub chain_id: ChainId,
    /// Roster index of the proposing leader; followers refuse proposals
    /// from anyone but their current leader.
    pub leader_index: NodeIndex,
    /// Candidate header; `signature` is still `None`.
    pub header: BlockHeader,
    pub body: DataBody,
}

impl BlockProposal {
    pub fn header_hash(&self) -> Hash {
        self.header.hash()
    }
}

/// A follower's co-signature over a candidate header.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct SignatureShare {
    pub chain_id: ChainId,
    pub header_hash: Hash,
    pub signer_index: NodeIndex,
    pub signature: BlsSignature,
}

/// The first failing check that made a follower refuse to sign.
///
/// Structured so the leader can tell malice from configuration drift.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum RefusalReason {
    /// `prev_hashes` does not reference the follower's latest block.
    UnknownPrevious { expected: Hash, got: Hash },
    /// Re-execution produced a different trie root.
    TrieRootMismatch { expected: Hash, got: Hash },
    /// A transaction carried an invalid signature or stale counter.
    BadTransaction { tx_hash: Hash, reason: String },
    /// The proposal's roster id does not match the follower's config.
    WrongRoster,
    /// The proposed leader is not the follower's current leader.
    WrongLeader,
    /// Body exceeds the configured maximum block size.
    Oversized,
    /// Header fields are inconsistent with the body or the chain state.
    MalformedHeader { reason: String },
}

/// A follower's structured refusal to sign a candidate.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Refusal {
    pub chain_id: ChainId,
    pub header_hash: Hash,
    pub signer_index: NodeIndex,
    pub reason: RefusalReason,
}

/// A frozen block plus the state changes its accepted transactions made.
///
/// The state changes let a catching-up node replay without re-executing
/// contracts; they are trusted only after the applied root matches the
/// collectively signed `trie_root`.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct CommitMessage {
    pub chain_id: ChainId,
    pub block: Block,
    pub state_changes: Vec<StateChange>,
}

/// Request blocks from `from_index` onward.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct CatchUpRequest {
    pub chain_id: ChainId,
    pub from_index: u64,
}
