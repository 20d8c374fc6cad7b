//! Action types for the per-chain state machine.

use crate::{Event, OutboundMessage, TimerId};
use byzcoin_types::{Block, Hash, NodeIndex, StateChange};
use std::time::Duration;

/// Lifecycle of a submitted transaction, as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Accepted into the buffer, awaiting a block.
    Queued,
    /// Never entered the buffer (overloaded, duplicate, bad signature).
    Rejected { reason: String },
    /// Landed in a committed block. `accepted` mirrors the TxResult flag.
    Included { block_index: u64, accepted: bool },
}

/// Commands the state machine wants performed.
///
/// The runner executes actions and may convert results back into events.
#[derive(Debug, Clone)]
pub enum Action {
    /// Deliver a message to every other roster member.
    Broadcast { message: OutboundMessage },

    /// Deliver a message to one roster member.
    SendTo {
        index: NodeIndex,
        message: OutboundMessage,
    },

    /// Arm a timer; replaces any pending timer with the same id.
    SetTimer { id: TimerId, duration: Duration },

    /// Disarm a timer.
    CancelTimer { id: TimerId },

    /// Feed an event back into the mailbox with internal priority.
    EnqueueInternal { event: Event },

    /// Persist a frozen block and its state-change delta, then publish it to
    /// streaming subscribers. The state machine has already applied the
    /// block to its own trie before emitting this.
    CommitBlock {
        block: Box<Block>,
        state_changes: Vec<StateChange>,
    },

    /// Report a transaction's lifecycle to whoever is waiting on it.
    TransactionStatus { tx_hash: Hash, status: TxStatus },

    /// The chain is behind; ask a peer for blocks from `from_index` on.
    FetchMissing { from_index: u64 },

    /// A fatal invariant was violated; the runner must stop this chain's
    /// coordinator and leave other chains running.
    AbortChain { reason: String },
}
