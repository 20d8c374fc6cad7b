//! Event types for the per-chain state machine.

use byzcoin_types::{
    BlockProposal, ClientTransaction, CommitMessage, Refusal, SignatureShare,
    ViewChangeCertificate, ViewChangeRequest,
};

/// Priority levels for event ordering within the same timestamp.
///
/// Events at the same simulation time are processed in priority order, lower
/// value first. Internal events (consequences of prior processing) run before
/// new external inputs, preserving causality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    Internal = 0,
    Timer = 1,
    Network = 2,
    Client = 3,
}

/// All possible inputs to a chain's state machine.
///
/// Events are passive data; the state machine processes them and returns
/// actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ─── Timers ─────────────────────────────────────────────────────────
    /// Time for the leader to attempt a new block.
    BlockIntervalTimer,

    /// Time for a follower to check leader liveness.
    HeartbeatTimer,

    /// The current view-change attempt's deadline expired.
    ViewChangeTimer,

    // ─── Network ────────────────────────────────────────────────────────
    /// A candidate block arrived for validation and co-signing.
    ProposalReceived { proposal: BlockProposal },

    /// A co-signature arrived (leader only).
    ShareReceived { share: SignatureShare },

    /// A structured refusal arrived (leader only).
    RefusalReceived { refusal: Refusal },

    /// A frozen block arrived, directly or during catch-up.
    CommitReceived { commit: CommitMessage },

    /// Another member asked to depose the leader.
    ViewChangeRequestReceived { request: ViewChangeRequest },

    /// A completed view-change certificate arrived.
    ViewChangeCertificateReceived { certificate: ViewChangeCertificate },

    // ─── Clients ────────────────────────────────────────────────────────
    /// A client submitted a transaction to this node.
    SubmitTransaction { tx: ClientTransaction },

    // ─── Internal ───────────────────────────────────────────────────────
    /// The heartbeat monitor concluded the leader is silent.
    LeaderTimeout,
}

impl Event {
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::LeaderTimeout => EventPriority::Internal,
            Event::BlockIntervalTimer | Event::HeartbeatTimer | Event::ViewChangeTimer => {
                EventPriority::Timer
            }
            Event::SubmitTransaction { .. } => EventPriority::Client,
            _ => EventPriority::Network,
        }
    }
}
