//! Event/action substrate for the per-chain state machine.
//!
//! Each chain runs as one deterministic state machine:
//!
//! ```text
//! Events → ChainStateMachine::handle() → Actions
//! ```
//!
//! The state machine is:
//! - **Synchronous**: no async, no `.await`
//! - **Deterministic**: same state + event = same actions
//! - **Pure-ish**: mutates itself, performs no I/O
//!
//! All I/O is owned by a runner (production or simulation) which delivers
//! events, executes the returned actions, and converts action results back
//! into events. Per-chain serialization is structural: the mailbox is the
//! only way in.

mod action;
mod event;
mod message;
mod store;
mod traits;

pub use action::{Action, TxStatus};
pub use event::{Event, EventPriority};
pub use message::OutboundMessage;
pub use store::{SkipchainStore, StoreError};
pub use traits::StateMachine;

/// Identifies a timer owned by one chain's state machine. Setting a timer
/// with an id that is already pending replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Leader's block-interval tick.
    BlockInterval,
    /// Follower's leader-silence check.
    Heartbeat,
    /// View-change round deadline (back-off schedule).
    ViewChange,
}
