//! Consensus machinery: the collective-signing round, the heartbeat
//! monitor, and the view-change manager.
//!
//! These components hold consensus bookkeeping only; transaction execution
//! and trie ownership live with the per-chain state machine that composes
//! them.

mod heartbeat;
mod pipeline;
mod view_change;

pub use heartbeat::HeartbeatMonitor;
pub use pipeline::{PipelineError, SigningRound};
pub use view_change::{ViewChangeOutcome, ViewChangeState, DEFAULT_ROTATION_WINDOW};
