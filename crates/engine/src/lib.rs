//! Deterministic transaction execution.
//!
//! The executor does NOT own the trie: the per-chain state machine owns it
//! and passes it in. This keeps execution a pure function of
//! `(prior root, batch)`:
//!
//! ```text
//! ChainStateMachine → executor.execute_batch(&mut trie, &batch, ...)
//!      ↓
//! BatchOutput { tx_results, state_changes, root }
//! ```
//!
//! Handlers may not read wall-clock time, randomness or external I/O; the
//! only inputs are the staged trie view, the instruction and the coin
//! vector flowing between instructions.

mod cache;
pub mod contracts;
mod error;
mod executor;
mod registry;

pub use cache::ExecutionCache;
pub use error::{ContractError, ExecError};
pub use executor::{counter_instance_id, BatchOutput, Executor};
pub use registry::{Coin, Contract, ContractCtx, ContractRegistry};
