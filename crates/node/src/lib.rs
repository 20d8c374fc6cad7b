//! The per-chain node: one deterministic state machine per chain, plus
//! genesis construction/validation and proof building.

mod chain;
mod genesis;
mod proof;

pub use chain::{ChainStateMachine, ChainError};
pub use genesis::{build_genesis, validate_genesis, GenesisError};
pub use proof::{Proof, ProofError};
