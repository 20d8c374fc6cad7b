//! Core types for the ByzCoin ledger.
//!
//! This crate provides the foundational types used throughout the
//! implementation:
//!
//! - **Primitives**: Hash, signer and server keys, collective signatures
//! - **Identifiers**: InstanceId, ChainId, ContractId
//! - **Ledger types**: Block, BlockHeader, DataBody, ClientTransaction
//! - **Consensus types**: Roster, View, view-change messages
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod bitfield;
mod block;
mod config;
mod crypto;
mod hash;
mod identifiers;
mod messages;
mod roster;
mod signing;
mod state_change;
mod transaction;
mod view_change;

pub use bitfield::SignerBitfield;
pub use block::{
    Block, BlockHeader, CollectiveSignature, DataBody, ForwardLink, TxResult,
};
pub use config::ChainConfig;
pub use crypto::{
    AggregateError, BlsKeyPair, BlsPublicKey, BlsSignature, CryptoError, Identity, Signer,
    SignerPublicKey, SignerSignature,
};
pub use hash::{sha256, Hash, HexError};
pub use identifiers::{ChainId, ContractId, InstanceId, NodeIndex};
pub use messages::{
    BlockProposal, CatchUpRequest, CommitMessage, Refusal, RefusalReason, SignatureShare,
};
pub use roster::{Roster, ServerIdentity};
pub use signing::{
    block_share_message, instruction_message, view_change_message, DOMAIN_BLOCK_SHARE,
    DOMAIN_INSTRUCTION, DOMAIN_VIEW_CHANGE,
};
pub use state_change::{StateChange, StateChangeKind, StateInstance};
pub use transaction::{
    Argument, ClientTransaction, Delete, Instruction, InstructionAction, Invoke, Spawn,
};
pub use view_change::{View, ViewChangeCertificate, ViewChangeRequest};

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Deterministic server keypair from a seed byte.
    pub fn test_server_key(seed: u8) -> BlsKeyPair {
        BlsKeyPair::from_seed(&[seed; 32])
    }

    /// Deterministic client signer from a seed byte.
    pub fn test_signer(seed: u8) -> Signer {
        Signer::from_seed(&[seed; 32])
    }

    /// A roster of `n` servers with deterministic keys and local addresses.
    pub fn test_roster(n: usize) -> (Roster, Vec<BlsKeyPair>) {
        let keys: Vec<BlsKeyPair> = (0..n).map(|i| test_server_key(i as u8 + 1)).collect();
        let identities = keys
            .iter()
            .enumerate()
            .map(|(i, k)| ServerIdentity::new(k.public_key(), format!("tcp://127.0.0.1:{}", 7000 + i)))
            .collect();
        (Roster::new(identities), keys)
    }
}
