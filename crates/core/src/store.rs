//! The skipchain block store, as an interface.
//!
//! The generic append-only block store is an external collaborator; the core
//! only assumes these operations. Runners provide an implementation (RocksDB
//! in production, a vector in simulation).

use byzcoin_types::{Block, ChainId, Hash};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown chain {0:?}")]
    UnknownChain(ChainId),
    #[error("unknown block {0:?}")]
    UnknownBlock(Hash),
    #[error("block {got} does not extend head {head}")]
    NotSequential { head: u64, got: u64 },
    #[error("ERR_STATE_CORRUPTED: {0}")]
    Corrupted(String),
}

/// Append-only store of blocks, per chain, with forward links.
pub trait SkipchainStore: Send + Sync {
    /// Append a frozen block. The block's index must be exactly one past the
    /// current head (or 0 for a new chain).
    fn append(&self, chain_id: ChainId, block: &Block) -> Result<(), StoreError>;

    /// Fetch a block by header hash.
    fn get_by_hash(&self, chain_id: ChainId, hash: &Hash) -> Result<Block, StoreError>;

    /// Fetch a block by index.
    fn get_by_index(&self, chain_id: ChainId, index: u64) -> Result<Block, StoreError>;

    /// The chain's latest block.
    fn get_latest(&self, chain_id: ChainId) -> Result<Block, StoreError>;

    /// The ordered forward-link path from block `from` to block `to`,
    /// following the highest link level available at each hop.
    fn follow_links(
        &self,
        chain_id: ChainId,
        from: u64,
        to: u64,
    ) -> Result<Vec<byzcoin_types::ForwardLink>, StoreError>;
}
