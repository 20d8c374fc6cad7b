//! RocksDB persistence.
//!
//! Column families separate the persistent surfaces: block headers, block
//! bodies, per-block state-change lists, the current trie leaves, and
//! chain metadata. All writes for one committed block go through a single
//! atomic write batch; crash safety rides on RocksDB's WAL.

use byzcoin_core::{SkipchainStore, StoreError};
use byzcoin_darc::Darc;
use byzcoin_engine::{ContractRegistry, Executor};
use byzcoin_trie::Trie;
use byzcoin_types::{
    Block, BlockHeader, ChainConfig, ChainId, CollectiveSignature, DataBody, ForwardLink, Hash,
    InstanceId, Roster, StateChange, StateChangeKind, StateInstance,
};
use parity_scale_codec::{Decode, Encode};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

const CF_HEADERS: &str = "headers";
const CF_BODIES: &str = "bodies";
const CF_STATE_CHANGES: &str = "state_changes";
const CF_TRIE: &str = "trie";
const CF_META: &str = "meta";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("ERR_BAD_ENCODING: {0}")]
    Encoding(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

fn chain_index_key(chain: ChainId, index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(chain.0.as_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn chain_prefix(chain: ChainId) -> Vec<u8> {
    chain.0.as_bytes().to_vec()
}

fn hash_index_key(chain: ChainId, hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(66);
    key.extend_from_slice(b"h:");
    key.extend_from_slice(chain.0.as_bytes());
    key.extend_from_slice(hash.as_bytes());
    key
}

fn head_key(chain: ChainId) -> Vec<u8> {
    let mut key = b"head:".to_vec();
    key.extend_from_slice(chain.0.as_bytes());
    key
}

fn roster_key(chain: ChainId, index: u64) -> Vec<u8> {
    let mut key = b"r:".to_vec();
    key.extend_from_slice(chain.0.as_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn boot_key(chain: ChainId) -> Vec<u8> {
    let mut key = b"boot:".to_vec();
    key.extend_from_slice(chain.0.as_bytes());
    key
}

fn chains_key() -> Vec<u8> {
    b"chains".to_vec()
}

/// RocksDB-backed block and state storage for all chains of one node.
pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = [CF_HEADERS, CF_BODIES, CF_STATE_CHANGES, CF_TRIE, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::Database(format!("missing column family {}", name)))
    }

    /// Record a new chain's bootstrap data: genesis block, darc, config.
    pub fn create_chain(
        &self,
        genesis: &Block,
        darc: &Darc,
        config: &ChainConfig,
    ) -> Result<ChainId, StorageError> {
        let chain = ChainId(genesis.hash());
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_META)?, boot_key(chain), (darc, config).encode());

        let mut chains = self.chains()?;
        if !chains.contains(&chain) {
            chains.push(chain);
            batch.put_cf(self.cf(CF_META)?, chains_key(), chains.encode());
        }
        self.db.write(batch)?;

        // The genesis instances count as block 0's state changes, so the
        // trie column family reproduces the genesis root on reload.
        let executor = Executor::new(ContractRegistry::with_builtins());
        let mut trie = Trie::new();
        let (changes, _) = executor
            .execute_genesis(&mut trie, darc, config)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        self.append_block(chain, genesis, &changes, &config.roster)?;
        info!(?chain, "chain created");
        Ok(chain)
    }

    /// Bootstrap data for a known chain.
    pub fn boot_data(&self, chain: ChainId) -> Result<(Darc, ChainConfig), StorageError> {
        let raw = self
            .db
            .get_cf(self.cf(CF_META)?, boot_key(chain))?
            .ok_or(StoreError::UnknownChain(chain))?;
        <(Darc, ChainConfig)>::decode(&mut raw.as_slice())
            .map_err(|e| StorageError::Encoding(e.to_string()))
    }

    /// All chains this node participates in.
    pub fn chains(&self) -> Result<Vec<ChainId>, StorageError> {
        match self.db.get_cf(self.cf(CF_META)?, chains_key())? {
            Some(raw) => Vec::<ChainId>::decode(&mut raw.as_slice())
                .map_err(|e| StorageError::Encoding(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    /// Persist one committed block with its state changes, atomically:
    /// header, body, state-change list, trie leaves, head pointer, hash
    /// index and roster snapshot.
    pub fn append_block(
        &self,
        chain: ChainId,
        block: &Block,
        state_changes: &[StateChange],
        roster: &Roster,
    ) -> Result<(), StorageError> {
        let index = block.header.index;
        let head = self.head_index(chain)?;
        match head {
            Some(head) if index != head + 1 => {
                return Err(StoreError::NotSequential { head, got: index }.into());
            }
            None if index != 0 => {
                return Err(StoreError::NotSequential { head: 0, got: index }.into());
            }
            _ => {}
        }

        let key = chain_index_key(chain, index);
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_HEADERS)?, &key, block.header.encode());
        batch.put_cf(self.cf(CF_BODIES)?, &key, block.body.encode());
        batch.put_cf(self.cf(CF_STATE_CHANGES)?, &key, state_changes.encode());
        batch.put_cf(
            self.cf(CF_META)?,
            hash_index_key(chain, &block.hash()),
            index.to_be_bytes(),
        );
        batch.put_cf(self.cf(CF_META)?, head_key(chain), index.to_be_bytes());
        batch.put_cf(self.cf(CF_META)?, roster_key(chain, index), roster.encode());

        // Mirror the state changes into the trie column family so the trie
        // can be rebuilt without replaying every block.
        for change in state_changes {
            let mut leaf_key = chain_prefix(chain);
            leaf_key.extend_from_slice(change.instance_id.as_bytes());
            let instance = StateInstance {
                contract_id: change.contract_id.clone(),
                version: change.version,
                value: change.value.clone(),
                darc_id: change.darc_id,
                tombstone: change.kind == StateChangeKind::Remove,
            };
            batch.put_cf(self.cf(CF_TRIE)?, leaf_key, instance.encode());
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn head_index(&self, chain: ChainId) -> Result<Option<u64>, StorageError> {
        match self.db.get_cf(self.cf(CF_META)?, head_key(chain))? {
            Some(raw) => {
                let bytes: [u8; 8] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::Encoding("bad head pointer".into()))?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    fn header_at(&self, chain: ChainId, index: u64) -> Result<BlockHeader, StorageError> {
        let raw = self
            .db
            .get_cf(self.cf(CF_HEADERS)?, chain_index_key(chain, index))?
            .ok_or(StoreError::UnknownChain(chain))?;
        BlockHeader::decode(&mut raw.as_slice()).map_err(|e| StorageError::Encoding(e.to_string()))
    }

    fn block_at(&self, chain: ChainId, index: u64) -> Result<Block, StorageError> {
        let header = self.header_at(chain, index)?;
        let raw = self
            .db
            .get_cf(self.cf(CF_BODIES)?, chain_index_key(chain, index))?
            .ok_or(StoreError::UnknownChain(chain))?;
        let body =
            DataBody::decode(&mut raw.as_slice()).map_err(|e| StorageError::Encoding(e.to_string()))?;
        Ok(Block { header, body })
    }

    fn roster_at(&self, chain: ChainId, index: u64) -> Result<Roster, StorageError> {
        let raw = self
            .db
            .get_cf(self.cf(CF_META)?, roster_key(chain, index))?
            .ok_or(StoreError::UnknownChain(chain))?;
        Roster::decode(&mut raw.as_slice()).map_err(|e| StorageError::Encoding(e.to_string()))
    }

    /// The state-change list of one block, for audit replay and catch-up.
    pub fn state_changes_at(
        &self,
        chain: ChainId,
        index: u64,
    ) -> Result<Vec<StateChange>, StorageError> {
        let raw = self
            .db
            .get_cf(self.cf(CF_STATE_CHANGES)?, chain_index_key(chain, index))?
            .ok_or(StoreError::UnknownChain(chain))?;
        Vec::<StateChange>::decode(&mut raw.as_slice())
            .map_err(|e| StorageError::Encoding(e.to_string()))
    }

    /// Rebuild the in-memory trie from the persisted leaves.
    pub fn load_trie(&self, chain: ChainId) -> Result<Trie, StorageError> {
        let prefix = chain_prefix(chain);
        let mut trie = Trie::new();
        let iter = self.db.iterator_cf(
            self.cf(CF_TRIE)?,
            rocksdb::IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id_bytes: [u8; 32] = key[prefix.len()..]
                .try_into()
                .map_err(|_| StorageError::Encoding("bad trie key".into()))?;
            let instance = StateInstance::decode(&mut value.as_ref())
                .map_err(|e| StorageError::Encoding(e.to_string()))?;
            trie.load_leaf(InstanceId(id_bytes), instance)
                .map_err(|e| StorageError::Database(e.to_string()))?;
        }
        Ok(trie)
    }

    /// The largest power-of-two hop from `from` toward `to`.
    fn hop(from: u64, to: u64) -> u64 {
        debug_assert!(from < to);
        let mut step = 1u64;
        while from % (step * 2) == 0 && from + step * 2 <= to {
            step *= 2;
        }
        step
    }

    fn link(&self, chain: ChainId, from: u64, to: u64) -> Result<ForwardLink, StorageError> {
        let from_header = self.header_at(chain, from)?;
        let to_header = self.header_at(chain, to)?;
        let signature: CollectiveSignature = to_header
            .signature
            .clone()
            .ok_or_else(|| StoreError::Corrupted(format!("unsigned block at {}", to)))?;
        let from_roster = self.roster_at(chain, from)?;
        let to_roster = self.roster_at(chain, to)?;
        Ok(ForwardLink {
            from: from_header.hash(),
            to: to_header.hash(),
            to_index: to,
            new_roster: (from_roster != to_roster).then_some(to_roster),
            signature,
        })
    }
}

impl SkipchainStore for RocksDbStore {
    fn append(&self, chain_id: ChainId, block: &Block) -> Result<(), StoreError> {
        let roster = self
            .roster_at(chain_id, block.header.index.saturating_sub(1))
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;
        self.append_block(chain_id, block, &[], &roster)
            .map_err(|e| StoreError::Corrupted(e.to_string()))
    }

    fn get_by_hash(&self, chain_id: ChainId, hash: &Hash) -> Result<Block, StoreError> {
        let raw = self
            .db
            .get_cf(
                self.cf(CF_META).map_err(|e| StoreError::Corrupted(e.to_string()))?,
                hash_index_key(chain_id, hash),
            )
            .map_err(|e| StoreError::Corrupted(e.to_string()))?
            .ok_or(StoreError::UnknownBlock(*hash))?;
        let bytes: [u8; 8] = raw
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Corrupted("bad hash index".into()))?;
        self.get_by_index(chain_id, u64::from_be_bytes(bytes))
    }

    fn get_by_index(&self, chain_id: ChainId, index: u64) -> Result<Block, StoreError> {
        self.block_at(chain_id, index)
            .map_err(|e| StoreError::Corrupted(e.to_string()))
    }

    fn get_latest(&self, chain_id: ChainId) -> Result<Block, StoreError> {
        let head = self
            .head_index(chain_id)
            .map_err(|e| StoreError::Corrupted(e.to_string()))?
            .ok_or(StoreError::UnknownChain(chain_id))?;
        self.get_by_index(chain_id, head)
    }

    /// Forward links are derived, not stored: every hop's signature is the
    /// target block's collective signature, so a link at any level can be
    /// synthesized from the blocks themselves. The path doubles its stride
    /// where alignment allows, giving a logarithmic walk.
    fn follow_links(
        &self,
        chain_id: ChainId,
        from: u64,
        to: u64,
    ) -> Result<Vec<ForwardLink>, StoreError> {
        let mut links = Vec::new();
        let mut cursor = from;
        while cursor < to {
            let next = cursor + Self::hop(cursor, to);
            links.push(
                self.link(chain_id, cursor, next)
                    .map_err(|e| StoreError::Corrupted(e.to_string()))?,
            );
            cursor = next;
        }
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_doubles_on_alignment() {
        assert_eq!(RocksDbStore::hop(0, 1), 1);
        assert_eq!(RocksDbStore::hop(0, 8), 8);
        assert_eq!(RocksDbStore::hop(0, 13), 8);
        assert_eq!(RocksDbStore::hop(8, 13), 4);
        assert_eq!(RocksDbStore::hop(12, 13), 1);
        assert_eq!(RocksDbStore::hop(3, 13), 1);
        assert_eq!(RocksDbStore::hop(4, 13), 4);
    }
}
