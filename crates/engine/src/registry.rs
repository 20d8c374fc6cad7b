//! The contract registry.

use crate::error::ContractError;
use byzcoin_trie::TrieView;
use byzcoin_types::{ContractId, Hash, Instruction, StateChange};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A token passed between instructions of one transaction. An instruction's
/// output coins become the next instruction's input coins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coin {
    pub name: ContractId,
    pub value: u64,
}

/// Adapts a trie view into a darc resolver: darcs live at the instance id
/// equal to their base id.
pub struct ViewResolver<'a>(pub &'a dyn TrieView);

impl byzcoin_darc::DarcResolver for ViewResolver<'_> {
    fn resolve(&self, base_id: &Hash) -> Option<byzcoin_darc::Darc> {
        let instance = self.0.get(&byzcoin_types::InstanceId(base_id.0))?;
        if instance.contract_id != crate::contracts::darc::CONTRACT_DARC {
            return None;
        }
        use parity_scale_codec::Decode;
        byzcoin_darc::Darc::decode(&mut instance.value.as_slice()).ok()
    }
}

/// Context a handler executes in.
pub struct ContractCtx<'a> {
    /// Latest staged view; earlier instructions' writes are visible.
    pub view: &'a dyn TrieView,
    /// Registry, for contracts that dispatch nested instructions.
    pub registry: &'a ContractRegistry,
    /// Index of the block under construction.
    pub block_index: u64,
    /// Timestamp of the block under construction.
    pub timestamp_ns: i64,
    /// Base id of the darc governing the target instance.
    pub darc_id: Hash,
}

/// A contract handler: the capability set `{spawn, invoke, delete}`.
///
/// Handlers are pure: same view + instruction + coins must yield the same
/// changes on every node.
pub trait Contract: Send + Sync {
    fn spawn(
        &self,
        _ctx: &ContractCtx,
        _instruction: &Instruction,
        _coins: &mut Vec<Coin>,
    ) -> Result<Vec<StateChange>, ContractError> {
        Err(ContractError::NotSupported("spawn"))
    }

    fn invoke(
        &self,
        _ctx: &ContractCtx,
        _instruction: &Instruction,
        _coins: &mut Vec<Coin>,
    ) -> Result<Vec<StateChange>, ContractError> {
        Err(ContractError::NotSupported("invoke"))
    }

    fn delete(
        &self,
        _ctx: &ContractCtx,
        _instruction: &Instruction,
        _coins: &mut Vec<Coin>,
    ) -> Result<Vec<StateChange>, ContractError> {
        Err(ContractError::NotSupported("delete"))
    }
}

/// Maps contract ids to handlers. Populated at startup, read-only after.
#[derive(Clone, Default)]
pub struct ContractRegistry {
    handlers: BTreeMap<ContractId, Arc<dyn Contract>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in contracts registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            crate::contracts::config::CONTRACT_CONFIG,
            Arc::new(crate::contracts::config::ConfigContract),
        );
        registry.register(
            crate::contracts::darc::CONTRACT_DARC,
            Arc::new(crate::contracts::darc::DarcContract),
        );
        registry.register(
            crate::contracts::value::CONTRACT_VALUE,
            Arc::new(crate::contracts::value::ValueContract),
        );
        registry.register(
            crate::contracts::deferred::CONTRACT_DEFERRED,
            Arc::new(crate::contracts::deferred::DeferredContract),
        );
        registry
    }

    pub fn register(&mut self, contract_id: impl Into<String>, handler: Arc<dyn Contract>) {
        self.handlers.insert(contract_id.into(), handler);
    }

    pub fn get(&self, contract_id: &str) -> Option<&Arc<dyn Contract>> {
        self.handlers.get(contract_id)
    }

    pub fn contains(&self, contract_id: &str) -> bool {
        self.handlers.contains_key(contract_id)
    }
}

impl std::fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractRegistry")
            .field("contracts", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
