//! The chain config contract.
//!
//! The config instance lives at the all-zero id. It is spawned once during
//! genesis; afterwards only `invoke:config.update_config` can replace it,
//! and the executor admits at most one such update per block. The new
//! config takes effect at the end of the block that contains it.

use crate::error::ContractError;
use crate::registry::{Coin, Contract, ContractCtx};
use byzcoin_trie::TrieView;
use byzcoin_types::{ChainConfig, Instruction, InstanceId, StateChange};
use parity_scale_codec::{Decode, Encode};

pub const CONTRACT_CONFIG: &str = "config";

/// Read the chain config out of a trie view.
pub fn read_config(view: &dyn TrieView) -> Option<ChainConfig> {
    let instance = view.get(&InstanceId::ZERO)?;
    ChainConfig::decode(&mut instance.value.as_slice()).ok()
}

pub struct ConfigContract;

impl ConfigContract {
    fn validate(config: &ChainConfig) -> Result<(), ContractError> {
        if config.roster.is_empty() {
            return Err(ContractError::Failed("empty roster".into()));
        }
        if config.block_interval_ms == 0 {
            return Err(ContractError::Failed("zero block interval".into()));
        }
        if config.max_block_size == 0 {
            return Err(ContractError::Failed("zero max block size".into()));
        }
        Ok(())
    }
}

impl Contract for ConfigContract {
    fn invoke(
        &self,
        ctx: &ContractCtx,
        instruction: &Instruction,
        _coins: &mut Vec<Coin>,
    ) -> Result<Vec<StateChange>, ContractError> {
        let command = match &instruction.action {
            byzcoin_types::InstructionAction::Invoke(invoke) => invoke.command.as_str(),
            _ => unreachable!("executor dispatches invoke only"),
        };
        if command != "update_config" {
            return Err(ContractError::Failed(format!(
                "config contract has no command {:?}",
                command
            )));
        }
        let raw = instruction
            .arg("config")
            .ok_or_else(|| ContractError::MissingArgument("config".into()))?;
        let new_config = ChainConfig::decode(&mut &*raw)
            .map_err(|e| ContractError::BadEncoding(e.to_string()))?;
        Self::validate(&new_config)?;

        let current = ctx
            .view
            .get(&InstanceId::ZERO)
            .ok_or_else(|| ContractError::Failed("config instance missing".into()))?;
        Ok(vec![StateChange::update(
            InstanceId::ZERO,
            CONTRACT_CONFIG.to_string(),
            new_config.encode(),
            current.darc_id,
            current.version + 1,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byzcoin_types::test_utils::test_roster;
    use std::time::Duration;

    #[test]
    fn validation_rejects_degenerate_configs() {
        let (roster, _) = test_roster(3);
        let mut config = ChainConfig::new(roster, Duration::from_millis(500));
        assert!(ConfigContract::validate(&config).is_ok());

        config.block_interval_ms = 0;
        assert!(ConfigContract::validate(&config).is_err());
    }
}
