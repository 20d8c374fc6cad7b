//! The value contract: an uninterpreted byte blob.
//!
//! The illustrative user contract; tests spawn it under the name `value`.

use crate::error::ContractError;
use crate::registry::{Coin, Contract, ContractCtx};
use byzcoin_trie::TrieView;
use byzcoin_types::{Instruction, StateChange};

pub const CONTRACT_VALUE: &str = "value";

pub struct ValueContract;

impl Contract for ValueContract {
    fn spawn(
        &self,
        ctx: &ContractCtx,
        instruction: &Instruction,
        _coins: &mut Vec<Coin>,
    ) -> Result<Vec<StateChange>, ContractError> {
        let value = instruction
            .arg("value")
            .ok_or_else(|| ContractError::MissingArgument("value".into()))?;
        Ok(vec![StateChange::create(
            instruction.derive_id(""),
            CONTRACT_VALUE.to_string(),
            value.to_vec(),
            ctx.darc_id,
        )])
    }

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
        if command != "update" {
            return Err(ContractError::Failed(format!(
                "value contract has no command {:?}",
                command
            )));
        }
        let value = instruction
            .arg("value")
            .ok_or_else(|| ContractError::MissingArgument("value".into()))?;
        let current = ctx
            .view
            .get(&instruction.instance_id)
            .ok_or_else(|| ContractError::Failed("instance vanished".into()))?;
        Ok(vec![StateChange::update(
            instruction.instance_id,
            CONTRACT_VALUE.to_string(),
            value.to_vec(),
            current.darc_id,
            current.version + 1,
        )])
    }

    fn delete(
        &self,
        ctx: &ContractCtx,
        instruction: &Instruction,
        _coins: &mut Vec<Coin>,
    ) -> Result<Vec<StateChange>, ContractError> {
        let current = ctx
            .view
            .get(&instruction.instance_id)
            .ok_or_else(|| ContractError::Failed("instance vanished".into()))?;
        Ok(vec![StateChange::remove(
            instruction.instance_id,
            CONTRACT_VALUE.to_string(),
            current.darc_id,
            current.version + 1,
        )])
    }
}
