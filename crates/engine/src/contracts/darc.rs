//! The darc contract.
//!
//! Darc instances live at the instance id equal to their base id, so rule
//! expressions can reference them stably across evolutions.

use crate::error::ContractError;
use crate::registry::{Coin, Contract, ContractCtx, ViewResolver};
use byzcoin_darc::{parse_expression, Darc};
use byzcoin_trie::TrieView;
use byzcoin_types::{Instruction, InstanceId, StateChange};
use parity_scale_codec::{Decode, Encode};

pub const CONTRACT_DARC: &str = "darc";

fn decode_darc(raw: &[u8]) -> Result<Darc, ContractError> {
    Darc::decode(&mut &*raw)
        .map_err(|e| ContractError::BadEncoding(format!("fail to decode the darc: {}", e)))
}

/// Every rule expression must parse; a darc with an unparseable rule could
/// never authorize anything and is rejected at the door.
fn validate_rules(darc: &Darc) -> Result<(), ContractError> {
    for (action, rule) in &darc.rules {
        parse_expression(rule).map_err(|e| {
            ContractError::Failed(format!("bad rule for {:?}: {}", action, e))
        })?;
    }
    Ok(())
}

pub struct DarcContract;

impl Contract for DarcContract {
    fn spawn(
        &self,
        _ctx: &ContractCtx,
        instruction: &Instruction,
        _coins: &mut Vec<Coin>,
    ) -> Result<Vec<StateChange>, ContractError> {
        let raw = instruction
            .arg("darc")
            .ok_or_else(|| ContractError::MissingArgument("darc".into()))?;
        let darc = decode_darc(raw)?;
        if darc.version != 0 {
            return Err(ContractError::Failed(
                "spawned darc must be version 0".into(),
            ));
        }
        validate_rules(&darc)?;
        let base_id = darc.base_id();
        Ok(vec![StateChange::create(
            InstanceId(base_id.0),
            CONTRACT_DARC.to_string(),
            darc.encode(),
            base_id,
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
        if command != "evolve" {
            return Err(ContractError::Failed(format!(
                "darc contract has no command {:?}",
                command
            )));
        }
        let raw = instruction
            .arg("darc")
            .ok_or_else(|| ContractError::MissingArgument("darc".into()))?;
        let new_darc = decode_darc(raw)?;
        validate_rules(&new_darc)?;

        let current_instance = ctx
            .view
            .get(&instruction.instance_id)
            .ok_or_else(|| ContractError::Failed("darc instance missing".into()))?;
        let current = decode_darc(&current_instance.value)?;

        // The version chain and the old `_evolve` rule both must hold; a
        // superseded version can no longer authorize.
        current.verify_evolution(
            &new_darc,
            &instruction.signer_identities,
            &ViewResolver(ctx.view),
        )?;

        Ok(vec![StateChange::update(
            instruction.instance_id,
            CONTRACT_DARC.to_string(),
            new_darc.encode(),
            new_darc.base_id(),
            current_instance.version + 1,
        )])
    }
}
