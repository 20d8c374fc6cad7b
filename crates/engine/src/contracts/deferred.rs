//! The deferred contract: propose now, sign later, execute once enough
//! signatures accumulated.
//!
//! A deferred instance stores a proposed transaction whose instructions
//! carry no signatures yet. Independent signers attach identity/signature
//! pairs with `add_proof`; `exec_proposed_tx` then runs the proposed
//! instructions with those accumulated proofs. Execution is bounded by an
//! expiry block index and a maximum number of executions.

use crate::error::ContractError;
use crate::registry::{Coin, Contract, ContractCtx, ViewResolver};
use byzcoin_darc::DarcResolver;
use byzcoin_trie::TrieView;
use byzcoin_types::{
    instruction_message, ClientTransaction, Hash, Identity, Instruction, InstructionAction,
    InstanceId, SignerSignature, StateChange, StateChangeKind, StateInstance,
};
use parity_scale_codec::{Decode, Encode};
use std::collections::BTreeMap;

pub const CONTRACT_DEFERRED: &str = "deferred";

/// Blocks a deferred transaction stays executable when the spawner gives no
/// explicit expiry.
const DEFAULT_EXPIRY_DELTA: u64 = 50;

/// Stored value of a deferred instance.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct DeferredData {
    pub proposed_transaction: ClientTransaction,
    /// Absolute block index after which execution fails.
    pub expire_block_index: u64,
    /// Hash of each proposed instruction at spawn time; proofs are checked
    /// against these so later tampering is detectable.
    pub instruction_hashes: Vec<Hash>,
    /// Remaining allowed executions.
    pub max_num_execution: u64,
}

fn decode_u64_arg(raw: &[u8]) -> Result<u64, ContractError> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| ContractError::BadEncoding("expected 8-byte integer".into()))?;
    Ok(u64::from_le_bytes(bytes))
}

fn decode_u32_arg(raw: &[u8]) -> Result<u32, ContractError> {
    let bytes: [u8; 4] = raw
        .try_into()
        .map_err(|_| ContractError::BadEncoding("expected 4-byte integer".into()))?;
    Ok(u32::from_le_bytes(bytes))
}

fn load(ctx: &ContractCtx, id: &InstanceId) -> Result<(StateInstance, DeferredData), ContractError> {
    let instance = ctx
        .view
        .get(id)
        .ok_or_else(|| ContractError::Failed("deferred instance missing".into()))?;
    let data = DeferredData::decode(&mut instance.value.as_slice())
        .map_err(|e| ContractError::BadEncoding(e.to_string()))?;
    Ok((instance, data))
}

/// Overlay making one instruction's writes visible to the next during the
/// nested execution of a proposed transaction.
struct OverlayView<'a> {
    base: &'a dyn TrieView,
    staged: BTreeMap<InstanceId, StateInstance>,
}

impl<'a> OverlayView<'a> {
    fn new(base: &'a dyn TrieView) -> Self {
        Self {
            base,
            staged: BTreeMap::new(),
        }
    }

    fn absorb(&mut self, changes: &[StateChange]) {
        for change in changes {
            self.staged.insert(
                change.instance_id,
                StateInstance {
                    contract_id: change.contract_id.clone(),
                    version: change.version,
                    value: change.value.clone(),
                    darc_id: change.darc_id,
                    tombstone: change.kind == StateChangeKind::Remove,
                },
            );
        }
    }
}

impl TrieView for OverlayView<'_> {
    fn get(&self, key: &InstanceId) -> Option<StateInstance> {
        if let Some(instance) = self.staged.get(key) {
            return (!instance.tombstone).then(|| instance.clone());
        }
        self.base.get(key)
    }
}

pub struct DeferredContract;

impl DeferredContract {
    fn spawn_data(
        ctx: &ContractCtx,
        instruction: &Instruction,
    ) -> Result<DeferredData, ContractError> {
        let raw = instruction
            .arg("proposedTransaction")
            .ok_or_else(|| ContractError::MissingArgument("proposedTransaction".into()))?;
        let proposed = ClientTransaction::decode(&mut &*raw)
            .map_err(|e| ContractError::BadEncoding(e.to_string()))?;
        if proposed.instructions.is_empty() {
            return Err(ContractError::Failed(
                "proposed transaction has no instructions".into(),
            ));
        }

        let expire_block_index = match instruction.arg("expireBlockIndex") {
            Some(raw) => {
                let value = decode_u64_arg(raw)?;
                if value == 0 {
                    ctx.block_index + DEFAULT_EXPIRY_DELTA
                } else {
                    value
                }
            }
            None => ctx.block_index + DEFAULT_EXPIRY_DELTA,
        };
        let max_num_execution = match instruction.arg("maxNumExecution") {
            Some(raw) => decode_u64_arg(raw)?.max(1),
            None => 1,
        };

        let instruction_hashes = proposed.instructions.iter().map(|i| i.hash()).collect();
        Ok(DeferredData {
            proposed_transaction: proposed,
            expire_block_index,
            instruction_hashes,
            max_num_execution,
        })
    }

    fn add_proof(
        ctx: &ContractCtx,
        instruction: &Instruction,
    ) -> Result<Vec<StateChange>, ContractError> {
        let (instance, mut data) = load(ctx, &instruction.instance_id)?;
        if ctx.block_index > data.expire_block_index {
            return Err(ContractError::ExpiredOrExhausted);
        }

        let identity_raw = instruction
            .arg("identity")
            .ok_or_else(|| ContractError::MissingArgument("identity".into()))?;
        let identity = Identity::decode(&mut &*identity_raw)
            .map_err(|e| ContractError::BadEncoding(e.to_string()))?;
        let signature_raw = instruction
            .arg("signature")
            .ok_or_else(|| ContractError::MissingArgument("signature".into()))?;
        let signature_bytes: [u8; 64] = signature_raw
            .try_into()
            .map_err(|_| ContractError::BadEncoding("expected 64-byte signature".into()))?;
        let signature = SignerSignature(signature_bytes);
        let index = match instruction.arg("index") {
            Some(raw) => decode_u32_arg(raw)? as usize,
            None => 0,
        };

        let target = data
            .proposed_transaction
            .instructions
            .get_mut(index)
            .ok_or_else(|| ContractError::Failed("instruction index out of range".into()))?;
        if target.signer_identities.contains(&identity) {
            return Err(ContractError::Failed(
                "identity already added a proof".into(),
            ));
        }

        // The proof must cover the instruction hash recorded at spawn time.
        let expected = data
            .instruction_hashes
            .get(index)
            .copied()
            .ok_or_else(|| ContractError::Failed("missing instruction hash".into()))?;
        identity
            .verify(&instruction_message(&expected), &signature)
            .map_err(|_| ContractError::Failed("proof signature invalid".into()))?;

        target.signer_identities.push(identity);
        target.signatures.push(signature);

        Ok(vec![StateChange::update(
            instruction.instance_id,
            CONTRACT_DEFERRED.to_string(),
            data.encode(),
            instance.darc_id,
            instance.version + 1,
        )])
    }

    fn exec_proposed_tx(
        ctx: &ContractCtx,
        instruction: &Instruction,
    ) -> Result<Vec<StateChange>, ContractError> {
        let (instance, mut data) = load(ctx, &instruction.instance_id)?;
        if ctx.block_index > data.expire_block_index || data.max_num_execution == 0 {
            return Err(ContractError::ExpiredOrExhausted);
        }

        let mut overlay = OverlayView::new(ctx.view);
        let mut all_changes = Vec::new();

        for (i, proposed) in data.proposed_transaction.instructions.iter().enumerate() {
            // Proofs were collected against the hashes recorded at spawn
            // time. Execution dispatches the instruction as originally
            // proposed, so instance ids derived from it stay the ones the
            // proposer announced.
            let mut pristine = proposed.clone();
            pristine.signer_identities.clear();
            pristine.signer_counters.clear();
            pristine.signatures.clear();
            let expected = data.instruction_hashes[i];
            if pristine.hash() != expected {
                return Err(ContractError::Failed(format!(
                    "instruction {} drifted from its recorded hash",
                    i
                )));
            }

            let message = instruction_message(&expected);
            if proposed.signer_identities.is_empty() {
                return Err(ContractError::Failed(format!(
                    "instruction {} has no proofs",
                    i
                )));
            }
            for (identity, signature) in proposed
                .signer_identities
                .iter()
                .zip(&proposed.signatures)
            {
                identity
                    .verify(&message, signature)
                    .map_err(|_| ContractError::Failed("proof signature invalid".into()))?;
            }

            let changes = dispatch(ctx, &overlay, &pristine, &proposed.signer_identities)?;
            overlay.absorb(&changes);
            all_changes.extend(changes);
        }

        data.max_num_execution -= 1;
        all_changes.push(StateChange::update(
            instruction.instance_id,
            CONTRACT_DEFERRED.to_string(),
            data.encode(),
            instance.darc_id,
            instance.version + 1,
        ));
        Ok(all_changes)
    }
}

/// Authorize and run one proposed instruction against the overlay view.
/// `signers` are the identities whose proofs were verified by the caller.
fn dispatch(
    ctx: &ContractCtx,
    overlay: &OverlayView,
    proposed: &Instruction,
    signers: &[Identity],
) -> Result<Vec<StateChange>, ContractError> {
    let resolver = ViewResolver(overlay);

    let darc_id = match &proposed.action {
        InstructionAction::Spawn(_) => Hash(proposed.instance_id.0),
        InstructionAction::Invoke(_) | InstructionAction::Delete(_) => {
            overlay
                .get(&proposed.instance_id)
                .ok_or_else(|| ContractError::Failed("target instance missing".into()))?
                .darc_id
        }
    };
    let darc = resolver
        .resolve(&darc_id)
        .ok_or_else(|| ContractError::Failed("governing darc missing".into()))?;
    darc.check_authorization(&proposed.action_string(), signers, &resolver)?;

    let handler = ctx
        .registry
        .get(proposed.action.contract_id())
        .ok_or_else(|| {
            ContractError::Failed(format!(
                "unknown contract {:?}",
                proposed.action.contract_id()
            ))
        })?;
    let nested_ctx = ContractCtx {
        view: overlay,
        registry: ctx.registry,
        block_index: ctx.block_index,
        timestamp_ns: ctx.timestamp_ns,
        darc_id,
    };
    let mut coins: Vec<Coin> = Vec::new();
    match &proposed.action {
        InstructionAction::Spawn(_) => handler.spawn(&nested_ctx, proposed, &mut coins),
        InstructionAction::Invoke(_) => handler.invoke(&nested_ctx, proposed, &mut coins),
        InstructionAction::Delete(_) => handler.delete(&nested_ctx, proposed, &mut coins),
    }
}

impl Contract for DeferredContract {
    fn spawn(
        &self,
        ctx: &ContractCtx,
        instruction: &Instruction,
        _coins: &mut Vec<Coin>,
    ) -> Result<Vec<StateChange>, ContractError> {
        let data = Self::spawn_data(ctx, instruction)?;
        Ok(vec![StateChange::create(
            instruction.derive_id(""),
            CONTRACT_DEFERRED.to_string(),
            data.encode(),
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
            InstructionAction::Invoke(invoke) => invoke.command.as_str(),
            _ => unreachable!("executor dispatches invoke only"),
        };
        match command {
            "add_proof" => Self::add_proof(ctx, instruction),
            "exec_proposed_tx" => Self::exec_proposed_tx(ctx, instruction),
            other => Err(ContractError::Failed(format!(
                "deferred contract has no command {:?}",
                other
            ))),
        }
    }
}
