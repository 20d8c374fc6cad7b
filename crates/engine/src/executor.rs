//! The transaction executor.

use crate::contracts::config::CONTRACT_CONFIG;
use crate::contracts::darc::CONTRACT_DARC;
use crate::error::ExecError;
use crate::registry::{Coin, ContractCtx, ContractRegistry, ViewResolver};
use byzcoin_darc::{Darc, DarcResolver};
use byzcoin_trie::{StagingTrie, Trie, TrieError, TrieView};
use byzcoin_types::{
    sha256, ChainConfig, ClientTransaction, Hash, Identity, Instruction, InstructionAction,
    InstanceId, StateChange, TxResult,
};
use parity_scale_codec::{Decode, Encode};
use tracing::debug;

/// Result of deterministically applying one batch to a trie snapshot.
#[derive(Clone, Debug)]
pub struct BatchOutput {
    /// One entry per submitted transaction, in order, rejected ones
    /// included with `accepted = false`.
    pub tx_results: Vec<TxResult>,
    /// Ordered changes of the accepted transactions only.
    pub state_changes: Vec<StateChange>,
    /// Trie root after applying `state_changes` to the prior root.
    pub root: Hash,
}

impl BatchOutput {
    /// Hashes of rejected transactions, for client status reporting.
    pub fn rejected(&self) -> impl Iterator<Item = Hash> + '_ {
        self.tx_results
            .iter()
            .filter(|r| !r.accepted)
            .map(|r| r.tx.hash())
    }
}

/// The trie key holding a signer's replay counter.
pub fn counter_instance_id(identity: &Identity) -> InstanceId {
    let mut data = b"signer-counter:".to_vec();
    data.extend_from_slice(identity.to_string().as_bytes());
    InstanceId::from_hash(sha256(&data))
}

/// Internal pseudo-contract id for counter instances.
const CONTRACT_COUNTER: &str = "counter";

/// Deterministically applies client transactions to trie snapshots.
pub struct Executor {
    registry: ContractRegistry,
}

impl Executor {
    pub fn new(registry: ContractRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    /// Write the genesis instances (config and genesis darc) and commit the
    /// resulting root.
    pub fn execute_genesis(
        &self,
        trie: &mut Trie,
        darc: &Darc,
        config: &ChainConfig,
    ) -> Result<(Vec<StateChange>, Hash), TrieError> {
        let changes = vec![
            StateChange::create(
                InstanceId::ZERO,
                CONTRACT_CONFIG.to_string(),
                config.encode(),
                darc.base_id(),
            ),
            StateChange::create(
                InstanceId(darc.base_id().0),
                CONTRACT_DARC.to_string(),
                darc.encode(),
                darc.base_id(),
            ),
        ];
        let root = trie.apply(&changes)?;
        Ok((changes, root))
    }

    /// Apply a batch to the trie's current root.
    ///
    /// Rejected transactions roll back atomically and appear in the output
    /// with `accepted = false`; the returned root covers only accepted
    /// changes. The trie's own root is NOT moved; callers adopt the
    /// returned root once the block commits.
    pub fn execute_batch(
        &self,
        trie: &mut Trie,
        txs: &[ClientTransaction],
        block_index: u64,
        timestamp_ns: i64,
    ) -> Result<BatchOutput, TrieError> {
        let (tx_results, state_changes) = {
            let mut staging = StagingTrie::new(&*trie);
            let mut config_updated = false;
            let mut results = Vec::with_capacity(txs.len());

            for tx in txs {
                match self.execute_transaction(
                    &mut staging,
                    tx,
                    block_index,
                    timestamp_ns,
                    &mut config_updated,
                ) {
                    Ok(()) => {
                        staging.commit_tx();
                        results.push(TxResult {
                            accepted: true,
                            tx: tx.clone(),
                        });
                    }
                    Err(err) => {
                        staging.rollback_tx();
                        debug!(tx_hash = ?tx.hash(), %err, "transaction rejected");
                        results.push(TxResult {
                            accepted: false,
                            tx: tx.clone(),
                        });
                    }
                }
            }
            (results, staging.into_changes())
        };

        let root = trie.apply_preview(&state_changes)?;
        Ok(BatchOutput {
            tx_results,
            state_changes,
            root,
        })
    }

    fn execute_transaction(
        &self,
        staging: &mut StagingTrie,
        tx: &ClientTransaction,
        block_index: u64,
        timestamp_ns: i64,
        config_updated: &mut bool,
    ) -> Result<(), ExecError> {
        let mut coins: Vec<Coin> = Vec::new();
        for instruction in &tx.instructions {
            self.execute_instruction(
                staging,
                instruction,
                &mut coins,
                block_index,
                timestamp_ns,
                config_updated,
            )?;
        }
        Ok(())
    }

    fn execute_instruction(
        &self,
        staging: &mut StagingTrie,
        instruction: &Instruction,
        coins: &mut Vec<Coin>,
        block_index: u64,
        timestamp_ns: i64,
        config_updated: &mut bool,
    ) -> Result<(), ExecError> {
        if !instruction.verify_signatures() {
            return Err(ExecError::BadSignature);
        }

        let counter_changes = self.check_counters(staging, instruction)?;
        let darc_id = self.governing_darc_id(staging, instruction)?;

        let contract_id = instruction.action.contract_id().to_string();
        let is_config_update =
            matches!(&instruction.action, InstructionAction::Invoke(_)) && contract_id == CONTRACT_CONFIG;
        if is_config_update && *config_updated {
            return Err(ExecError::ConfigUpdateTwice);
        }

        // Authorization: the governing darc's rule for this action must
        // evaluate true over the attached signer identities.
        let resolver = ViewResolver(&*staging);
        let darc = resolver
            .resolve(&darc_id)
            .ok_or(ExecError::NoSuchInstance(InstanceId(darc_id.0)))?;
        darc.check_authorization(
            &instruction.action_string(),
            &instruction.signer_identities,
            &resolver,
        )?;

        let handler = self
            .registry
            .get(&contract_id)
            .ok_or_else(|| ExecError::UnknownContract(contract_id.clone()))?
            .clone();

        let changes = {
            let ctx = ContractCtx {
                view: &*staging,
                registry: &self.registry,
                block_index,
                timestamp_ns,
                darc_id,
            };
            match &instruction.action {
                InstructionAction::Spawn(_) => handler.spawn(&ctx, instruction, coins)?,
                InstructionAction::Invoke(_) => handler.invoke(&ctx, instruction, coins)?,
                InstructionAction::Delete(_) => handler.delete(&ctx, instruction, coins)?,
            }
        };

        for change in counter_changes {
            staging.stage(change)?;
        }
        for change in changes {
            staging.stage(change)?;
        }
        if is_config_update {
            *config_updated = true;
        }
        Ok(())
    }

    /// Enforce the per-signer replay guard and produce the counter bumps.
    fn check_counters(
        &self,
        staging: &StagingTrie,
        instruction: &Instruction,
    ) -> Result<Vec<StateChange>, ExecError> {
        let mut changes = Vec::new();
        for (identity, &counter) in instruction
            .signer_identities
            .iter()
            .zip(&instruction.signer_counters)
        {
            let key = counter_instance_id(identity);
            let stored = staging.get(&key);
            let current = match &stored {
                Some(instance) => u64::decode(&mut instance.value.as_slice()).unwrap_or(0),
                None => 0,
            };
            if counter != current + 1 {
                return Err(ExecError::StaleCounter {
                    signer: identity.to_string(),
                    got: counter,
                    expected: current + 1,
                });
            }
            let change = match stored {
                Some(instance) => StateChange::update(
                    key,
                    CONTRACT_COUNTER.to_string(),
                    counter.encode(),
                    Hash::ZERO,
                    instance.version + 1,
                ),
                None => StateChange::create(
                    key,
                    CONTRACT_COUNTER.to_string(),
                    counter.encode(),
                    Hash::ZERO,
                ),
            };
            changes.push(change);
        }
        Ok(changes)
    }

    /// Resolve the base id of the darc governing this instruction's target.
    fn governing_darc_id(
        &self,
        staging: &StagingTrie,
        instruction: &Instruction,
    ) -> Result<Hash, ExecError> {
        let target = staging
            .get(&instruction.instance_id)
            .ok_or(ExecError::NoSuchInstance(instruction.instance_id))?;
        match &instruction.action {
            // Spawn targets the governing darc's own instance.
            InstructionAction::Spawn(_) => {
                if target.contract_id != CONTRACT_DARC {
                    return Err(ExecError::WrongContract(
                        instruction.instance_id,
                        target.contract_id,
                    ));
                }
                Ok(Hash(instruction.instance_id.0))
            }
            // Invoke/Delete target an existing instance of their contract.
            InstructionAction::Invoke(_) | InstructionAction::Delete(_) => {
                if target.contract_id != instruction.action.contract_id() {
                    return Err(ExecError::WrongContract(
                        instruction.instance_id,
                        target.contract_id,
                    ));
                }
                Ok(target.darc_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::value::CONTRACT_VALUE;
    use byzcoin_types::test_utils::test_signer;
    use byzcoin_types::{Argument, Roster, ServerIdentity, Signer};
    use std::time::Duration;

    fn setup() -> (Executor, Trie, Darc, Signer) {
        let signer = test_signer(1);
        let darc = Darc::with_owner(
            b"genesis".to_vec(),
            &signer.identity(),
            &[
                "spawn:value",
                "invoke:value.update",
                "delete:value",
                "invoke:config.update_config",
            ],
        );
        let roster = Roster::new(vec![ServerIdentity::new(
            byzcoin_types::test_utils::test_server_key(1).public_key(),
            "tcp://127.0.0.1:7000".into(),
        )]);
        let config = ChainConfig::new(roster, Duration::from_millis(500));

        let executor = Executor::new(ContractRegistry::with_builtins());
        let mut trie = Trie::new();
        executor.execute_genesis(&mut trie, &darc, &config).unwrap();
        (executor, trie, darc, signer)
    }

    fn spawn_value_tx(darc: &Darc, signer: &Signer, counter: u64, value: Vec<u8>) -> ClientTransaction {
        let mut instruction = Instruction::spawn(
            InstanceId(darc.base_id().0),
            CONTRACT_VALUE,
            vec![Argument::new("value", value)],
        );
        instruction.sign_with(&[(signer, counter)]);
        ClientTransaction::new(vec![instruction])
    }

    #[test]
    fn spawn_value_accepted() {
        let (executor, mut trie, darc, signer) = setup();
        let tx = spawn_value_tx(&darc, &signer, 1, vec![5, 6, 7, 8]);
        let new_id = tx.instructions[0].derive_id("");

        let output = executor.execute_batch(&mut trie, &[tx], 1, 0).unwrap();
        assert!(output.tx_results[0].accepted);
        trie.set_root(output.root);

        let instance = trie.get(&new_id).unwrap();
        assert_eq!(instance.value, vec![5, 6, 7, 8]);
        assert_eq!(instance.contract_id, CONTRACT_VALUE);
        assert_eq!(instance.darc_id, darc.base_id());
    }

    #[test]
    fn stale_counter_rejected_and_audited() {
        let (executor, mut trie, darc, signer) = setup();
        let tx1 = spawn_value_tx(&darc, &signer, 1, vec![1]);
        let tx2 = spawn_value_tx(&darc, &signer, 1, vec![2]); // same counter

        let output = executor
            .execute_batch(&mut trie, &[tx1, tx2], 1, 0)
            .unwrap();
        assert!(output.tx_results[0].accepted);
        assert!(!output.tx_results[1].accepted);
        assert_eq!(output.rejected().count(), 1);
    }

    #[test]
    fn unauthorized_signer_rejected() {
        let (executor, mut trie, darc, _) = setup();
        let stranger = test_signer(9);
        let tx = spawn_value_tx(&darc, &stranger, 1, vec![1]);
        let output = executor.execute_batch(&mut trie, &[tx], 1, 0).unwrap();
        assert!(!output.tx_results[0].accepted);
        assert!(output.state_changes.is_empty());
    }

    #[test]
    fn unknown_contract_rejected() {
        let (executor, mut trie, darc, signer) = setup();
        // The darc has no rule for this contract either, but the signer is
        // its owner so the rule lookup fails first with UnknownRule.
        let mut instruction =
            Instruction::spawn(InstanceId(darc.base_id().0), "nonexistent", vec![]);
        instruction.sign_with(&[(&signer, 1)]);
        let tx = ClientTransaction::new(vec![instruction]);
        let output = executor.execute_batch(&mut trie, &[tx], 1, 0).unwrap();
        assert!(!output.tx_results[0].accepted);
    }

    #[test]
    fn rejected_tx_leaves_root_unchanged() {
        let (executor, mut trie, darc, _signer) = setup();
        let prev_root = trie.root();
        let stranger = test_signer(9);
        let tx = spawn_value_tx(&darc, &stranger, 1, vec![1]);
        let output = executor.execute_batch(&mut trie, &[tx], 1, 0).unwrap();
        assert_eq!(output.root, prev_root);
    }

    #[test]
    fn batch_root_is_deterministic() {
        let (executor, mut trie_a, darc, signer) = setup();
        let (_, mut trie_b, _, _) = setup();
        let txs = vec![
            spawn_value_tx(&darc, &signer, 1, vec![1]),
            spawn_value_tx(&darc, &signer, 2, vec![2]),
        ];
        let out_a = executor.execute_batch(&mut trie_a, &txs, 1, 0).unwrap();
        let out_b = executor.execute_batch(&mut trie_b, &txs, 1, 0).unwrap();
        assert_eq!(out_a.root, out_b.root);
        assert_eq!(out_a.state_changes, out_b.state_changes);
    }

    #[test]
    fn darc_evolution_supersedes_old_owner() {
        let signer = test_signer(1);
        let new_owner = test_signer(2);
        let mut darc = Darc::with_owner(b"genesis".to_vec(), &signer.identity(), &["spawn:value"]);
        darc.rules
            .insert("invoke:darc.evolve".into(), signer.identity().to_string());

        let (roster, _) = byzcoin_types::test_utils::test_roster(3);
        let config = ChainConfig::new(roster, Duration::from_millis(500));
        let executor = Executor::new(ContractRegistry::with_builtins());
        let mut trie = Trie::new();
        executor.execute_genesis(&mut trie, &darc, &config).unwrap();

        // Hand everything to the new owner.
        let mut new_rules = darc.rules.clone();
        for rule in ["_sign", "_evolve", "spawn:value"] {
            new_rules.insert(rule.into(), new_owner.identity().to_string());
        }
        let evolved = darc.evolve(b"v1".to_vec(), new_rules);
        let mut evolve_instr = Instruction::invoke(
            InstanceId(darc.base_id().0),
            "darc",
            "evolve",
            vec![Argument::new("darc", evolved.encode())],
        );
        evolve_instr.sign_with(&[(&signer, 1)]);
        let output = executor
            .execute_batch(&mut trie, &[ClientTransaction::new(vec![evolve_instr])], 1, 0)
            .unwrap();
        assert!(output.tx_results[0].accepted);
        trie.set_root(output.root);

        let stored = trie.get(&InstanceId(darc.base_id().0)).unwrap();
        let stored_darc = Darc::decode(&mut stored.value.as_slice()).unwrap();
        assert_eq!(stored_darc.version, 1);

        // The superseded version's owner no longer authorizes spawns.
        let old_owner_tx = spawn_value_tx(&darc, &signer, 2, vec![1]);
        let new_owner_tx = spawn_value_tx(&darc, &new_owner, 1, vec![2]);
        let output = executor
            .execute_batch(&mut trie, &[old_owner_tx, new_owner_tx], 2, 0)
            .unwrap();
        assert!(!output.tx_results[0].accepted);
        assert!(output.tx_results[1].accepted);
    }

    #[test]
    fn instructions_see_earlier_writes_in_same_tx() {
        let (executor, mut trie, darc, signer) = setup();

        // One transaction: spawn a value, then update it.
        let mut spawn = Instruction::spawn(
            InstanceId(darc.base_id().0),
            CONTRACT_VALUE,
            vec![Argument::new("value", vec![1])],
        );
        spawn.sign_with(&[(&signer, 1)]);
        let new_id = spawn.derive_id("");
        let mut update = Instruction::invoke(
            new_id,
            CONTRACT_VALUE,
            "update",
            vec![Argument::new("value", vec![2])],
        );
        update.sign_with(&[(&signer, 2)]);

        let tx = ClientTransaction::new(vec![spawn, update]);
        let output = executor.execute_batch(&mut trie, &[tx], 1, 0).unwrap();
        assert!(output.tx_results[0].accepted);
        trie.set_root(output.root);
        let instance = trie.get(&new_id).unwrap();
        assert_eq!(instance.value, vec![2]);
        assert_eq!(instance.version, 1);
    }
}
