//! Client transactions and instructions.

use crate::crypto::{Identity, Signer, SignerSignature};
use crate::hash::{sha256, Hash};
use crate::identifiers::{ContractId, InstanceId};
use crate::signing::instruction_message;
use parity_scale_codec::{Decode, Encode};

/// A named argument passed to a contract handler.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Argument {
    pub name: String,
    pub value: Vec<u8>,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Create a new instance of a contract.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Spawn {
    pub contract_id: ContractId,
    pub args: Vec<Argument>,
}

/// Mutate an existing instance.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Invoke {
    pub contract_id: ContractId,
    pub command: String,
    pub args: Vec<Argument>,
}

/// Tombstone an existing instance.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Delete {
    pub contract_id: ContractId,
}

/// The tagged operation an instruction performs.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum InstructionAction {
    Spawn(Spawn),
    Invoke(Invoke),
    Delete(Delete),
}

impl InstructionAction {
    pub fn contract_id(&self) -> &str {
        match self {
            InstructionAction::Spawn(s) => &s.contract_id,
            InstructionAction::Invoke(i) => &i.contract_id,
            InstructionAction::Delete(d) => &d.contract_id,
        }
    }
}

/// One instruction of a client transaction.
///
/// Signatures cover the canonical instruction hash, which excludes the
/// signatures themselves.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Instruction {
    /// The instance this instruction operates on. For Spawn this is the id
    /// of the governing darc's instance.
    pub instance_id: InstanceId,
    pub action: InstructionAction,
    pub signer_identities: Vec<Identity>,
    /// Per-signer monotonic replay guard, parallel to `signer_identities`.
    /// Each entry must equal the signer's stored counter plus one.
    pub signer_counters: Vec<u64>,
    pub signatures: Vec<SignerSignature>,
}

impl Instruction {
    pub fn spawn(instance_id: InstanceId, contract_id: impl Into<String>, args: Vec<Argument>) -> Self {
        Self {
            instance_id,
            action: InstructionAction::Spawn(Spawn {
                contract_id: contract_id.into(),
                args,
            }),
            signer_identities: Vec::new(),
            signer_counters: Vec::new(),
            signatures: Vec::new(),
        }
    }

    pub fn invoke(
        instance_id: InstanceId,
        contract_id: impl Into<String>,
        command: impl Into<String>,
        args: Vec<Argument>,
    ) -> Self {
        Self {
            instance_id,
            action: InstructionAction::Invoke(Invoke {
                contract_id: contract_id.into(),
                command: command.into(),
                args,
            }),
            signer_identities: Vec::new(),
            signer_counters: Vec::new(),
            signatures: Vec::new(),
        }
    }

    pub fn delete(instance_id: InstanceId, contract_id: impl Into<String>) -> Self {
        Self {
            instance_id,
            action: InstructionAction::Delete(Delete {
                contract_id: contract_id.into(),
            }),
            signer_identities: Vec::new(),
            signer_counters: Vec::new(),
            signatures: Vec::new(),
        }
    }

    /// Canonical hash: encoding of everything except the signatures.
    pub fn hash(&self) -> Hash {
        let unsigned = Instruction {
            instance_id: self.instance_id,
            action: self.action.clone(),
            signer_identities: self.signer_identities.clone(),
            signer_counters: self.signer_counters.clone(),
            signatures: Vec::new(),
        };
        sha256(&unsigned.encode())
    }

    /// Derive the id of an instance created by this instruction.
    pub fn derive_id(&self, what: &str) -> InstanceId {
        let mut data = Vec::new();
        data.extend_from_slice(self.hash().as_bytes());
        data.extend_from_slice(what.as_bytes());
        InstanceId::from_hash(sha256(&data))
    }

    /// The darc action string gating this instruction:
    /// `spawn:<contract>`, `invoke:<contract>.<cmd>` or `delete:<contract>`.
    pub fn action_string(&self) -> String {
        match &self.action {
            InstructionAction::Spawn(s) => format!("spawn:{}", s.contract_id),
            InstructionAction::Invoke(i) => format!("invoke:{}.{}", i.contract_id, i.command),
            InstructionAction::Delete(d) => format!("delete:{}", d.contract_id),
        }
    }

    /// Look up a named argument on a Spawn or Invoke.
    pub fn arg(&self, name: &str) -> Option<&[u8]> {
        let args = match &self.action {
            InstructionAction::Spawn(s) => &s.args,
            InstructionAction::Invoke(i) => &i.args,
            InstructionAction::Delete(_) => return None,
        };
        args.iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_slice())
    }

    /// Fill `signer_identities`/`signer_counters` and sign with each signer.
    ///
    /// Counters must be the stored counter plus one, per signer.
    pub fn sign_with(&mut self, signers: &[(&Signer, u64)]) {
        self.signer_identities = signers.iter().map(|(s, _)| s.identity()).collect();
        self.signer_counters = signers.iter().map(|(_, c)| *c).collect();
        let msg = instruction_message(&self.hash());
        self.signatures = signers.iter().map(|(s, _)| s.sign(&msg)).collect();
    }

    /// Verify every attached signature against its identity.
    pub fn verify_signatures(&self) -> bool {
        if self.signatures.len() != self.signer_identities.len()
            || self.signer_counters.len() != self.signer_identities.len()
        {
            return false;
        }
        let msg = instruction_message(&self.hash());
        self.signer_identities
            .iter()
            .zip(&self.signatures)
            .all(|(id, sig)| id.verify(&msg, sig).is_ok())
    }
}

/// An ordered batch of instructions submitted by one client.
#[derive(Clone, Debug, PartialEq, Eq, Default, Encode, Decode)]
pub struct ClientTransaction {
    pub instructions: Vec<Instruction>,
}

impl ClientTransaction {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    /// Hash identifying this transaction, for dedup and caching.
    pub fn hash(&self) -> Hash {
        sha256(&self.encode())
    }

    /// Sign every instruction with the same signer, using counters
    /// `first_counter, first_counter+1, ...`.
    pub fn sign_with(&mut self, signer: &Signer, first_counter: u64) {
        for (i, instruction) in self.instructions.iter_mut().enumerate() {
            instruction.sign_with(&[(signer, first_counter + i as u64)]);
        }
    }

    /// Encoded size in bytes, used against `max_block_size`.
    pub fn size(&self) -> usize {
        self.encode().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_signer;

    fn spawn_instruction() -> Instruction {
        Instruction::spawn(
            InstanceId([1u8; 32]),
            "value",
            vec![Argument::new("value", vec![5, 6, 7, 8])],
        )
    }

    #[test]
    fn hash_ignores_signatures() {
        let mut instr = spawn_instruction();
        let before = instr.hash();
        let signer = test_signer(1);
        instr.sign_with(&[(&signer, 1)]);
        // Identities and counters are part of the hash, signatures are not.
        let mut resigned = instr.clone();
        resigned.signatures.clear();
        assert_eq!(instr.hash(), resigned.hash());
        assert_ne!(before, instr.hash());
    }

    #[test]
    fn sign_and_verify() {
        let mut instr = spawn_instruction();
        let signer = test_signer(2);
        instr.sign_with(&[(&signer, 1)]);
        assert!(instr.verify_signatures());

        instr.signer_counters[0] = 2;
        assert!(!instr.verify_signatures(), "hash changed, stale signature");
    }

    #[test]
    fn derive_id_is_deterministic() {
        let instr = spawn_instruction();
        assert_eq!(instr.derive_id(""), instr.derive_id(""));
        assert_ne!(instr.derive_id(""), instr.derive_id("darc"));
    }

    #[test]
    fn action_strings() {
        assert_eq!(spawn_instruction().action_string(), "spawn:value");
        let inv = Instruction::invoke(InstanceId::ZERO, "config", "update_config", vec![]);
        assert_eq!(inv.action_string(), "invoke:config.update_config");
        let del = Instruction::delete(InstanceId::ZERO, "value");
        assert_eq!(del.action_string(), "delete:value");
    }
}
