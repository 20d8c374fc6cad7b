//! Genesis construction and client-side validation.

use byzcoin_darc::Darc;
use byzcoin_engine::{ContractRegistry, Executor};
use byzcoin_trie::Trie;
use byzcoin_types::{
    Argument, Block, BlockHeader, ChainConfig, DataBody, Identity, Instruction,
    InstructionAction, InstanceId, Roster, TxResult,
};
use parity_scale_codec::{Decode, Encode};
use std::time::Duration;
use thiserror::Error;

/// Why a fetched genesis block was rejected.
///
/// The display strings are part of the client contract; tests match them
/// verbatim.
#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("wrong roster in genesis block")]
    WrongRoster,
    #[error("fail to decode data: {0}")]
    BadEncoding(String),
    #[error("genesis darc tx should only have one instruction")]
    NotOneInstruction,
    #[error("didn't get a spawn instruction")]
    NotSpawn,
    #[error("fail to decode the darc: {0}")]
    BadDarc(String),
    #[error("wrong darc spawned")]
    WrongDarc,
    #[error("genesis trie root mismatch")]
    RootMismatch,
}

impl GenesisError {
    /// The taxonomy name for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            GenesisError::WrongRoster => "ERR_WRONG_ROSTER",
            GenesisError::BadEncoding(_) | GenesisError::BadDarc(_) => "ERR_BAD_ENCODING",
            GenesisError::NotOneInstruction
            | GenesisError::NotSpawn
            | GenesisError::WrongDarc
            | GenesisError::RootMismatch => "ERR_INVARIANT_VIOLATED",
        }
    }
}

/// The darc a fresh chain is born with: `owner` holds `_sign`, `_evolve`,
/// the darc-management rules, and every extra action requested.
pub fn genesis_darc(owner: &Identity, extra_rules: &[&str]) -> Darc {
    let mut actions = vec!["spawn:darc", "invoke:darc.evolve"];
    actions.extend_from_slice(extra_rules);
    Darc::with_owner(b"genesis darc".to_vec(), owner, &actions)
}

/// Build a genesis block: the chain config at the zero instance and the
/// genesis darc, recorded by a single spawn instruction.
///
/// The genesis header carries no collective signature; clients trust it by
/// its hash.
pub fn build_genesis(
    roster: Roster,
    block_interval: Duration,
    owner: &Identity,
    extra_rules: &[&str],
) -> Result<(Block, Darc, ChainConfig), GenesisError> {
    let darc = genesis_darc(owner, extra_rules);
    let config = ChainConfig::new(roster.clone(), block_interval);

    let mut trie = Trie::new();
    let executor = Executor::new(ContractRegistry::with_builtins());
    let (_, root) = executor
        .execute_genesis(&mut trie, &darc, &config)
        .map_err(|e| GenesisError::BadEncoding(e.to_string()))?;

    let spawn = Instruction::spawn(
        InstanceId(darc.base_id().0),
        "darc",
        vec![Argument::new("darc", darc.encode())],
    );
    let body = DataBody {
        tx_results: vec![TxResult {
            accepted: true,
            tx: byzcoin_types::ClientTransaction::new(vec![spawn]),
        }],
        view_change: None,
    };
    let header = BlockHeader {
        index: 0,
        roster_id: roster.id(),
        prev_hashes: Vec::new(),
        data_hash: body.hash(),
        trie_root: root,
        timestamp_ns: 0,
        forward_links: Vec::new(),
        signature: None,
    };
    Ok((Block { header, body }, darc, config))
}

/// Validate a genesis block fetched from an untrusted server against the
/// roster and darc the client asked for.
pub fn validate_genesis(
    header: &BlockHeader,
    payload: &[u8],
    expected_roster: &Roster,
    expected_darc: &Darc,
) -> Result<(), GenesisError> {
    if header.roster_id != expected_roster.id() {
        return Err(GenesisError::WrongRoster);
    }

    let body =
        DataBody::decode(&mut &*payload).map_err(|e| GenesisError::BadEncoding(e.to_string()))?;
    if body.tx_results.len() != 1 || body.tx_results[0].tx.instructions.len() != 1 {
        return Err(GenesisError::NotOneInstruction);
    }
    let instruction = &body.tx_results[0].tx.instructions[0];
    let spawn = match &instruction.action {
        InstructionAction::Spawn(spawn) => spawn,
        _ => return Err(GenesisError::NotSpawn),
    };
    let raw = spawn
        .args
        .iter()
        .find(|a| a.name == "darc")
        .map(|a| a.value.as_slice())
        .ok_or(GenesisError::WrongDarc)?;
    let darc = Darc::decode(&mut &*raw).map_err(|e| GenesisError::BadDarc(e.to_string()))?;
    if darc != *expected_darc {
        return Err(GenesisError::WrongDarc);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use byzcoin_types::test_utils::{test_roster, test_signer};
    use parity_scale_codec::Encode;

    #[test]
    fn build_and_validate_round_trip() {
        let (roster, _) = test_roster(3);
        let signer = test_signer(1);
        let (block, darc, config) = build_genesis(
            roster.clone(),
            Duration::from_millis(500),
            &signer.identity(),
            &["spawn:value"],
        )
        .unwrap();

        assert_eq!(block.header.index, 0);
        assert_eq!(config.block_interval(), Duration::from_millis(500));
        assert!(darc.rule("spawn:value").is_some());

        let payload = block.body.encode();
        validate_genesis(&block.header, &payload, &roster, &darc).unwrap();
    }

    #[test]
    fn wrong_roster_detected() {
        let (roster, _) = test_roster(3);
        let (other_roster, _) = test_roster(4);
        let signer = test_signer(1);
        let (block, darc, _) = build_genesis(
            roster,
            Duration::from_millis(500),
            &signer.identity(),
            &[],
        )
        .unwrap();

        let err = validate_genesis(
            &block.header,
            &block.body.encode(),
            &other_roster,
            &darc,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "wrong roster in genesis block");
        assert_eq!(err.code(), "ERR_WRONG_ROSTER");
    }

    #[test]
    fn undecodable_payload_detected() {
        let (roster, _) = test_roster(3);
        let signer = test_signer(1);
        let (block, darc, _) = build_genesis(
            roster.clone(),
            Duration::from_millis(500),
            &signer.identity(),
            &[],
        )
        .unwrap();

        let err = validate_genesis(&block.header, &[1, 2, 3], &roster, &darc).unwrap_err();
        assert!(err.to_string().starts_with("fail to decode data:"));
        assert_eq!(err.code(), "ERR_BAD_ENCODING");
    }

    #[test]
    fn empty_payload_detected() {
        let (roster, _) = test_roster(3);
        let signer = test_signer(1);
        let (block, darc, _) = build_genesis(
            roster.clone(),
            Duration::from_millis(500),
            &signer.identity(),
            &[],
        )
        .unwrap();

        let empty = DataBody::default().encode();
        let err = validate_genesis(&block.header, &empty, &roster, &darc).unwrap_err();
        assert_eq!(
            err.to_string(),
            "genesis darc tx should only have one instruction"
        );
    }

    #[test]
    fn non_spawn_instruction_detected() {
        let (roster, _) = test_roster(3);
        let signer = test_signer(1);
        let (block, darc, _) = build_genesis(
            roster.clone(),
            Duration::from_millis(500),
            &signer.identity(),
            &[],
        )
        .unwrap();

        let body = DataBody {
            tx_results: vec![TxResult {
                accepted: true,
                tx: byzcoin_types::ClientTransaction::new(vec![Instruction::invoke(
                    InstanceId::ZERO,
                    "darc",
                    "evolve",
                    vec![],
                )]),
            }],
            view_change: None,
        };
        let err =
            validate_genesis(&block.header, &body.encode(), &roster, &darc).unwrap_err();
        assert_eq!(err.to_string(), "didn't get a spawn instruction");
    }

    #[test]
    fn wrong_darc_detected() {
        let (roster, _) = test_roster(3);
        let signer = test_signer(1);
        let (block, darc, _) = build_genesis(
            roster.clone(),
            Duration::from_millis(500),
            &signer.identity(),
            &[],
        )
        .unwrap();

        // A decodable darc, but not the requested one.
        let other = genesis_darc(&test_signer(2).identity(), &[]);
        let body = DataBody {
            tx_results: vec![TxResult {
                accepted: true,
                tx: byzcoin_types::ClientTransaction::new(vec![Instruction::spawn(
                    InstanceId::ZERO,
                    "darc",
                    vec![Argument::new("darc", other.encode())],
                )]),
            }],
            view_change: None,
        };
        let err =
            validate_genesis(&block.header, &body.encode(), &roster, &darc).unwrap_err();
        assert_eq!(err.to_string(), "wrong darc spawned");

        // An undecodable darc argument.
        let body = DataBody {
            tx_results: vec![TxResult {
                accepted: true,
                tx: byzcoin_types::ClientTransaction::new(vec![Instruction::spawn(
                    InstanceId::ZERO,
                    "darc",
                    vec![Argument::new("darc", vec![1, 2, 3])],
                )]),
            }],
            view_change: None,
        };
        let err =
            validate_genesis(&block.header, &body.encode(), &roster, &darc).unwrap_err();
        assert!(err.to_string().starts_with("fail to decode the darc:"));
    }
}
