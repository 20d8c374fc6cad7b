//! Execution error taxonomy.

use byzcoin_darc::DarcError;
use byzcoin_trie::TrieError;
use byzcoin_types::InstanceId;
use thiserror::Error;

/// Errors a contract handler can return.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("ERR_BAD_ENCODING: {0}")]
    BadEncoding(String),
    #[error("missing argument {0:?}")]
    MissingArgument(String),
    #[error("ERR_EXPIRED_OR_EXHAUSTED: deferred transaction can no longer execute")]
    ExpiredOrExhausted,
    #[error("contract does not support {0}")]
    NotSupported(&'static str),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Darc(#[from] DarcError),
}

/// Why a transaction was rejected (`accepted = false`).
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("ERR_BAD_SIGNATURE: instruction signature invalid")]
    BadSignature,
    #[error("ERR_STALE_COUNTER: signer {signer} sent counter {got}, expected {expected}")]
    StaleCounter {
        signer: String,
        got: u64,
        expected: u64,
    },
    #[error("ERR_UNKNOWN_CONTRACT: {0:?}")]
    UnknownContract(String),
    #[error("no instance at {0:?}")]
    NoSuchInstance(InstanceId),
    #[error("instance {0:?} is governed by contract {1:?}")]
    WrongContract(InstanceId, String),
    #[error("only one config update allowed per block")]
    ConfigUpdateTwice,
    #[error(transparent)]
    Darc(#[from] DarcError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Trie(#[from] TrieError),
}
