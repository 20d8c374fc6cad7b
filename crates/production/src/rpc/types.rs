//! JSON request/response bodies. Binary payloads travel hex-encoded over
//! the canonical SCALE encoding.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateGenesisRequest {
    /// Hex BLS public key + address per roster member, in order.
    pub roster: Vec<ServerInfo>,
    /// Extra darc rules granted to the owner, e.g. `"spawn:value"`.
    pub rules: Vec<String>,
    /// Owner identity string, e.g. `ed25519:HEX`.
    pub owner: String,
    pub block_interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerInfo {
    pub public_key: String,
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct CreateGenesisResponse {
    pub chain_id: String,
    /// Hex-encoded genesis block.
    pub genesis: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTxRequest {
    pub chain_id: String,
    /// Hex-encoded `ClientTransaction`.
    pub transaction: String,
    /// Block intervals to wait for inclusion; 0 returns immediately.
    #[serde(default)]
    pub wait_blocks: u32,
}

#[derive(Debug, Serialize)]
pub struct SubmitTxResponse {
    pub tx_hash: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ProofResponse {
    pub chain_id: String,
    pub key: String,
    /// Hex-encoded `Proof`.
    pub proof: String,
}

#[derive(Debug, Deserialize)]
pub struct SendViewChangeRequest {
    pub chain_id: String,
    /// Hex-encoded `ViewChangeRequest`.
    pub request: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub chain_id: String,
    pub head_index: u64,
    pub head_hash: String,
    pub leader_index: u32,
    pub pending_transactions: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
