//! Request handlers.

use super::types::*;
use crate::metrics;
use crate::runner::{NodeRunner, RunnerError};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use byzcoin_core::TxStatus;
use byzcoin_node::build_genesis;
use byzcoin_types::{
    BlsKeyPair, BlsPublicKey, ChainId, ClientTransaction, Hash, Identity, InstanceId, NodeIndex,
    Roster, ServerIdentity, ViewChangeRequest,
};
use futures::Stream;
use parity_scale_codec::{Decode, Encode};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::info;

/// Shared state of the RPC server.
#[derive(Clone)]
pub struct RpcState {
    pub runner: Arc<NodeRunner>,
    pub node_key: BlsKeyPair,
    pub our_index: NodeIndex,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn from_runner_error(e: RunnerError) -> ApiError {
    let status = match &e {
        RunnerError::UnknownChain(_) => StatusCode::NOT_FOUND,
        RunnerError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

fn parse_chain_id(hex_str: &str) -> Result<ChainId, ApiError> {
    Hash::from_hex(hex_str)
        .map(ChainId)
        .map_err(|e| bad_request(format!("ERR_BAD_ENCODING: {}", e)))
}

fn parse_hex(hex_str: &str) -> Result<Vec<u8>, ApiError> {
    hex::decode(hex_str).map_err(|e| bad_request(format!("ERR_BAD_ENCODING: {}", e)))
}

pub async fn health_handler() -> StatusCode {
    StatusCode::OK
}

pub async fn metrics_handler() -> String {
    metrics::gather()
}

pub async fn create_genesis_handler(
    State(state): State<RpcState>,
    Json(request): Json<CreateGenesisRequest>,
) -> Result<Json<CreateGenesisResponse>, ApiError> {
    let mut identities = Vec::with_capacity(request.roster.len());
    for server in &request.roster {
        let raw = parse_hex(&server.public_key)?;
        let key: [u8; 48] = raw
            .as_slice()
            .try_into()
            .map_err(|_| bad_request("ERR_BAD_ENCODING: public key must be 48 bytes"))?;
        identities.push(ServerIdentity::new(
            BlsPublicKey(key),
            server.address.clone(),
        ));
    }
    let roster = Roster::new(identities);
    let our_index = roster
        .index_of(&state.node_key.public_key())
        .ok_or_else(|| bad_request("this node is not in the requested roster"))?;
    let owner = Identity::parse(&request.owner)
        .map_err(|e| bad_request(format!("ERR_BAD_ENCODING: {}", e)))?;
    let rules: Vec<&str> = request.rules.iter().map(String::as_str).collect();

    let (genesis, darc, config) = build_genesis(
        roster,
        Duration::from_millis(request.block_interval_ms),
        &owner,
        &rules,
    )
    .map_err(|e| bad_request(e.to_string()))?;

    let chain_id = state
        .runner
        .create_chain(&genesis, &darc, config, our_index, state.node_key.clone())
        .map_err(from_runner_error)?;

    info!(?chain_id, "genesis created via RPC");
    Ok(Json(CreateGenesisResponse {
        chain_id: chain_id.0.to_hex(),
        genesis: hex::encode(genesis.encode()),
    }))
}

pub async fn submit_transaction_handler(
    State(state): State<RpcState>,
    Json(request): Json<SubmitTxRequest>,
) -> Result<Json<SubmitTxResponse>, ApiError> {
    let chain_id = parse_chain_id(&request.chain_id)?;
    let raw = parse_hex(&request.transaction)?;
    let tx = ClientTransaction::decode(&mut raw.as_slice())
        .map_err(|e| bad_request(format!("ERR_BAD_ENCODING: {}", e)))?;
    let tx_hash = tx.hash();

    let status = state
        .runner
        .add_transaction(chain_id, tx, request.wait_blocks)
        .await
        .map_err(from_runner_error)?;

    let response = match status {
        TxStatus::Queued => SubmitTxResponse {
            tx_hash: tx_hash.to_hex(),
            status: "queued".into(),
            block_index: None,
            accepted: None,
        },
        TxStatus::Rejected { reason } => {
            return Err(bad_request(reason));
        }
        TxStatus::Included {
            block_index,
            accepted,
        } => SubmitTxResponse {
            tx_hash: tx_hash.to_hex(),
            status: "included".into(),
            block_index: Some(block_index),
            accepted: Some(accepted),
        },
    };
    Ok(Json(response))
}

pub async fn get_proof_handler(
    State(state): State<RpcState>,
    Path((chain, key)): Path<(String, String)>,
) -> Result<Json<ProofResponse>, ApiError> {
    let chain_id = parse_chain_id(&chain)?;
    let raw = parse_hex(&key)?;
    let key_bytes: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| bad_request("ERR_BAD_ENCODING: key must be 32 bytes"))?;

    let proof = state
        .runner
        .get_proof(chain_id, InstanceId(key_bytes))
        .await
        .map_err(from_runner_error)?;

    Ok(Json(ProofResponse {
        chain_id: chain,
        key,
        proof: hex::encode(proof.encode()),
    }))
}

pub async fn status_handler(
    State(state): State<RpcState>,
    Path(chain): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let chain_id = parse_chain_id(&chain)?;
    let status = state
        .runner
        .chain_status(chain_id)
        .await
        .map_err(from_runner_error)?;
    Ok(Json(StatusResponse {
        chain_id: chain,
        head_index: status.head_index,
        head_hash: status.head_hash.to_hex(),
        leader_index: status.leader_index,
        pending_transactions: status.pending_transactions,
    }))
}

pub async fn send_view_change_handler(
    State(state): State<RpcState>,
    Json(request): Json<SendViewChangeRequest>,
) -> Result<StatusCode, ApiError> {
    let chain_id = parse_chain_id(&request.chain_id)?;
    let raw = parse_hex(&request.request)?;
    let view_change = ViewChangeRequest::decode(&mut raw.as_slice())
        .map_err(|e| bad_request(format!("ERR_BAD_ENCODING: {}", e)))?;
    state
        .runner
        .send_view_change(chain_id, view_change)
        .await
        .map_err(from_runner_error)?;
    Ok(StatusCode::ACCEPTED)
}

/// Adapts the subscriber channel into an SSE stream. Each event's data is
/// the hex-encoded `(header, body)` pair.
struct BlockStream {
    rx: tokio::sync::mpsc::Receiver<(byzcoin_types::BlockHeader, byzcoin_types::DataBody)>,
}

impl Stream for BlockStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx).map(|item| {
            item.map(|(header, body)| {
                Ok(SseEvent::default()
                    .event("block")
                    .data(hex::encode((header, body).encode())))
            })
        })
    }
}

pub async fn stream_blocks_handler(
    State(state): State<RpcState>,
    Path(chain): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let chain_id = parse_chain_id(&chain)?;
    let rx = state.runner.streaming().subscribe(chain_id);
    Ok(Sse::new(BlockStream { rx }).keep_alive(KeepAlive::default()))
}
