//! HTTP RPC surface.
//!
//! - `POST /api/v1/genesis`: create a chain (`CreateGenesis`)
//! - `POST /api/v1/transactions`: submit, optionally wait (`AddTransaction`)
//! - `GET  /api/v1/proof/{chain}/{key}`: inclusion proof (`GetProof`)
//! - `GET  /api/v1/blocks/{chain}`: SSE stream of blocks (`StreamBlocks`)
//! - `POST /api/v1/viewchange`: relay a view-change request (`SendViewChange`)
//! - `GET  /api/v1/status/{chain}`: chain status
//! - `GET  /health`, `GET /metrics`: probes and Prometheus text

mod handlers;
mod routes;
mod server;
mod types;

pub use handlers::RpcState;
pub use routes::create_router;
pub use server::{RpcServer, RpcServerConfig, RpcServerError};
pub use types::*;
