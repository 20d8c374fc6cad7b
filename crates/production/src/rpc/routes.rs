//! Route configuration.

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};

/// The full router.
pub fn create_router(state: RpcState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
}

fn api_v1_routes() -> Router<RpcState> {
    Router::new()
        .route("/genesis", post(create_genesis_handler))
        .route("/transactions", post(submit_transaction_handler))
        .route("/proof/{chain}/{key}", get(get_proof_handler))
        .route("/blocks/{chain}", get(stream_blocks_handler))
        .route("/viewchange", post(send_view_change_handler))
        .route("/status/{chain}", get(status_handler))
}
