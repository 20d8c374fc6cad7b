//! RPC server lifecycle.

use super::handlers::RpcState;
use super::routes::create_router;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Error)]
pub enum RpcServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

#[derive(Clone, Debug)]
pub struct RpcServerConfig {
    pub listen_addr: SocketAddr,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 7770)),
        }
    }
}

pub struct RpcServer {
    config: RpcServerConfig,
    state: RpcState,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, state: RpcState) -> Self {
        Self { config, state }
    }

    /// Bind and serve in a background task.
    pub async fn spawn(self) -> Result<JoinHandle<()>, RpcServerError> {
        let addr = self.config.listen_addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| RpcServerError::Bind { addr, source })?;
        info!(%addr, "RPC server listening");
        let router = create_router(self.state);
        Ok(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(%e, "RPC server stopped");
            }
        }))
    }
}
