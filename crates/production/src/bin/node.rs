//! The ByzCoin node binary.
//!
//! Exit codes: 0 OK, 2 config error, 3 network error, 5 timeout,
//! 7 internal invariant violated.

use anyhow::Context;
use byzcoin_core::OutboundMessage;
use byzcoin_production::rpc::{RpcServer, RpcServerConfig, RpcState};
use byzcoin_production::{NodeRunner, RocksDbStore, RunnerConfig, StreamingMultiplexer, Transport};
use byzcoin_types::{BlsKeyPair, ChainId, NodeIndex};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

const EXIT_CONFIG: u8 = 2;
const EXIT_NETWORK: u8 = 3;
const EXIT_INTERNAL: u8 = 7;

#[derive(Parser, Debug)]
#[command(name = "byzcoin-node", about = "ByzCoin ledger node")]
struct Args {
    /// Data directory for the RocksDB store.
    #[arg(long, default_value = "./byzcoin-data")]
    db: PathBuf,

    /// Address for the HTTP RPC server.
    #[arg(long, default_value = "0.0.0.0:7770")]
    listen: SocketAddr,

    /// Hex-encoded 32-byte seed for this node's BLS key.
    #[arg(long)]
    seed: String,

    /// Default tracing filter; RUST_LOG overrides.
    #[arg(long, default_value = "info")]
    log: String,
}

/// Transport placeholder: the inter-node carrier is provided by the
/// deployment (the network layer is outside this crate's scope). Messages
/// to peers are dropped with a warning, which still leaves single-node
/// rosters fully functional.
struct UnconnectedTransport;

impl Transport for UnconnectedTransport {
    fn broadcast(&self, chain: ChainId, _from: NodeIndex, _message: OutboundMessage) {
        warn!(?chain, "no transport configured, dropping broadcast");
    }

    fn send(&self, chain: ChainId, _from: NodeIndex, to: NodeIndex, _message: OutboundMessage) {
        warn!(?chain, to, "no transport configured, dropping message");
    }
}

fn parse_seed(hex_seed: &str) -> anyhow::Result<[u8; 32]> {
    let raw = hex::decode(hex_seed).context("seed is not valid hex")?;
    raw.as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("seed must be exactly 32 bytes"))
}

async fn run(args: Args) -> Result<(), (u8, anyhow::Error)> {
    let seed = parse_seed(&args.seed).map_err(|e| (EXIT_CONFIG, e))?;
    let node_key = BlsKeyPair::from_seed(&seed);
    info!(public_key = ?node_key.public_key(), "node key loaded");

    let store = Arc::new(
        RocksDbStore::open(&args.db)
            .map_err(|e| (EXIT_CONFIG, anyhow::Error::new(e).context("opening database")))?,
    );
    let streaming = Arc::new(StreamingMultiplexer::new());
    let runner = Arc::new(NodeRunner::new(
        Arc::clone(&store),
        Arc::new(UnconnectedTransport),
        Arc::clone(&streaming),
        RunnerConfig::default(),
    ));

    // Resume every chain already on disk.
    let chains = store
        .chains()
        .map_err(|e| (EXIT_INTERNAL, anyhow::Error::new(e)))?;
    for chain_id in chains {
        // Our index may differ per chain; recover it from the roster.
        let (_, config) = store
            .boot_data(chain_id)
            .map_err(|e| (EXIT_INTERNAL, anyhow::Error::new(e)))?;
        let Some(our_index) = config.roster.index_of(&node_key.public_key()) else {
            warn!(?chain_id, "not a member of this chain's roster, skipping");
            continue;
        };
        runner
            .resume_chain(chain_id, our_index, node_key.clone())
            .map_err(|e| (EXIT_INTERNAL, anyhow::Error::new(e)))?;
    }

    let state = RpcState {
        runner,
        node_key,
        our_index: 0,
    };
    let server = RpcServer::new(
        RpcServerConfig {
            listen_addr: args.listen,
        },
        state,
    );
    let handle = server
        .spawn()
        .await
        .map_err(|e| (EXIT_NETWORK, anyhow::Error::new(e)))?;

    handle
        .await
        .map_err(|e| (EXIT_INTERNAL, anyhow::Error::new(e)))?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    byzcoin_production::telemetry::init(&args.log);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(%e, "failed to start runtime");
            return ExitCode::from(EXIT_INTERNAL);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err((code, e)) => {
            error!(error = %e, "node exited with failure");
            ExitCode::from(code)
        }
    }
}
