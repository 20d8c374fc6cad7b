//! Production runner for ByzCoin nodes.
//!
//! Owns everything the deterministic state machines must not: RocksDB
//! persistence, tokio timers, the streaming multiplexer, the HTTP RPC
//! surface, and the per-chain event loops that bridge between them.

pub mod metrics;
pub mod rpc;
pub mod runner;
pub mod storage;
pub mod streaming;
pub mod telemetry;
pub mod timers;

pub use runner::{NodeRunner, RunnerConfig, Transport};
pub use storage::{RocksDbStore, StorageError};
pub use streaming::StreamingMultiplexer;
