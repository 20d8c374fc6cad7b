//! Built-in contracts.
//!
//! The minimum set needed to bootstrap a chain: the chain config, the darc
//! contract governing access control, a simple value contract, and the
//! deferred contract for multi-signer workflows.

pub mod config;
pub mod darc;
pub mod deferred;
pub mod value;
