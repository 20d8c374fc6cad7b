//! Deterministic multi-node simulation.
//!
//! All nodes run in one thread against a simulated clock. Messages travel
//! through an ordered event heap with fixed (optionally jittered) latency,
//! so a run is a pure function of its inputs and seed: the same scenario
//! always produces the same blocks and the same roots.

mod runner;

pub use runner::{SimConfig, SimulationRunner, SubscriberId};
