//! Prometheus metrics.

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Encoder, Histogram, IntCounter,
    IntGauge, TextEncoder,
};
use std::sync::OnceLock;

pub struct Metrics {
    pub blocks_committed: IntCounter,
    pub transactions_accepted: IntCounter,
    pub transactions_rejected: IntCounter,
    pub view_changes: IntCounter,
    pub chain_height: IntGauge,
    pub buffer_size: IntGauge,
    pub block_persist_seconds: Histogram,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// The process-wide metrics handle; registered on first use.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| Metrics {
        blocks_committed: register_int_counter!(
            "byzcoin_blocks_committed_total",
            "Blocks committed by this node"
        )
        .expect("metric registration"),
        transactions_accepted: register_int_counter!(
            "byzcoin_transactions_accepted_total",
            "Transactions included with accepted=true"
        )
        .expect("metric registration"),
        transactions_rejected: register_int_counter!(
            "byzcoin_transactions_rejected_total",
            "Transactions included with accepted=false"
        )
        .expect("metric registration"),
        view_changes: register_int_counter!(
            "byzcoin_view_changes_total",
            "View-change blocks committed"
        )
        .expect("metric registration"),
        chain_height: register_int_gauge!(
            "byzcoin_chain_height",
            "Index of the latest committed block"
        )
        .expect("metric registration"),
        buffer_size: register_int_gauge!(
            "byzcoin_buffer_size",
            "Pending transactions in the buffer"
        )
        .expect("metric registration"),
        block_persist_seconds: register_histogram!(
            "byzcoin_block_persist_seconds",
            "Wall time spent persisting one committed block"
        )
        .expect("metric registration"),
    })
}

/// Render the registry in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder
        .encode(&prometheus::gather(), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
