//! Per-chain transaction buffer.
//!
//! A bounded, deduplicated FIFO of pending client transactions. The leader
//! drains it at block time; transactions the executor rejects are not
//! re-queued. Access is serialized by the per-chain state machine, so plain
//! collections suffice.

use byzcoin_types::{ClientTransaction, Hash};
use std::collections::{HashSet, VecDeque};
use thiserror::Error;
use tracing::debug;

/// Default capacity, in transactions.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("ERR_OVERLOADED: transaction buffer full")]
    Overloaded,
    #[error("transaction already queued")]
    Duplicate,
}

/// The pending-transaction queue of one chain.
#[derive(Debug)]
pub struct TxBuffer {
    queue: VecDeque<ClientTransaction>,
    /// Hashes of queued transactions, for O(1) dedup.
    queued: HashSet<Hash>,
    capacity: usize,
}

impl Default for TxBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl TxBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Admit a transaction. Fails with back-pressure when full; duplicates
    /// by hash are rejected.
    pub fn submit(&mut self, tx: ClientTransaction) -> Result<Hash, BufferError> {
        let hash = tx.hash();
        if self.queued.contains(&hash) {
            return Err(BufferError::Duplicate);
        }
        if self.queue.len() >= self.capacity {
            debug!(capacity = self.capacity, "buffer full, applying back-pressure");
            return Err(BufferError::Overloaded);
        }
        self.queued.insert(hash);
        self.queue.push_back(tx);
        Ok(hash)
    }

    /// Drain transactions in admission order until `max_bytes` of encoded
    /// payload is reached. Drained transactions leave the buffer for good.
    pub fn drain(&mut self, max_bytes: usize) -> Vec<ClientTransaction> {
        let mut batch = Vec::new();
        let mut total = 0usize;
        while let Some(tx) = self.queue.front() {
            let size = tx.size();
            if !batch.is_empty() && total + size > max_bytes {
                break;
            }
            total += size;
            let tx = self.queue.pop_front().expect("front checked");
            self.queued.remove(&tx.hash());
            batch.push(tx);
            if total >= max_bytes {
                break;
            }
        }
        batch
    }

    /// Drop a transaction that arrived in someone else's block.
    pub fn remove(&mut self, hash: &Hash) {
        if self.queued.remove(hash) {
            self.queue.retain(|tx| tx.hash() != *hash);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byzcoin_types::test_utils::test_signer;
    use byzcoin_types::{Argument, Instruction, InstanceId};

    fn tx(seed: u8) -> ClientTransaction {
        let mut instruction = Instruction::spawn(
            InstanceId([seed; 32]),
            "value",
            vec![Argument::new("value", vec![seed])],
        );
        instruction.sign_with(&[(&test_signer(seed), 1)]);
        ClientTransaction::new(vec![instruction])
    }

    #[test]
    fn fifo_order_preserved() {
        let mut buffer = TxBuffer::default();
        let txs: Vec<_> = (1..=3u8).map(tx).collect();
        for t in &txs {
            buffer.submit(t.clone()).unwrap();
        }
        let drained = buffer.drain(usize::MAX);
        assert_eq!(drained, txs);
        assert!(buffer.is_empty());
    }

    #[test]
    fn duplicates_rejected() {
        let mut buffer = TxBuffer::default();
        let t = tx(1);
        buffer.submit(t.clone()).unwrap();
        assert_eq!(buffer.submit(t), Err(BufferError::Duplicate));
    }

    #[test]
    fn overload_applies_back_pressure() {
        let mut buffer = TxBuffer::with_capacity(2);
        buffer.submit(tx(1)).unwrap();
        buffer.submit(tx(2)).unwrap();
        let err = buffer.submit(tx(3)).unwrap_err();
        assert_eq!(err, BufferError::Overloaded);
        assert!(err.to_string().starts_with("ERR_OVERLOADED"));
    }

    #[test]
    fn drain_respects_size_limit() {
        let mut buffer = TxBuffer::default();
        for i in 1..=5u8 {
            buffer.submit(tx(i)).unwrap();
        }
        let one_tx_bytes = tx(1).size();
        let drained = buffer.drain(one_tx_bytes);
        assert_eq!(drained.len(), 1);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn drain_always_takes_at_least_one() {
        let mut buffer = TxBuffer::default();
        buffer.submit(tx(1)).unwrap();
        assert_eq!(buffer.drain(1).len(), 1);
    }

    #[test]
    fn resubmit_after_drain_allowed() {
        let mut buffer = TxBuffer::default();
        let t = tx(1);
        buffer.submit(t.clone()).unwrap();
        buffer.drain(usize::MAX);
        assert!(buffer.submit(t).is_ok());
    }
}
