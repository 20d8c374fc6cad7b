//! Cache of batch executions.
//!
//! A follower validating a proposal executes the same batch against the
//! same prior root as the leader did. Keyed by `(prev_root, body_hash)`,
//! this cache lets the commit path reuse the validation result instead of
//! executing a third time. Strictly per-chain: each chain's state machine
//! owns its own instance.

use crate::executor::BatchOutput;
use byzcoin_types::Hash;
use std::collections::HashMap;
use std::collections::VecDeque;

const DEFAULT_CAPACITY: usize = 16;

/// Bounded LRU of recent batch executions.
#[derive(Debug)]
pub struct ExecutionCache {
    entries: HashMap<(Hash, Hash), BatchOutput>,
    order: VecDeque<(Hash, Hash)>,
    capacity: usize,
}

impl Default for ExecutionCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ExecutionCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, prev_root: &Hash, body_hash: &Hash) -> Option<&BatchOutput> {
        self.entries.get(&(*prev_root, *body_hash))
    }

    pub fn insert(&mut self, prev_root: Hash, body_hash: Hash, output: BatchOutput) {
        let key = (prev_root, body_hash);
        if self.entries.insert(key, output).is_none() {
            self.order.push_back(key);
            while self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.entries.remove(&evicted);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(root_seed: u8) -> BatchOutput {
        BatchOutput {
            tx_results: Vec::new(),
            state_changes: Vec::new(),
            root: Hash::of(&[root_seed]),
        }
    }

    #[test]
    fn hit_and_miss() {
        let mut cache = ExecutionCache::default();
        let prev = Hash::of(b"prev");
        let body = Hash::of(b"body");
        assert!(cache.get(&prev, &body).is_none());
        cache.insert(prev, body, output(1));
        assert_eq!(cache.get(&prev, &body).unwrap().root, Hash::of(&[1]));
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut cache = ExecutionCache::with_capacity(2);
        for i in 0..3u8 {
            cache.insert(Hash::of(&[i]), Hash::of(&[i]), output(i));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&Hash::of(&[0]), &Hash::of(&[0])).is_none());
        assert!(cache.get(&Hash::of(&[2]), &Hash::of(&[2])).is_some());
    }
}
