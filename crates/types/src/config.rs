//! Chain configuration, stored at the all-zero instance.

use crate::roster::Roster;
use parity_scale_codec::{Decode, Encode};
use std::time::Duration;

/// Configuration governing one chain. Lives in the trie under
/// `InstanceId::ZERO`; a config-update transaction replaces it and takes
/// effect at the end of the block that contains it.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ChainConfig {
    /// Target milliseconds between blocks.
    pub block_interval_ms: u64,
    /// Maximum encoded size of a block body in bytes.
    pub max_block_size: u32,
    pub roster: Roster,
}

impl ChainConfig {
    pub const DEFAULT_MAX_BLOCK_SIZE: u32 = 4_000_000;

    pub fn new(roster: Roster, block_interval: Duration) -> Self {
        Self {
            block_interval_ms: block_interval.as_millis() as u64,
            max_block_size: Self::DEFAULT_MAX_BLOCK_SIZE,
            roster,
        }
    }

    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.block_interval_ms)
    }

    /// Heartbeat timeout: twice the block interval, at least two seconds.
    pub fn heartbeat_timeout(&self) -> Duration {
        (2 * self.block_interval()).max(Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_roster;

    #[test]
    fn heartbeat_timeout_floor() {
        let (roster, _) = test_roster(3);
        let fast = ChainConfig::new(roster.clone(), Duration::from_millis(100));
        assert_eq!(fast.heartbeat_timeout(), Duration::from_secs(2));
        let slow = ChainConfig::new(roster, Duration::from_secs(5));
        assert_eq!(slow.heartbeat_timeout(), Duration::from_secs(10));
    }
}
