//! The streaming multiplexer.
//!
//! Clients subscribe to a chain and receive every committed block in
//! order. Each subscriber owns a bounded queue; a subscriber that cannot
//! keep up is disconnected rather than allowed to stall the publisher.

use byzcoin_types::{BlockHeader, ChainId, DataBody};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Blocks a slow subscriber may lag before being dropped.
const SUBSCRIBER_QUEUE: usize = 16;

type BlockItem = (BlockHeader, DataBody);

/// Fan-out of committed blocks to streaming subscribers.
#[derive(Default)]
pub struct StreamingMultiplexer {
    subscribers: Mutex<HashMap<ChainId, Vec<mpsc::Sender<BlockItem>>>>,
}

impl StreamingMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a subscription. The stream ends cleanly when the receiver is
    /// dropped, or when the node stops serving the chain and drops the
    /// sender side.
    pub fn subscribe(&self, chain: ChainId) -> mpsc::Receiver<BlockItem> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        self.subscribers
            .lock()
            .expect("streaming lock poisoned")
            .entry(chain)
            .or_default()
            .push(tx);
        info!(?chain, "streaming subscription opened");
        rx
    }

    /// Deliver a committed block to every subscriber of its chain.
    /// Subscribers with a full queue or a dropped receiver are removed.
    pub fn publish(&self, chain: ChainId, header: &BlockHeader, body: &DataBody) {
        let mut subscribers = self.subscribers.lock().expect("streaming lock poisoned");
        let Some(list) = subscribers.get_mut(&chain) else {
            return;
        };
        list.retain(|tx| match tx.try_send((header.clone(), body.clone())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(?chain, "dropping subscriber that fell behind");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if list.is_empty() {
            subscribers.remove(&chain);
        }
    }

    /// Tear down every subscription of a chain, e.g. when the node steps
    /// down and can no longer serve it authoritatively.
    pub fn close_chain(&self, chain: ChainId) {
        self.subscribers
            .lock()
            .expect("streaming lock poisoned")
            .remove(&chain);
    }

    pub fn subscriber_count(&self, chain: ChainId) -> usize {
        self.subscribers
            .lock()
            .expect("streaming lock poisoned")
            .get(&chain)
            .map_or(0, Vec::len)
    }
}
