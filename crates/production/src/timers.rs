//! Timer management for the production runner.
//!
//! Each armed timer is a tokio task that sleeps and then sends the
//! corresponding event into the chain's mailbox. Arming a timer with an id
//! that is already pending replaces it.

use byzcoin_core::{Event, TimerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

fn timer_event(id: TimerId) -> Event {
    match id {
        TimerId::BlockInterval => Event::BlockIntervalTimer,
        TimerId::Heartbeat => Event::HeartbeatTimer,
        TimerId::ViewChange => Event::ViewChangeTimer,
    }
}

/// Timers of one chain's event loop.
pub struct TimerManager {
    timers: HashMap<TimerId, JoinHandle<()>>,
    event_tx: mpsc::Sender<Event>,
}

impl TimerManager {
    pub fn new(event_tx: mpsc::Sender<Event>) -> Self {
        Self {
            timers: HashMap::new(),
            event_tx,
        }
    }

    /// Arm `id` to fire after `duration`, replacing any pending instance.
    pub fn set_timer(&mut self, id: TimerId, duration: Duration) {
        self.cancel_timer(id);
        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(?id, "timer fired");
            let _ = event_tx.send(timer_event(id)).await;
        });
        self.timers.insert(id, handle);
        debug!(?id, ?duration, "timer set");
    }

    /// Disarm `id`; a timer that already fired is a no-op.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
            debug!(?id, "timer cancelled");
        }
    }

    /// Disarm everything. Called on shutdown.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
