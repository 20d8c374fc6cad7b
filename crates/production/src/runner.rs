//! The per-chain event loops.
//!
//! One tokio task per chain drives its deterministic state machine: events
//! in, actions out. Everything blocking or shared (storage, transport,
//! streaming, timers) lives here, so chains run in parallel while each
//! chain's own work stays strictly serialized.

use crate::metrics::metrics;
use crate::storage::RocksDbStore;
use crate::streaming::StreamingMultiplexer;
use crate::timers::TimerManager;
use byzcoin_core::{Action, Event, OutboundMessage, SkipchainStore, StateMachine, TxStatus};
use byzcoin_darc::Darc;
use byzcoin_engine::ContractRegistry;
use byzcoin_node::{ChainStateMachine, Proof};
use byzcoin_types::{
    BlsKeyPair, Block, ChainConfig, ChainId, ClientTransaction, Hash, InstanceId, NodeIndex,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// Delivers outbound messages to other roster members. The concrete
/// carrier (TCP, in-process queues) is outside the core's scope.
pub trait Transport: Send + Sync {
    fn broadcast(&self, chain: ChainId, from: NodeIndex, message: OutboundMessage);
    fn send(&self, chain: ChainId, from: NodeIndex, to: NodeIndex, message: OutboundMessage);
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("unknown chain {0:?}")]
    UnknownChain(ChainId),
    #[error("chain coordinator stopped")]
    ChainStopped,
    #[error("ERR_TIMEOUT: no inclusion within the requested window")]
    Timeout,
    #[error("{0}")]
    Chain(String),
}

/// Runner-level configuration.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub rotation_window: u32,
    /// Mailbox depth per chain.
    pub mailbox_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            rotation_window: byzcoin_bft::DEFAULT_ROTATION_WINDOW,
            mailbox_capacity: 1024,
        }
    }
}

/// Read-only queries answered on the coordinator thread, so they see a
/// consistent snapshot without locking the state machine.
enum Query {
    Proof {
        key: InstanceId,
        reply: oneshot::Sender<Result<Proof, String>>,
    },
    Status {
        reply: oneshot::Sender<ChainStatus>,
    },
}

/// Snapshot of one chain's public state for the RPC surface.
#[derive(Clone, Debug)]
pub struct ChainStatus {
    pub chain_id: ChainId,
    pub head_index: u64,
    pub head_hash: Hash,
    pub leader_index: NodeIndex,
    pub pending_transactions: usize,
}

struct ChainHandle {
    event_tx: mpsc::Sender<Event>,
    query_tx: mpsc::Sender<Query>,
}

/// Latest reported status per transaction, for `AddTransaction(wait)`.
#[derive(Default)]
pub struct StatusBoard {
    statuses: Mutex<HashMap<Hash, TxStatus>>,
}

impl StatusBoard {
    fn update(&self, tx_hash: Hash, status: TxStatus) {
        self.statuses
            .lock()
            .expect("status lock poisoned")
            .insert(tx_hash, status);
    }

    pub fn get(&self, tx_hash: &Hash) -> Option<TxStatus> {
        self.statuses
            .lock()
            .expect("status lock poisoned")
            .get(tx_hash)
            .cloned()
    }
}

/// All chains hosted by this node.
pub struct NodeRunner {
    store: Arc<RocksDbStore>,
    transport: Arc<dyn Transport>,
    streaming: Arc<StreamingMultiplexer>,
    statuses: Arc<StatusBoard>,
    config: RunnerConfig,
    chains: Mutex<HashMap<ChainId, ChainHandle>>,
}

impl NodeRunner {
    pub fn new(
        store: Arc<RocksDbStore>,
        transport: Arc<dyn Transport>,
        streaming: Arc<StreamingMultiplexer>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            transport,
            streaming,
            statuses: Arc::new(StatusBoard::default()),
            config,
            chains: Mutex::new(HashMap::new()),
        }
    }

    pub fn streaming(&self) -> Arc<StreamingMultiplexer> {
        Arc::clone(&self.streaming)
    }

    pub fn statuses(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.statuses)
    }

    /// Create a brand-new chain from its genesis material and start its
    /// coordinator.
    pub fn create_chain(
        &self,
        genesis: &Block,
        darc: &Darc,
        chain_config: ChainConfig,
        our_index: NodeIndex,
        signing_key: BlsKeyPair,
    ) -> Result<ChainId, RunnerError> {
        let chain_id = self
            .store
            .create_chain(genesis, darc, &chain_config)
            .map_err(|e| RunnerError::Chain(e.to_string()))?;
        self.start_chain(chain_id, genesis, darc, chain_config, our_index, signing_key, 0)?;
        Ok(chain_id)
    }

    /// Restart a chain from storage: bootstrap at genesis, then replay the
    /// persisted blocks through the normal commit path.
    pub fn resume_chain(
        &self,
        chain_id: ChainId,
        our_index: NodeIndex,
        signing_key: BlsKeyPair,
    ) -> Result<(), RunnerError> {
        let (darc, chain_config) = self
            .store
            .boot_data(chain_id)
            .map_err(|e| RunnerError::Chain(e.to_string()))?;
        let genesis = self
            .store
            .get_by_index(chain_id, 0)
            .map_err(|e| RunnerError::Chain(e.to_string()))?;
        let head_block = self
            .store
            .get_latest(chain_id)
            .map_err(|e| RunnerError::Chain(e.to_string()))?;
        let head = head_block.header.index;

        // The persisted leaves must reproduce the head's signed root; the
        // trie structure is history-independent, so any divergence means
        // the store is damaged.
        let rebuilt = self
            .store
            .load_trie(chain_id)
            .map_err(|e| RunnerError::Chain(e.to_string()))?;
        if rebuilt.root() != head_block.header.trie_root {
            return Err(RunnerError::Chain(format!(
                "ERR_STATE_CORRUPTED: persisted trie root {} does not match head {}",
                rebuilt.root(),
                head_block.header.trie_root
            )));
        }

        self.start_chain(
            chain_id,
            &genesis,
            &darc,
            chain_config,
            our_index,
            signing_key,
            head,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn start_chain(
        &self,
        chain_id: ChainId,
        genesis: &Block,
        darc: &Darc,
        chain_config: ChainConfig,
        our_index: NodeIndex,
        signing_key: BlsKeyPair,
        replay_to: u64,
    ) -> Result<(), RunnerError> {
        let mut sm = ChainStateMachine::new(
            our_index,
            signing_key,
            genesis,
            darc,
            chain_config,
            ContractRegistry::with_builtins(),
            self.config.rotation_window,
        )
        .map_err(|e| RunnerError::Chain(e.to_string()))?;

        // Catch up from local storage before going live. Replay runs the
        // ordinary commit path, so determinism is the same as live commits.
        for index in 1..=replay_to {
            let block = self
                .store
                .get_by_index(chain_id, index)
                .map_err(|e| RunnerError::Chain(e.to_string()))?;
            let state_changes = self
                .store
                .state_changes_at(chain_id, index)
                .map_err(|e| RunnerError::Chain(e.to_string()))?;
            sm.handle(Event::CommitReceived {
                commit: byzcoin_types::CommitMessage {
                    chain_id,
                    block,
                    state_changes,
                },
            });
        }
        if replay_to > 0 {
            info!(?chain_id, head = replay_to, "chain resumed from storage");
        }

        let (event_tx, event_rx) = mpsc::channel(self.config.mailbox_capacity);
        let (query_tx, query_rx) = mpsc::channel(64);
        let handle = ChainHandle {
            event_tx: event_tx.clone(),
            query_tx,
        };
        self.chains
            .lock()
            .expect("chains lock poisoned")
            .insert(chain_id, handle);

        let ctx = ChainLoopCtx {
            chain_id,
            our_index,
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            streaming: Arc::clone(&self.streaming),
            statuses: Arc::clone(&self.statuses),
            already_persisted: replay_to,
        };
        tokio::spawn(chain_loop(sm, event_rx, event_tx, query_rx, ctx));
        Ok(())
    }

    fn handle_for(&self, chain_id: ChainId) -> Result<(mpsc::Sender<Event>, mpsc::Sender<Query>), RunnerError> {
        let chains = self.chains.lock().expect("chains lock poisoned");
        let handle = chains
            .get(&chain_id)
            .ok_or(RunnerError::UnknownChain(chain_id))?;
        Ok((handle.event_tx.clone(), handle.query_tx.clone()))
    }

    /// Submit a transaction; optionally wait until it lands in a block or
    /// `wait_blocks` block intervals elapse.
    pub async fn add_transaction(
        &self,
        chain_id: ChainId,
        tx: ClientTransaction,
        wait_blocks: u32,
    ) -> Result<TxStatus, RunnerError> {
        let (event_tx, _query_tx) = self.handle_for(chain_id)?;
        let tx_hash = tx.hash();
        event_tx
            .send(Event::SubmitTransaction { tx })
            .await
            .map_err(|_| RunnerError::ChainStopped)?;

        if wait_blocks == 0 {
            return Ok(TxStatus::Queued);
        }

        let interval = self.block_interval_of(chain_id)?;
        let deadline = tokio::time::Instant::now() + interval * wait_blocks;
        loop {
            if let Some(status) = self.statuses.get(&tx_hash) {
                match status {
                    TxStatus::Included { .. } | TxStatus::Rejected { .. } => return Ok(status),
                    TxStatus::Queued => {}
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RunnerError::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn block_interval_of(&self, chain_id: ChainId) -> Result<Duration, RunnerError> {
        let (_, config) = self
            .store
            .boot_data(chain_id)
            .map_err(|e| RunnerError::Chain(e.to_string()))?;
        Ok(config.block_interval())
    }

    async fn status(
        &self,
        _chain_id: ChainId,
        query_tx: &mpsc::Sender<Query>,
    ) -> Result<ChainStatus, RunnerError> {
        let (reply, rx) = oneshot::channel();
        query_tx
            .send(Query::Status { reply })
            .await
            .map_err(|_| RunnerError::ChainStopped)?;
        rx.await.map_err(|_| RunnerError::ChainStopped)
    }

    /// Public status query.
    pub async fn chain_status(&self, chain_id: ChainId) -> Result<ChainStatus, RunnerError> {
        let (_, query_tx) = self.handle_for(chain_id)?;
        self.status(chain_id, &query_tx).await
    }

    /// Build a proof for `key` against the chain's current head.
    pub async fn get_proof(
        &self,
        chain_id: ChainId,
        key: InstanceId,
    ) -> Result<Proof, RunnerError> {
        let (_, query_tx) = self.handle_for(chain_id)?;
        let (reply, rx) = oneshot::channel();
        query_tx
            .send(Query::Proof { key, reply })
            .await
            .map_err(|_| RunnerError::ChainStopped)?;
        rx.await
            .map_err(|_| RunnerError::ChainStopped)?
            .map_err(RunnerError::Chain)
    }

    /// A view-change request arriving over RPC (`SendViewChange`).
    pub async fn send_view_change(
        &self,
        chain_id: ChainId,
        request: byzcoin_types::ViewChangeRequest,
    ) -> Result<(), RunnerError> {
        let (event_tx, _) = self.handle_for(chain_id)?;
        event_tx
            .send(Event::ViewChangeRequestReceived { request })
            .await
            .map_err(|_| RunnerError::ChainStopped)
    }

    /// Deliver a message from the transport into the chain's mailbox.
    pub async fn deliver(
        &self,
        chain_id: ChainId,
        from: NodeIndex,
        message: OutboundMessage,
    ) -> Result<(), RunnerError> {
        // Catch-up requests are answered from storage without touching the
        // state machine.
        if let OutboundMessage::CatchUpRequest(request) = &message {
            let head = self
                .store
                .get_latest(chain_id)
                .map(|b| b.header.index)
                .unwrap_or(0);
            for index in request.from_index..=head {
                if let (Ok(block), Ok(state_changes)) = (
                    self.store.get_by_index(chain_id, index),
                    self.store.state_changes_at(chain_id, index),
                ) {
                    self.transport.send(
                        chain_id,
                        u32::MAX,
                        from,
                        OutboundMessage::Commit(Box::new(byzcoin_types::CommitMessage {
                            chain_id,
                            block,
                            state_changes,
                        })),
                    );
                }
            }
            return Ok(());
        }

        let event = match message {
            OutboundMessage::Proposal(p) => Event::ProposalReceived { proposal: *p },
            OutboundMessage::Share(s) => Event::ShareReceived { share: s },
            OutboundMessage::Refusal(r) => Event::RefusalReceived { refusal: r },
            OutboundMessage::Commit(c) => Event::CommitReceived { commit: *c },
            OutboundMessage::ViewChangeRequest(r) => {
                Event::ViewChangeRequestReceived { request: r }
            }
            OutboundMessage::ViewChangeCertificate(c) => {
                Event::ViewChangeCertificateReceived { certificate: c }
            }
            OutboundMessage::SubmitForward(tx) => Event::SubmitTransaction { tx },
            OutboundMessage::CatchUpRequest(_) => unreachable!("handled above"),
        };
        let (event_tx, _) = self.handle_for(chain_id)?;
        event_tx
            .send(event)
            .await
            .map_err(|_| RunnerError::ChainStopped)
    }
}

struct ChainLoopCtx {
    chain_id: ChainId,
    our_index: NodeIndex,
    store: Arc<RocksDbStore>,
    transport: Arc<dyn Transport>,
    streaming: Arc<StreamingMultiplexer>,
    statuses: Arc<StatusBoard>,
    /// Blocks already in storage from replay; skip re-persisting them.
    already_persisted: u64,
}

fn wall_clock() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

async fn chain_loop(
    mut sm: ChainStateMachine,
    mut event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    mut query_rx: mpsc::Receiver<Query>,
    ctx: ChainLoopCtx,
) {
    let mut timers = TimerManager::new(event_tx);

    sm.set_time(wall_clock());
    let mut pending: VecDeque<Event> = VecDeque::new();
    for action in sm.start() {
        if execute_action(&mut sm, action, &mut timers, &ctx, &mut pending).is_break() {
            return;
        }
    }

    loop {
        if pending.is_empty() {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => pending.push_back(event),
                    None => break,
                },
                query = query_rx.recv() => match query {
                    Some(query) => answer_query(&sm, query, &ctx),
                    None => break,
                },
            }
            continue;
        }

        let event = pending.pop_front().expect("pending checked");
        sm.set_time(wall_clock());
        for action in sm.handle(event) {
            if execute_action(&mut sm, action, &mut timers, &ctx, &mut pending).is_break() {
                error!(chain = ?ctx.chain_id, "chain coordinator aborted");
                return;
            }
        }
    }
    info!(chain = ?ctx.chain_id, "chain coordinator stopped");
}

fn answer_query(sm: &ChainStateMachine, query: Query, ctx: &ChainLoopCtx) {
    match query {
        Query::Proof { key, reply } => {
            let links = ctx
                .store
                .follow_links(ctx.chain_id, 0, sm.last_header().index)
                .map_err(|e| e.to_string());
            let result = links.and_then(|links| {
                sm.build_proof(&key, links).map_err(|e| e.to_string())
            });
            let _ = reply.send(result);
        }
        Query::Status { reply } => {
            let _ = reply.send(ChainStatus {
                chain_id: sm.chain_id(),
                head_index: sm.last_header().index,
                head_hash: sm.last_header().hash(),
                leader_index: sm.current_leader(),
                pending_transactions: sm.pending_transactions(),
            });
        }
    }
}

fn execute_action(
    sm: &mut ChainStateMachine,
    action: Action,
    timers: &mut TimerManager,
    ctx: &ChainLoopCtx,
    pending: &mut VecDeque<Event>,
) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;

    match action {
        Action::Broadcast { message } => {
            ctx.transport.broadcast(ctx.chain_id, ctx.our_index, message);
        }
        Action::SendTo { index, message } => {
            ctx.transport.send(ctx.chain_id, ctx.our_index, index, message);
        }
        Action::SetTimer { id, duration } => timers.set_timer(id, duration),
        Action::CancelTimer { id } => timers.cancel_timer(id),
        Action::EnqueueInternal { event } => pending.push_front(event),
        Action::CommitBlock {
            block,
            state_changes,
        } => {
            let index = block.header.index;
            if index > ctx.already_persisted {
                let timer = metrics().block_persist_seconds.start_timer();
                let persisted = ctx.store.append_block(
                    ctx.chain_id,
                    &block,
                    &state_changes,
                    &sm.config().roster,
                );
                timer.observe_duration();
                if let Err(e) = persisted {
                    error!(%e, "ERR_STATE_CORRUPTED: persisting block failed");
                    return ControlFlow::Break(());
                }
            }
            ctx.streaming.publish(ctx.chain_id, &block.header, &block.body);

            let m = metrics();
            m.blocks_committed.inc();
            m.chain_height.set(index as i64);
            m.buffer_size.set(sm.pending_transactions() as i64);
            if block.body.view_change.is_some() {
                m.view_changes.inc();
            }
            for result in &block.body.tx_results {
                if result.accepted {
                    m.transactions_accepted.inc();
                } else {
                    m.transactions_rejected.inc();
                }
            }
        }
        Action::TransactionStatus { tx_hash, status } => {
            ctx.statuses.update(tx_hash, status);
        }
        Action::FetchMissing { from_index } => {
            warn!(from_index, "requesting catch-up from peers");
            ctx.transport.broadcast(
                ctx.chain_id,
                ctx.our_index,
                OutboundMessage::CatchUpRequest(byzcoin_types::CatchUpRequest {
                    chain_id: ctx.chain_id,
                    from_index,
                }),
            );
        }
        Action::AbortChain { reason } => {
            error!(%reason, "ERR_INVARIANT_VIOLATED: chain aborted");
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}
