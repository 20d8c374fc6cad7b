//! The simulation runner.

use byzcoin_core::{Action, Event, OutboundMessage, StateMachine, TimerId, TxStatus};
use byzcoin_darc::Darc;
use byzcoin_engine::ContractRegistry;
use byzcoin_node::{build_genesis, ChainStateMachine, Proof};
use byzcoin_types::test_utils::test_roster;
use byzcoin_types::{
    Block, BlockHeader, BlsKeyPair, ChainConfig, ChainId, ClientTransaction, CommitMessage,
    DataBody, ForwardLink, Hash, InstanceId, NodeIndex, Signer, StateChange,
};
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

/// Simulation parameters.
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub nodes: usize,
    pub block_interval: Duration,
    pub latency: Duration,
    /// Fraction of `latency` added as seeded jitter; 0 disables it.
    pub jitter_fraction: f64,
    pub seed: u64,
    /// Extra darc rules granted to the test signer.
    pub rules: Vec<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nodes: 4,
            block_interval: Duration::from_millis(500),
            latency: Duration::from_millis(10),
            jitter_fraction: 0.0,
            seed: 42,
            rules: vec![
                "spawn:value".into(),
                "invoke:value.update".into(),
                "delete:value".into(),
                "spawn:deferred".into(),
                "invoke:deferred.add_proof".into(),
                "invoke:deferred.exec_proposed_tx".into(),
                "invoke:config.update_config".into(),
            ],
        }
    }
}

const ROTATION_WINDOW: u32 = 3;

/// Heap entry: delivery time, then insertion order for determinism.
struct Scheduled {
    at: Duration,
    seq: u64,
    node: NodeIndex,
    timer: Option<(TimerId, u64)>,
    event: Option<Event>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.at, self.seq) == (other.at, other.seq)
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

struct SimNode {
    sm: ChainStateMachine,
    up: bool,
    /// Current generation per timer id; stale firings are skipped.
    timer_generations: HashMap<TimerId, u64>,
    /// Local block store: `(block, state changes)`, genesis at index 0.
    blocks: Vec<(Block, Vec<StateChange>)>,
}

/// Handle to one streaming subscription.
pub type SubscriberId = usize;

struct Subscriber {
    node: NodeIndex,
    open: bool,
    received: Vec<(BlockHeader, DataBody)>,
}

/// A whole roster of simulated nodes plus the network between them.
pub struct SimulationRunner {
    config: SimConfig,
    nodes: Vec<SimNode>,
    genesis: Block,
    darc: Darc,
    chain_config: ChainConfig,
    chain_id: ChainId,
    signer: Signer,
    server_keys: Vec<BlsKeyPair>,

    clock: Duration,
    seq: u64,
    heap: BinaryHeap<Reverse<Scheduled>>,
    rng: ChaCha8Rng,

    statuses: HashMap<Hash, TxStatus>,
    subscribers: Vec<Subscriber>,
}

impl SimulationRunner {
    pub fn new(config: SimConfig) -> Self {
        let (roster, server_keys) = test_roster(config.nodes);
        let signer = byzcoin_types::test_utils::test_signer(99);
        let rules: Vec<&str> = config.rules.iter().map(String::as_str).collect();
        let (genesis, darc, chain_config) = build_genesis(
            roster,
            config.block_interval,
            &signer.identity(),
            &rules,
        )
        .expect("genesis construction");
        let chain_id = ChainId(genesis.hash());

        let nodes: Vec<SimNode> = server_keys
            .iter()
            .enumerate()
            .map(|(i, key)| SimNode {
                sm: ChainStateMachine::new(
                    i as NodeIndex,
                    key.clone(),
                    &genesis,
                    &darc,
                    chain_config.clone(),
                    ContractRegistry::with_builtins(),
                    ROTATION_WINDOW,
                )
                .expect("node bootstrap"),
                up: true,
                timer_generations: HashMap::new(),
                blocks: vec![(genesis.clone(), Vec::new())],
            })
            .collect();

        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut runner = Self {
            config,
            nodes,
            genesis,
            darc,
            chain_config,
            chain_id,
            signer,
            server_keys,
            clock: Duration::ZERO,
            seq: 0,
            heap: BinaryHeap::new(),
            rng,
            statuses: HashMap::new(),
            subscribers: Vec::new(),
        };

        for i in 0..runner.nodes.len() {
            let actions = runner.nodes[i].sm.start();
            runner.process_actions(i as NodeIndex, actions);
        }
        runner
    }

    // ─── Test-facing accessors ──────────────────────────────────────────

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    pub fn darc(&self) -> &Darc {
        &self.darc
    }

    pub fn config(&self) -> &ChainConfig {
        &self.chain_config
    }

    /// The test client's signer (owner of the genesis darc).
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    pub fn server_keys(&self) -> &[BlsKeyPair] {
        &self.server_keys
    }

    pub fn now(&self) -> Duration {
        self.clock
    }

    pub fn head_index(&self, node: NodeIndex) -> u64 {
        self.nodes[node as usize].sm.last_header().index
    }

    pub fn head_root(&self, node: NodeIndex) -> Hash {
        self.nodes[node as usize].sm.last_header().trie_root
    }

    pub fn leader_of(&self, node: NodeIndex) -> NodeIndex {
        self.nodes[node as usize].sm.current_leader()
    }

    pub fn status(&self, tx_hash: &Hash) -> Option<TxStatus> {
        self.statuses.get(tx_hash).cloned()
    }

    /// Proof for `key` built by `node` against its own head, with the
    /// forward links its local store can produce.
    pub fn proof(&self, node: NodeIndex, key: &InstanceId) -> Proof {
        let n = &self.nodes[node as usize];
        let head = n.sm.last_header().index;
        let mut links = Vec::new();
        for to in 1..=head {
            let (from_block, _) = &n.blocks[(to - 1) as usize];
            let (to_block, _) = &n.blocks[to as usize];
            links.push(ForwardLink {
                from: from_block.hash(),
                to: to_block.hash(),
                to_index: to,
                new_roster: None,
                signature: to_block
                    .header
                    .signature
                    .clone()
                    .expect("committed blocks are signed"),
            });
        }
        n.sm.build_proof(key, links).expect("proof path")
    }

    pub fn get_value(&self, node: NodeIndex, key: &InstanceId) -> Option<Vec<u8>> {
        self.nodes[node as usize].sm.get_value(key).map(|i| i.value)
    }

    // ─── Scenario controls ──────────────────────────────────────────────

    /// Inject a view-change request into one node's mailbox, as the
    /// `SendViewChange` RPC would.
    pub fn inject_view_change_request(
        &mut self,
        node: NodeIndex,
        request: byzcoin_types::ViewChangeRequest,
    ) {
        self.schedule_event(
            node,
            self.clock + Duration::from_millis(1),
            Event::ViewChangeRequestReceived { request },
        );
    }

    /// Submit a transaction to one node, as a client would.
    pub fn submit(&mut self, node: NodeIndex, tx: ClientTransaction) -> Hash {
        let hash = tx.hash();
        self.schedule_event(node, self.clock + Duration::from_millis(1), Event::SubmitTransaction { tx });
        hash
    }

    /// Stop a node: it neither receives messages nor fires timers.
    pub fn kill(&mut self, node: NodeIndex) {
        debug!(node, "killing node");
        self.nodes[node as usize].up = false;
    }

    /// Bring a killed node back. Its state survived (disk did not die with
    /// the process); it re-arms its timers and pulls missed blocks.
    pub fn restart(&mut self, node: NodeIndex) {
        debug!(node, "restarting node");
        self.nodes[node as usize].up = true;
        let actions = self.nodes[node as usize].sm.start();
        self.process_actions(node, actions);
        let from_index = self.nodes[node as usize].sm.last_header().index + 1;
        self.serve_catch_up(node, from_index);
    }

    /// Open a streaming subscription on one node.
    pub fn subscribe(&mut self, node: NodeIndex) -> SubscriberId {
        self.subscribers.push(Subscriber {
            node,
            open: true,
            received: Vec::new(),
        });
        self.subscribers.len() - 1
    }

    /// Close a subscription; the server-side fan-out forgets it at the
    /// next publish.
    pub fn close_subscription(&mut self, id: SubscriberId) {
        self.subscribers[id].open = false;
    }

    pub fn received_blocks(&self, id: SubscriberId) -> &[(BlockHeader, DataBody)] {
        &self.subscribers[id].received
    }

    pub fn subscription_open(&self, id: SubscriberId) -> bool {
        self.subscribers[id].open
    }

    // ─── The clock ──────────────────────────────────────────────────────

    /// Run the simulation until `deadline` (absolute simulated time).
    pub fn run_until(&mut self, deadline: Duration) {
        loop {
            let due = matches!(self.heap.peek(), Some(Reverse(next)) if next.at <= deadline);
            if !due {
                break;
            }
            let Reverse(scheduled) = self.heap.pop().expect("peeked");
            self.clock = scheduled.at;
            self.dispatch(scheduled);
        }
        self.clock = deadline;
    }

    /// Run for `duration` more simulated time.
    pub fn run_for(&mut self, duration: Duration) {
        self.run_until(self.clock + duration);
    }

    fn dispatch(&mut self, scheduled: Scheduled) {
        let node_index = scheduled.node;
        let node = &mut self.nodes[node_index as usize];
        if !node.up {
            return;
        }

        if let Some((id, generation)) = scheduled.timer {
            if node.timer_generations.get(&id).copied() != Some(generation) {
                return; // cancelled or replaced
            }
            node.sm.set_time(self.clock);
            let actions = node.sm.handle(timer_event(id));
            self.process_actions(node_index, actions);
            return;
        }
        if let Some(event) = scheduled.event {
            node.sm.set_time(self.clock);
            let actions = node.sm.handle(event);
            self.process_actions(node_index, actions);
        }
    }

    fn latency(&mut self) -> Duration {
        if self.config.jitter_fraction <= 0.0 {
            return self.config.latency;
        }
        let jitter = self.config.latency.as_secs_f64()
            * self.config.jitter_fraction
            * self.rng.gen::<f64>();
        self.config.latency + Duration::from_secs_f64(jitter)
    }

    fn schedule_event(&mut self, node: NodeIndex, at: Duration, event: Event) {
        self.seq += 1;
        self.heap.push(Reverse(Scheduled {
            at,
            seq: self.seq,
            node,
            timer: None,
            event: Some(event),
        }));
    }

    fn schedule_timer(&mut self, node: NodeIndex, at: Duration, id: TimerId, generation: u64) {
        self.seq += 1;
        self.heap.push(Reverse(Scheduled {
            at,
            seq: self.seq,
            node,
            timer: Some((id, generation)),
            event: None,
        }));
    }

    fn deliver_message(&mut self, from: NodeIndex, to: NodeIndex, message: &OutboundMessage) {
        if let OutboundMessage::CatchUpRequest(request) = message {
            // Served from the receiver's store without entering its state
            // machine, mirroring the production runner.
            self.serve_catch_up_from(to, from, request.from_index);
            return;
        }
        let event = match message.clone() {
            OutboundMessage::Proposal(p) => Event::ProposalReceived { proposal: *p },
            OutboundMessage::Share(s) => Event::ShareReceived { share: s },
            OutboundMessage::Refusal(r) => Event::RefusalReceived { refusal: r },
            OutboundMessage::Commit(c) => Event::CommitReceived { commit: *c },
            OutboundMessage::ViewChangeRequest(r) => Event::ViewChangeRequestReceived { request: r },
            OutboundMessage::ViewChangeCertificate(c) => {
                Event::ViewChangeCertificateReceived { certificate: c }
            }
            OutboundMessage::SubmitForward(tx) => Event::SubmitTransaction { tx },
            OutboundMessage::CatchUpRequest(_) => unreachable!("handled above"),
        };
        let at = self.clock + self.latency();
        self.schedule_event(to, at, event);
    }

    /// Ask the best-informed peer for blocks from `from_index` on.
    fn serve_catch_up(&mut self, requester: NodeIndex, from_index: u64) {
        let best = (0..self.nodes.len() as NodeIndex)
            .filter(|&i| i != requester && self.nodes[i as usize].up)
            .max_by_key(|&i| self.nodes[i as usize].blocks.len());
        if let Some(peer) = best {
            self.serve_catch_up_from(peer, requester, from_index);
        }
    }

    fn serve_catch_up_from(&mut self, peer: NodeIndex, requester: NodeIndex, from_index: u64) {
        let blocks: Vec<(Block, Vec<StateChange>)> = self.nodes[peer as usize]
            .blocks
            .iter()
            .skip(from_index as usize)
            .cloned()
            .collect();
        let chain_id = self.chain_id;
        for (block, state_changes) in blocks {
            let at = self.clock + self.latency();
            self.schedule_event(
                requester,
                at,
                Event::CommitReceived {
                    commit: CommitMessage {
                        chain_id,
                        block,
                        state_changes,
                    },
                },
            );
        }
    }

    fn process_actions(&mut self, node_index: NodeIndex, actions: Vec<Action>) {
        let mut pending: VecDeque<Action> = actions.into();
        while let Some(action) = pending.pop_front() {
            match action {
                Action::Broadcast { message } => {
                    for to in 0..self.nodes.len() as NodeIndex {
                        if to != node_index && self.nodes[to as usize].up {
                            self.deliver_message(node_index, to, &message);
                        }
                    }
                }
                Action::SendTo { index, message } => {
                    if self.nodes[index as usize].up {
                        self.deliver_message(node_index, index, &message);
                    }
                }
                Action::SetTimer { id, duration } => {
                    let node = &mut self.nodes[node_index as usize];
                    let generation = node.timer_generations.entry(id).or_insert(0);
                    *generation += 1;
                    let generation = *generation;
                    let at = self.clock + duration;
                    self.schedule_timer(node_index, at, id, generation);
                }
                Action::CancelTimer { id } => {
                    let node = &mut self.nodes[node_index as usize];
                    *node.timer_generations.entry(id).or_insert(0) += 1;
                }
                Action::EnqueueInternal { event } => {
                    // Internal events preserve causality: handled before
                    // anything else this node has queued.
                    let node = &mut self.nodes[node_index as usize];
                    node.sm.set_time(self.clock);
                    let actions = node.sm.handle(event);
                    for (i, action) in actions.into_iter().enumerate() {
                        pending.insert(i, action);
                    }
                }
                Action::CommitBlock {
                    block,
                    state_changes,
                } => {
                    let node = &mut self.nodes[node_index as usize];
                    let expected = node.blocks.len() as u64;
                    debug_assert_eq!(block.header.index, expected, "store stays sequential");
                    node.blocks.push(((*block).clone(), state_changes));

                    for subscriber in &mut self.subscribers {
                        if subscriber.node == node_index && subscriber.open {
                            subscriber
                                .received
                                .push((block.header.clone(), block.body.clone()));
                        }
                    }
                }
                Action::TransactionStatus { tx_hash, status } => {
                    self.statuses.insert(tx_hash, status);
                }
                Action::FetchMissing { from_index } => {
                    self.serve_catch_up(node_index, from_index);
                }
                Action::AbortChain { reason } => {
                    panic!("chain aborted on node {}: {}", node_index, reason);
                }
            }
        }
    }
}

fn timer_event(id: TimerId) -> Event {
    match id {
        TimerId::BlockInterval => Event::BlockIntervalTimer,
        TimerId::Heartbeat => Event::HeartbeatTimer,
        TimerId::ViewChange => Event::ViewChangeTimer,
    }
}
