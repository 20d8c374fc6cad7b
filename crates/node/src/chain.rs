//! The per-chain state machine.
//!
//! Composes the transaction buffer, executor, collective-signing pipeline,
//! heartbeat monitor and view-change manager into one deterministic actor.
//! The runner owns all I/O; everything here is synchronous.

use byzcoin_bft::{HeartbeatMonitor, SigningRound, ViewChangeOutcome, ViewChangeState};
use byzcoin_core::{Action, Event, OutboundMessage, StateMachine, TimerId, TxStatus};
use byzcoin_darc::Darc;
use byzcoin_engine::{contracts::config::read_config, ContractRegistry, ExecutionCache, Executor};
use byzcoin_mempool::{BufferError, TxBuffer};
use byzcoin_trie::{Trie, TrieError};
use byzcoin_types::{
    Block, BlockHeader, BlockProposal, BlsKeyPair, ChainConfig, ChainId, ClientTransaction,
    CommitMessage, DataBody, ForwardLink, Hash, InstanceId, NodeIndex, Refusal, RefusalReason,
    SignatureShare, StateChange, ViewChangeCertificate,
};
use parity_scale_codec::Encode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::proof::Proof;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("genesis trie root mismatch: recomputed {got}, header says {want}")]
    GenesisRootMismatch { got: Hash, want: Hash },
    #[error(transparent)]
    Trie(#[from] TrieError),
}

/// One chain, one state machine.
pub struct ChainStateMachine {
    chain_id: ChainId,
    our_index: NodeIndex,
    signing_key: BlsKeyPair,

    config: ChainConfig,
    trie: Trie,
    executor: Executor,
    cache: ExecutionCache,
    buffer: TxBuffer,

    heartbeat: HeartbeatMonitor,
    view_change: ViewChangeState,

    /// The leader's in-flight collective-signing round.
    round: Option<SigningRound>,

    last_header: BlockHeader,
    last_hash: Hash,
    genesis_hash: Hash,

    now: Duration,
}

impl ChainStateMachine {
    /// Bootstrap a node from a genesis block plus the config and darc it
    /// was built from. Recomputes the genesis trie and checks it against
    /// the header.
    pub fn new(
        our_index: NodeIndex,
        signing_key: BlsKeyPair,
        genesis: &Block,
        darc: &Darc,
        config: ChainConfig,
        registry: ContractRegistry,
        rotation_window: u32,
    ) -> Result<Self, ChainError> {
        let executor = Executor::new(registry);
        let mut trie = Trie::new();
        let (_, root) = executor.execute_genesis(&mut trie, darc, &config)?;
        if root != genesis.header.trie_root {
            return Err(ChainError::GenesisRootMismatch {
                got: root,
                want: genesis.header.trie_root,
            });
        }

        let genesis_hash = genesis.hash();
        let chain_id = ChainId(genesis_hash);
        let heartbeat = HeartbeatMonitor::new(config.heartbeat_timeout());
        let mut view_change = ViewChangeState::new(
            chain_id,
            our_index,
            signing_key.clone(),
            config.block_interval(),
            rotation_window,
        );
        view_change.on_head_change(genesis_hash, 0, 0);

        Ok(Self {
            chain_id,
            our_index,
            signing_key,
            config,
            trie,
            executor,
            cache: ExecutionCache::default(),
            buffer: TxBuffer::default(),
            heartbeat,
            view_change,
            round: None,
            last_header: genesis.header.clone(),
            last_hash: genesis_hash,
            genesis_hash,
            now: Duration::ZERO,
        })
    }

    /// Initial timers. Runners call this once after construction.
    pub fn start(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::SetTimer {
            id: TimerId::Heartbeat,
            duration: self.heartbeat.timeout(),
        }];
        if self.is_leader() {
            actions.push(Action::SetTimer {
                id: TimerId::BlockInterval,
                duration: self.config.block_interval(),
            });
        }
        actions
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn genesis_hash(&self) -> Hash {
        self.genesis_hash
    }

    pub fn last_header(&self) -> &BlockHeader {
        &self.last_header
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn current_leader(&self) -> NodeIndex {
        self.view_change.current_leader()
    }

    pub fn is_leader(&self) -> bool {
        self.view_change.current_leader() == self.our_index
    }

    pub fn pending_transactions(&self) -> usize {
        self.buffer.len()
    }

    /// Read a key through the committed trie.
    pub fn get_value(&self, key: &InstanceId) -> Option<byzcoin_types::StateInstance> {
        self.trie.get(key)
    }

    /// Package a proof for `key` at the current head. The forward links
    /// come from the block store, which the runner owns.
    pub fn build_proof(
        &self,
        key: &InstanceId,
        links: Vec<ForwardLink>,
    ) -> Result<Proof, TrieError> {
        Ok(Proof {
            path: self.trie.proof_path(key)?,
            latest: self.last_header.clone(),
            links,
        })
    }

    // ─── Leader: block production ───────────────────────────────────────

    fn on_block_interval(&mut self) -> Vec<Action> {
        if !self.is_leader() {
            // Deposed between arming and firing.
            return vec![Action::CancelTimer {
                id: TimerId::BlockInterval,
            }];
        }
        let mut actions = vec![Action::SetTimer {
            id: TimerId::BlockInterval,
            duration: self.config.block_interval(),
        }];

        // The collective-signing deadline equals the block interval: an
        // unfinished round is abandoned and its batch requeued.
        if let Some(round) = self.round.take() {
            warn!(
                shares = round.share_count(),
                refusals = round.refusals().len(),
                "signing round missed the deadline, retrying next interval"
            );
            for result in &round.candidate().body.tx_results {
                let _ = self.buffer.submit(result.tx.clone());
            }
        }

        let batch = self.buffer.drain(self.config.max_block_size as usize);
        if batch.is_empty() {
            return actions;
        }

        let index = self.last_header.index + 1;
        let timestamp_ns = self.timestamp_ns();
        let output = match self
            .executor
            .execute_batch(&mut self.trie, &batch, index, timestamp_ns)
        {
            Ok(output) => output,
            Err(e) => {
                error!(%e, "ERR_STATE_CORRUPTED: batch execution failed on own trie");
                return vec![Action::AbortChain {
                    reason: e.to_string(),
                }];
            }
        };

        let body = DataBody {
            tx_results: output.tx_results.clone(),
            view_change: None,
        };
        self.cache
            .insert(self.trie.root(), body.hash(), output.clone());

        let header = BlockHeader {
            index,
            roster_id: self.config.roster.id(),
            prev_hashes: vec![self.last_hash],
            data_hash: body.hash(),
            trie_root: output.root,
            timestamp_ns: self.timestamp_ns(),
            forward_links: Vec::new(),
            signature: None,
        };
        info!(
            index,
            txs = body.tx_results.len(),
            "proposing block"
        );
        actions.extend(self.open_round(header, body, output.state_changes));
        actions
    }

    /// Open a signing round for a candidate, count our own share, and
    /// broadcast the proposal.
    fn open_round(
        &mut self,
        header: BlockHeader,
        body: DataBody,
        state_changes: Vec<StateChange>,
    ) -> Vec<Action> {
        let proposal = BlockProposal {
            chain_id: self.chain_id,
            leader_index: self.our_index,
            header: header.clone(),
            body: body.clone(),
        };
        let message = header.share_message(self.chain_id);
        let mut round = SigningRound::new(Block { header, body }, state_changes, message.clone());

        let own_share = SignatureShare {
            chain_id: self.chain_id,
            header_hash: round.header_hash(),
            signer_index: self.our_index,
            signature: self.signing_key.sign(&message),
        };
        if let Err(e) = round.add_share(&own_share, &self.config.roster) {
            error!(%e, "could not count own share");
        }
        self.round = Some(round);

        let mut actions = vec![Action::Broadcast {
            message: OutboundMessage::Proposal(Box::new(proposal)),
        }];
        actions.extend(self.try_finalize_round());
        actions
    }

    fn on_share(&mut self, share: SignatureShare) -> Vec<Action> {
        let Some(round) = self.round.as_mut() else {
            debug!("share with no round open, ignoring");
            return Vec::new();
        };
        if let Err(e) = round.add_share(&share, &self.config.roster) {
            debug!(signer = share.signer_index, %e, "dropping share");
            return Vec::new();
        }
        self.try_finalize_round()
    }

    fn try_finalize_round(&mut self) -> Vec<Action> {
        let ready = self
            .round
            .as_ref()
            .is_some_and(|r| r.threshold_met(&self.config.roster));
        if !ready {
            return Vec::new();
        }
        let round = self.round.take().expect("readiness checked");
        match round.finalize(&self.config.roster) {
            Ok((block, state_changes)) => {
                info!(index = block.header.index, "block frozen at threshold");
                let mut actions = vec![Action::Broadcast {
                    message: OutboundMessage::Commit(Box::new(CommitMessage {
                        chain_id: self.chain_id,
                        block: block.clone(),
                        state_changes: state_changes.clone(),
                    })),
                }];
                actions.extend(self.commit_block(block, state_changes));
                actions
            }
            Err(e) => {
                warn!(%e, "finalize failed despite threshold");
                Vec::new()
            }
        }
    }

    fn on_refusal(&mut self, refusal: Refusal) -> Vec<Action> {
        if let Some(round) = self.round.as_mut() {
            round.add_refusal(&refusal);
        }
        Vec::new()
    }

    // ─── Follower: proposal validation ──────────────────────────────────

    fn on_proposal(&mut self, proposal: BlockProposal) -> Vec<Action> {
        if proposal.chain_id != self.chain_id {
            return Vec::new();
        }
        if proposal.leader_index == self.our_index {
            // Our own broadcast echoed back.
            return Vec::new();
        }
        let header_hash = proposal.header.hash();

        match self.validate_proposal(&proposal) {
            Ok(extra) => {
                let message = proposal.header.share_message(self.chain_id);
                let share = SignatureShare {
                    chain_id: self.chain_id,
                    header_hash,
                    signer_index: self.our_index,
                    signature: self.signing_key.sign(&message),
                };
                debug!(index = proposal.header.index, "co-signing proposal");
                let mut actions = extra;
                actions.push(Action::SendTo {
                    index: proposal.leader_index,
                    message: OutboundMessage::Share(share),
                });
                actions
            }
            Err(Some(reason)) => {
                warn!(index = proposal.header.index, ?reason, "refusing proposal");
                vec![Action::SendTo {
                    index: proposal.leader_index,
                    message: OutboundMessage::Refusal(Refusal {
                        chain_id: self.chain_id,
                        header_hash,
                        signer_index: self.our_index,
                        reason,
                    }),
                }]
            }
            // Old or otherwise irrelevant; not worth a refusal.
            Err(None) => Vec::new(),
        }
    }

    /// Run the follower checks in spec order. `Err(Some(reason))` carries
    /// the first failing check; `Err(None)` means silently ignore.
    fn validate_proposal(
        &mut self,
        proposal: &BlockProposal,
    ) -> Result<Vec<Action>, Option<RefusalReason>> {
        let header = &proposal.header;

        // A view-change block carries its own leadership evidence; its
        // certificate is checked instead of the current-leader field.
        if proposal.body.view_change.is_none()
            && proposal.leader_index != self.view_change.current_leader()
        {
            return Err(Some(RefusalReason::WrongLeader));
        }
        if header.index <= self.last_header.index {
            return Err(None);
        }
        if header.index > self.last_header.index + 1 {
            // We are behind; ask for the gap but refuse this candidate.
            return Err(Some(RefusalReason::UnknownPrevious {
                expected: self.last_hash,
                got: header.prev_hashes.first().copied().unwrap_or(Hash::ZERO),
            }));
        }
        if header.prev_hashes.first() != Some(&self.last_hash) {
            return Err(Some(RefusalReason::UnknownPrevious {
                expected: self.last_hash,
                got: header.prev_hashes.first().copied().unwrap_or(Hash::ZERO),
            }));
        }
        if header.roster_id != self.config.roster.id() {
            return Err(Some(RefusalReason::WrongRoster));
        }
        if header.data_hash != proposal.body.hash() {
            return Err(Some(RefusalReason::MalformedHeader {
                reason: "data_hash does not cover the body".into(),
            }));
        }
        if proposal.body.encode().len() > self.config.max_block_size as usize {
            return Err(Some(RefusalReason::Oversized));
        }

        if let Some(certificate) = &proposal.body.view_change {
            return self.validate_view_change_block(proposal, certificate);
        }

        // Re-execute (or hit the cache) to confirm the proposed root and
        // every transaction's signatures and counters.
        let batch: Vec<ClientTransaction> = proposal
            .body
            .tx_results
            .iter()
            .map(|r| r.tx.clone())
            .collect();
        let prev_root = self.trie.root();
        let body_hash = proposal.body.hash();

        let output = match self.cache.get(&prev_root, &body_hash) {
            Some(cached) => cached.clone(),
            None => {
                let output = self
                    .executor
                    .execute_batch(&mut self.trie, &batch, header.index, header.timestamp_ns)
                    .map_err(|e| {
                        Some(RefusalReason::MalformedHeader {
                            reason: e.to_string(),
                        })
                    })?;
                self.cache.insert(prev_root, body_hash, output.clone());
                output
            }
        };

        if output.root != header.trie_root {
            return Err(Some(RefusalReason::TrieRootMismatch {
                expected: output.root,
                got: header.trie_root,
            }));
        }
        for (ours, theirs) in output.tx_results.iter().zip(&proposal.body.tx_results) {
            if ours.accepted != theirs.accepted {
                return Err(Some(RefusalReason::BadTransaction {
                    tx_hash: theirs.tx.hash(),
                    reason: "accepted flag differs from local execution".into(),
                }));
            }
        }
        Ok(Vec::new())
    }

    fn validate_view_change_block(
        &mut self,
        proposal: &BlockProposal,
        certificate: &ViewChangeCertificate,
    ) -> Result<Vec<Action>, Option<RefusalReason>> {
        if !proposal.body.tx_results.is_empty() {
            return Err(Some(RefusalReason::MalformedHeader {
                reason: "view-change block must carry no transactions".into(),
            }));
        }
        if proposal.header.trie_root != self.trie.root() {
            return Err(Some(RefusalReason::TrieRootMismatch {
                expected: self.trie.root(),
                got: proposal.header.trie_root,
            }));
        }
        let n = self.config.roster.len() as u32;
        if certificate.view.leader_index % n != proposal.leader_index {
            return Err(Some(RefusalReason::WrongLeader));
        }
        // Adopting the certificate (if we had not already) also moves our
        // current leader, which the WrongLeader check above relies on for
        // subsequent proposals.
        if certificate.view.block_id != self.last_hash
            || certificate.verify(&self.config.roster).is_err()
        {
            return Err(Some(RefusalReason::MalformedHeader {
                reason: "invalid view-change certificate".into(),
            }));
        }
        self.view_change
            .on_certificate(certificate, &self.config.roster);
        Ok(Vec::new())
    }

    // ─── Commit path ────────────────────────────────────────────────────

    fn on_commit(&mut self, commit: CommitMessage) -> Vec<Action> {
        if commit.chain_id != self.chain_id {
            return Vec::new();
        }
        let block = commit.block;
        let index = block.header.index;

        if index <= self.last_header.index {
            // Duplicate or old. Two different signed blocks at one index
            // would break safety; check before discarding.
            if index == self.last_header.index
                && block.hash() != self.last_hash
                && block
                    .header
                    .verify_signature(self.chain_id, &self.config.roster)
                    .is_ok()
            {
                error!(index, "ERR_FORK_DETECTED: conflicting signed block");
                return vec![Action::AbortChain {
                    reason: format!("ERR_FORK_DETECTED: two signed blocks at index {}", index),
                }];
            }
            return Vec::new();
        }
        if index > self.last_header.index + 1 {
            debug!(
                have = self.last_header.index,
                got = index,
                "behind the chain, fetching missing blocks"
            );
            return vec![Action::FetchMissing {
                from_index: self.last_header.index + 1,
            }];
        }
        if block.header.prev_hashes.first() != Some(&self.last_hash) {
            warn!(index, "commit does not extend our head, dropping");
            return Vec::new();
        }
        if block
            .header
            .verify_signature(self.chain_id, &self.config.roster)
            .is_err()
        {
            warn!(index, "commit with invalid collective signature, dropping");
            return Vec::new();
        }

        // Establish the state changes: validation cache, the message's
        // replay data, or re-execution, in that order.
        let prev_root = self.trie.root();
        let body_hash = block.body.hash();
        let state_changes = if block.body.view_change.is_some() {
            Vec::new()
        } else if let Some(cached) = self.cache.get(&prev_root, &body_hash) {
            cached.state_changes.clone()
        } else if !commit.state_changes.is_empty() {
            commit.state_changes
        } else {
            let batch: Vec<ClientTransaction> =
                block.body.tx_results.iter().map(|r| r.tx.clone()).collect();
            match self
                .executor
                .execute_batch(&mut self.trie, &batch, index, block.header.timestamp_ns)
            {
                Ok(output) => output.state_changes,
                Err(e) => {
                    error!(%e, "ERR_STATE_CORRUPTED: replay failed");
                    return vec![Action::AbortChain {
                        reason: e.to_string(),
                    }];
                }
            }
        };

        // The applied root must land exactly on the signed one.
        match self.trie.apply_preview(&state_changes) {
            Ok(root) if root == block.header.trie_root => {}
            Ok(root) => {
                warn!(
                    index,
                    ?root,
                    want = ?block.header.trie_root,
                    "commit root mismatch, dropping block"
                );
                return Vec::new();
            }
            Err(e) => {
                error!(%e, "ERR_STATE_CORRUPTED: applying committed changes failed");
                return vec![Action::AbortChain {
                    reason: e.to_string(),
                }];
            }
        }

        self.commit_block(block, state_changes)
    }

    /// Adopt a frozen block: move the root, refresh config, reset timers,
    /// report transaction statuses, and hand the block to the runner for
    /// persistence and streaming.
    fn commit_block(&mut self, block: Block, state_changes: Vec<StateChange>) -> Vec<Action> {
        let hash = block.hash();
        let index = block.header.index;
        self.trie.set_root(block.header.trie_root);

        // Config updates take effect at the end of the block that carries
        // them; the next block sees the new roster and interval.
        if let Some(new_config) = read_config(&self.trie) {
            if new_config != self.config {
                info!(index, "chain config changed");
                self.heartbeat.set_timeout(new_config.heartbeat_timeout());
                self.view_change
                    .set_block_interval(new_config.block_interval());
                self.config = new_config;
            }
        }

        let new_leader = match &block.body.view_change {
            Some(cert) => cert.view.leader_index % self.config.roster.len() as u32,
            None => self.view_change.current_leader(),
        };

        self.last_header = block.header.clone();
        self.last_hash = hash;
        self.heartbeat.beat();

        let mut actions = self.view_change.on_head_change(hash, index, new_leader);

        for result in &block.body.tx_results {
            let tx_hash = result.tx.hash();
            self.buffer.remove(&tx_hash);
            actions.push(Action::TransactionStatus {
                tx_hash,
                status: TxStatus::Included {
                    block_index: index,
                    accepted: result.accepted,
                },
            });
        }

        if self.is_leader() {
            actions.push(Action::SetTimer {
                id: TimerId::BlockInterval,
                duration: self.config.block_interval(),
            });
        } else {
            actions.push(Action::CancelTimer {
                id: TimerId::BlockInterval,
            });
        }
        actions.push(Action::SetTimer {
            id: TimerId::Heartbeat,
            duration: self.heartbeat.timeout(),
        });

        info!(index, txs = block.body.tx_results.len(), "block committed");
        actions.push(Action::CommitBlock {
            block: Box::new(block),
            state_changes,
        });
        actions
    }

    // ─── Liveness ───────────────────────────────────────────────────────

    fn on_heartbeat_timer(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::SetTimer {
            id: TimerId::Heartbeat,
            duration: self.heartbeat.timeout(),
        }];
        if self.is_leader() {
            return actions;
        }
        if self.heartbeat.expired() {
            warn!(
                leader = self.view_change.current_leader(),
                "leader silent past heartbeat timeout"
            );
            actions.push(Action::EnqueueInternal {
                event: Event::LeaderTimeout,
            });
        }
        actions
    }

    fn handle_view_change_outcome(&mut self, outcome: ViewChangeOutcome) -> Vec<Action> {
        match outcome {
            ViewChangeOutcome::None => Vec::new(),
            ViewChangeOutcome::Certificate(cert) => self.on_new_view(cert),
        }
    }

    /// A view-change certificate took effect: the manager already moved the
    /// current leader. The new leader appends the view-change block.
    fn on_new_view(&mut self, certificate: ViewChangeCertificate) -> Vec<Action> {
        // Give the new leader a full timeout before suspecting it too.
        self.heartbeat.beat();

        if !self.is_leader() {
            return vec![Action::CancelTimer {
                id: TimerId::BlockInterval,
            }];
        }

        info!(
            index = self.last_header.index + 1,
            "assuming leadership, appending view-change block"
        );
        let body = DataBody {
            tx_results: Vec::new(),
            view_change: Some(certificate),
        };
        let header = BlockHeader {
            index: self.last_header.index + 1,
            roster_id: self.config.roster.id(),
            prev_hashes: vec![self.last_hash],
            data_hash: body.hash(),
            trie_root: self.trie.root(),
            timestamp_ns: self.timestamp_ns(),
            forward_links: Vec::new(),
            signature: None,
        };
        let mut actions = vec![Action::SetTimer {
            id: TimerId::BlockInterval,
            duration: self.config.block_interval(),
        }];
        actions.extend(self.open_round(header, body, Vec::new()));
        actions
    }

    // ─── Clients ────────────────────────────────────────────────────────

    fn on_submit(&mut self, tx: ClientTransaction) -> Vec<Action> {
        let tx_hash = tx.hash();
        if tx.instructions.is_empty()
            || !tx.instructions.iter().all(|i| i.verify_signatures())
        {
            return vec![Action::TransactionStatus {
                tx_hash,
                status: TxStatus::Rejected {
                    reason: "ERR_BAD_SIGNATURE: instruction signature invalid".into(),
                },
            }];
        }
        match self.buffer.submit(tx.clone()) {
            Ok(_) => {
                let mut actions = vec![Action::TransactionStatus {
                    tx_hash,
                    status: TxStatus::Queued,
                }];
                if !self.is_leader() {
                    actions.push(Action::SendTo {
                        index: self.view_change.current_leader(),
                        message: OutboundMessage::SubmitForward(tx),
                    });
                }
                actions
            }
            // Idempotent: the transaction is already on its way.
            Err(BufferError::Duplicate) => vec![Action::TransactionStatus {
                tx_hash,
                status: TxStatus::Queued,
            }],
            Err(e @ BufferError::Overloaded) => vec![Action::TransactionStatus {
                tx_hash,
                status: TxStatus::Rejected {
                    reason: e.to_string(),
                },
            }],
        }
    }

    fn timestamp_ns(&self) -> i64 {
        self.now.as_nanos() as i64
    }
}

impl StateMachine for ChainStateMachine {
    fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.heartbeat.set_time(now);
    }

    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::BlockIntervalTimer => self.on_block_interval(),
            Event::HeartbeatTimer => self.on_heartbeat_timer(),
            Event::ViewChangeTimer => {
                let (mut actions, outcome) =
                    self.view_change.on_view_change_timer(&self.config.roster);
                actions.extend(self.handle_view_change_outcome(outcome));
                actions
            }
            Event::ProposalReceived { proposal } => self.on_proposal(proposal),
            Event::ShareReceived { share } => self.on_share(share),
            Event::RefusalReceived { refusal } => self.on_refusal(refusal),
            Event::CommitReceived { commit } => self.on_commit(commit),
            Event::ViewChangeRequestReceived { request } => {
                let (mut actions, outcome) =
                    self.view_change.on_request(request, &self.config.roster);
                actions.extend(self.handle_view_change_outcome(outcome));
                actions
            }
            Event::ViewChangeCertificateReceived { certificate } => {
                if self
                    .view_change
                    .on_certificate(&certificate, &self.config.roster)
                    .is_some()
                {
                    self.on_new_view(certificate)
                } else {
                    Vec::new()
                }
            }
            Event::SubmitTransaction { tx } => self.on_submit(tx),
            Event::LeaderTimeout => {
                let (mut actions, outcome) =
                    self.view_change.on_leader_timeout(&self.config.roster);
                actions.extend(self.handle_view_change_outcome(outcome));
                actions
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::build_genesis;
    use byzcoin_types::test_utils::{test_roster, test_signer};
    use byzcoin_types::{Argument, Instruction};
    use tracing_test::traced_test;

    /// A roster of n nodes, all state machines bootstrapped from the same
    /// genesis.
    fn make_chain(n: usize) -> (Vec<ChainStateMachine>, Darc, byzcoin_types::Signer) {
        let (roster, keys) = test_roster(n);
        let signer = test_signer(1);
        let (genesis, darc, config) = build_genesis(
            roster,
            Duration::from_millis(500),
            &signer.identity(),
            &["spawn:value", "invoke:value.update"],
        )
        .unwrap();

        let nodes = keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                ChainStateMachine::new(
                    i as NodeIndex,
                    key.clone(),
                    &genesis,
                    &darc,
                    config.clone(),
                    ContractRegistry::with_builtins(),
                    byzcoin_bft::DEFAULT_ROTATION_WINDOW,
                )
                .unwrap()
            })
            .collect();
        (nodes, darc, signer)
    }

    fn spawn_tx(darc: &Darc, signer: &byzcoin_types::Signer, counter: u64) -> ClientTransaction {
        let mut instruction = Instruction::spawn(
            InstanceId(darc.base_id().0),
            "value",
            vec![Argument::new("value", vec![5, 6, 7, 8])],
        );
        instruction.sign_with(&[(signer, counter)]);
        ClientTransaction::new(vec![instruction])
    }

    /// Drive one full block through leader and followers by hand.
    #[traced_test]
    #[test]
    fn full_block_round_by_hand() {
        let (mut nodes, darc, signer) = make_chain(4);
        let tx = spawn_tx(&darc, &signer, 1);
        let new_id = tx.instructions[0].derive_id("");

        // Submit to the leader.
        nodes[0].set_time(Duration::from_millis(100));
        nodes[0].handle(Event::SubmitTransaction { tx });

        // Leader proposes at the interval tick.
        nodes[0].set_time(Duration::from_millis(600));
        let actions = nodes[0].handle(Event::BlockIntervalTimer);
        let proposal = actions
            .iter()
            .find_map(|a| match a {
                Action::Broadcast {
                    message: OutboundMessage::Proposal(p),
                } => Some((**p).clone()),
                _ => None,
            })
            .expect("leader must propose");

        // Followers validate and return shares.
        let mut shares = Vec::new();
        for node in nodes.iter_mut().skip(1) {
            node.set_time(Duration::from_millis(600));
            let actions = node.handle(Event::ProposalReceived {
                proposal: proposal.clone(),
            });
            for action in actions {
                match action {
                    Action::SendTo {
                        index: 0,
                        message: OutboundMessage::Share(share),
                    } => shares.push(share),
                    Action::SendTo {
                        message: OutboundMessage::Refusal(refusal),
                        ..
                    } => panic!("unexpected refusal: {:?}", refusal.reason),
                    _ => {}
                }
            }
        }
        assert_eq!(shares.len(), 3);

        // Two more shares reach the threshold of 3 (leader already counted
        // its own).
        let mut commit = None;
        for share in shares {
            let actions = nodes[0].handle(Event::ShareReceived { share });
            for action in actions {
                if let Action::Broadcast {
                    message: OutboundMessage::Commit(c),
                } = action
                {
                    commit = Some((*c).clone());
                }
            }
            if commit.is_some() {
                break;
            }
        }
        let commit = commit.expect("threshold must freeze the block");
        assert_eq!(commit.block.header.index, 1);

        // Leader state advanced.
        assert_eq!(nodes[0].last_header().index, 1);
        assert!(nodes[0].get_value(&new_id).is_some());

        // Followers adopt the commit.
        for node in nodes.iter_mut().skip(1) {
            node.handle(Event::CommitReceived {
                commit: commit.clone(),
            });
            assert_eq!(node.last_header().index, 1);
            let value = node.get_value(&new_id).expect("value must be stored");
            assert_eq!(value.value, vec![5, 6, 7, 8]);
        }

        // All roots agree.
        let root = nodes[0].last_header().trie_root;
        for node in &nodes {
            assert_eq!(node.last_header().trie_root, root);
        }
    }

    #[traced_test]
    #[test]
    fn follower_refuses_wrong_leader() {
        let (mut nodes, darc, signer) = make_chain(4);
        let tx = spawn_tx(&darc, &signer, 1);

        // Node 2 (not the leader) fabricates a proposal.
        nodes[2].set_time(Duration::from_millis(600));
        nodes[2].handle(Event::SubmitTransaction { tx });
        // Force it by crafting the proposal manually.
        let bogus = BlockProposal {
            chain_id: nodes[2].chain_id(),
            leader_index: 2,
            header: nodes[2].last_header().clone(),
            body: DataBody::default(),
        };
        let actions = nodes[1].handle(Event::ProposalReceived { proposal: bogus });
        let refusal = actions
            .iter()
            .find_map(|a| match a {
                Action::SendTo {
                    message: OutboundMessage::Refusal(r),
                    ..
                } => Some(r.clone()),
                _ => None,
            })
            .expect("must refuse");
        assert!(matches!(refusal.reason, RefusalReason::WrongLeader));
    }

    #[traced_test]
    #[test]
    fn submit_to_follower_forwards_to_leader() {
        let (mut nodes, darc, signer) = make_chain(4);
        let tx = spawn_tx(&darc, &signer, 1);
        let actions = nodes[2].handle(Event::SubmitTransaction { tx });
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::SendTo {
                index: 0,
                message: OutboundMessage::SubmitForward(_)
            }
        )));
    }

    #[traced_test]
    #[test]
    fn bad_signature_rejected_at_ingress() {
        let (mut nodes, darc, signer) = make_chain(4);
        let mut tx = spawn_tx(&darc, &signer, 1);
        tx.instructions[0].signer_counters[0] = 9; // invalidates the signature
        let actions = nodes[0].handle(Event::SubmitTransaction { tx });
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::TransactionStatus {
                status: TxStatus::Rejected { .. },
                ..
            }
        )));
        assert_eq!(nodes[0].pending_transactions(), 0);
    }

    #[traced_test]
    #[test]
    fn leader_timeout_triggers_view_change_request() {
        let (mut nodes, _, _) = make_chain(4);
        nodes[1].set_time(Duration::from_secs(10));
        let actions = nodes[1].handle(Event::HeartbeatTimer);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::EnqueueInternal { event: Event::LeaderTimeout })));

        let actions = nodes[1].handle(Event::LeaderTimeout);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Broadcast {
                message: OutboundMessage::ViewChangeRequest(_)
            }
        )));
    }

    #[traced_test]
    #[test]
    fn conflicting_signed_block_aborts_chain() {
        let (mut nodes, darc, signer) = make_chain(4);
        let (_, keys) = test_roster(4);
        let chain_id = nodes[0].chain_id();

        // Commit block 1 on node 3 through the normal path.
        let tx = spawn_tx(&darc, &signer, 1);
        nodes[0].set_time(Duration::from_millis(100));
        nodes[0].handle(Event::SubmitTransaction { tx });
        nodes[0].set_time(Duration::from_millis(600));
        let actions = nodes[0].handle(Event::BlockIntervalTimer);
        let proposal = actions
            .iter()
            .find_map(|a| match a {
                Action::Broadcast {
                    message: OutboundMessage::Proposal(p),
                } => Some((**p).clone()),
                _ => None,
            })
            .unwrap();
        let mut commit = None;
        for node in 1..4usize {
            let actions = nodes[node].handle(Event::ProposalReceived {
                proposal: proposal.clone(),
            });
            for action in actions {
                if let Action::SendTo {
                    message: OutboundMessage::Share(share),
                    ..
                } = action
                {
                    for a in nodes[0].handle(Event::ShareReceived { share }) {
                        if let Action::Broadcast {
                            message: OutboundMessage::Commit(c),
                        } = a
                        {
                            commit = Some((*c).clone());
                        }
                    }
                }
            }
        }
        let commit = commit.expect("block 1 must commit");
        nodes[3].handle(Event::CommitReceived {
            commit: commit.clone(),
        });
        assert_eq!(nodes[3].last_header().index, 1);

        // Forge a different, validly co-signed block at the same index.
        let mut forged_header = commit.block.header.clone();
        forged_header.timestamp_ns += 1;
        forged_header.signature = None;
        let message = forged_header.share_message(chain_id);
        let signatures: Vec<_> = keys[..3].iter().map(|k| k.sign(&message)).collect();
        let mut signers = byzcoin_types::SignerBitfield::new(4);
        (0..3).for_each(|i| signers.set(i));
        forged_header.signature = Some(byzcoin_types::CollectiveSignature {
            signature: byzcoin_types::BlsSignature::aggregate(&signatures).unwrap(),
            signers,
        });
        let forged = Block {
            header: forged_header,
            body: commit.block.body.clone(),
        };

        let actions = nodes[3].handle(Event::CommitReceived {
            commit: CommitMessage {
                chain_id,
                block: forged,
                state_changes: commit.state_changes.clone(),
            },
        });
        assert!(
            actions
                .iter()
                .any(|a| matches!(a, Action::AbortChain { .. })),
            "conflicting signed block must abort the chain"
        );
    }

    #[traced_test]
    #[test]
    fn empty_interval_produces_no_block() {
        let (mut nodes, _, _) = make_chain(4);
        nodes[0].set_time(Duration::from_millis(600));
        let actions = nodes[0].handle(Event::BlockIntervalTimer);
        assert!(!actions.iter().any(|a| matches!(
            a,
            Action::Broadcast {
                message: OutboundMessage::Proposal(_)
            }
        )));
    }
}
