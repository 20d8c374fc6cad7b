//! The view-change manager.
//!
//! A follower whose heartbeat expired asks the roster to move to the next
//! view. Requests for the same target view accumulate; once more than
//! two-thirds of the roster asked, their signatures aggregate into a
//! view-change certificate, every node adopts the new leader, and the new
//! leader appends a view-change block carrying the certificate.
//!
//! # Back-off
//!
//! If the attempt for view `v'` does not complete within
//! `rotation_window × 2^k × block_interval` (k = failed attempts so far),
//! the next attempt targets `v' + 1`. Progress (a new head) resets `k`.

use byzcoin_core::{Action, OutboundMessage, TimerId};
use byzcoin_types::{
    BlsKeyPair, BlsSignature, ChainId, Hash, NodeIndex, Roster, SignerBitfield, View,
    ViewChangeCertificate, ViewChangeRequest,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Default multiplier of the back-off window.
pub const DEFAULT_ROTATION_WINDOW: u32 = 3;

/// Bound on the back-off exponent so the window stays finite.
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// What processing a view-change input produced.
#[derive(Debug)]
pub enum ViewChangeOutcome {
    None,
    /// A certificate formed locally from accumulated requests.
    Certificate(ViewChangeCertificate),
}

/// Per-chain view-change state.
pub struct ViewChangeState {
    chain_id: ChainId,
    our_index: NodeIndex,
    signing_key: BlsKeyPair,
    rotation_window: u32,
    block_interval: Duration,

    /// Latest committed block, the anchor every request must reference.
    head_id: Hash,
    head_index: u64,
    current_leader: NodeIndex,

    /// Attempts that already timed out at this head (the back-off `k`).
    failed_attempts: u32,
    /// The view we currently have an outstanding request for.
    requested: Option<View>,

    /// Accumulated requests: view → signer → signature.
    collectors: HashMap<View, BTreeMap<NodeIndex, BlsSignature>>,
    /// Views already certified at this head; late requests are ignored.
    completed: HashSet<View>,
}

impl ViewChangeState {
    pub fn new(
        chain_id: ChainId,
        our_index: NodeIndex,
        signing_key: BlsKeyPair,
        block_interval: Duration,
        rotation_window: u32,
    ) -> Self {
        Self {
            chain_id,
            our_index,
            signing_key,
            rotation_window,
            block_interval,
            head_id: Hash::ZERO,
            head_index: 0,
            current_leader: 0,
            failed_attempts: 0,
            requested: None,
            collectors: HashMap::new(),
            completed: HashSet::new(),
        }
    }

    pub fn set_block_interval(&mut self, interval: Duration) {
        self.block_interval = interval;
    }

    pub fn current_leader(&self) -> NodeIndex {
        self.current_leader
    }

    pub fn head_id(&self) -> Hash {
        self.head_id
    }

    /// The back-off window for the current attempt.
    fn attempt_window(&self) -> Duration {
        let exponent = self.failed_attempts.min(MAX_BACKOFF_EXPONENT);
        self.block_interval * self.rotation_window * 2u32.pow(exponent)
    }

    /// A new block committed: adopt it as the anchor, reset back-off, and
    /// drop every request that references an older block. Stale requests
    /// are discarded without a user-visible log line.
    pub fn on_head_change(
        &mut self,
        head_id: Hash,
        head_index: u64,
        leader: NodeIndex,
    ) -> Vec<Action> {
        self.head_id = head_id;
        self.head_index = head_index;
        self.current_leader = leader;
        self.failed_attempts = 0;
        self.requested = None;

        let dropped = self.collectors.len();
        self.collectors.retain(|view, _| view.block_id == head_id);
        self.completed.retain(|view| view.block_id == head_id);
        if dropped > self.collectors.len() {
            trace!(
                dropped = dropped - self.collectors.len(),
                "dropped view-change requests for superseded blocks"
            );
        }

        vec![Action::CancelTimer {
            id: TimerId::ViewChange,
        }]
    }

    /// The heartbeat expired: request the next view.
    pub fn on_leader_timeout(&mut self, roster: &Roster) -> (Vec<Action>, ViewChangeOutcome) {
        self.start_attempt(roster)
    }

    /// The current attempt's window expired without a certificate: back off
    /// and target the view after the one that failed.
    pub fn on_view_change_timer(&mut self, roster: &Roster) -> (Vec<Action>, ViewChangeOutcome) {
        if self.requested.is_none() {
            // Timer outlived its attempt (head changed); nothing to do.
            return (Vec::new(), ViewChangeOutcome::None);
        }
        self.failed_attempts += 1;
        debug!(
            failed_attempts = self.failed_attempts,
            "view-change attempt timed out, backing off"
        );
        self.start_attempt(roster)
    }

    fn start_attempt(&mut self, roster: &Roster) -> (Vec<Action>, ViewChangeOutcome) {
        let n = roster.len() as u32;
        let target = (self.current_leader + 1 + self.failed_attempts) % n;
        let view = View {
            chain_id: self.chain_id,
            block_id: self.head_id,
            leader_index: target,
        };

        info!(
            head_index = self.head_index,
            target_leader = target,
            window = ?self.attempt_window(),
            "requesting view change"
        );

        let request = ViewChangeRequest::new(view, self.our_index, &self.signing_key);
        self.requested = Some(view);

        let mut actions = vec![
            Action::Broadcast {
                message: OutboundMessage::ViewChangeRequest(request.clone()),
            },
            Action::SetTimer {
                id: TimerId::ViewChange,
                duration: self.attempt_window(),
            },
        ];

        // Count our own request like anyone else's.
        let outcome = self.record_request(request, roster);
        if let ViewChangeOutcome::Certificate(cert) = &outcome {
            actions.push(Action::Broadcast {
                message: OutboundMessage::ViewChangeCertificate(cert.clone()),
            });
        }
        (actions, outcome)
    }

    /// A request from another member (or replayed from ourselves).
    pub fn on_request(
        &mut self,
        request: ViewChangeRequest,
        roster: &Roster,
    ) -> (Vec<Action>, ViewChangeOutcome) {
        if request.view.chain_id != self.chain_id {
            trace!("view-change request for another chain");
            return (Vec::new(), ViewChangeOutcome::None);
        }
        if request.view.block_id != self.head_id {
            // References a block we have superseded (or have not seen yet);
            // dropped silently per the garbage-collection rule.
            trace!(block_id = ?request.view.block_id, "view-change request off our head");
            return (Vec::new(), ViewChangeOutcome::None);
        }
        if self.completed.contains(&request.view) {
            trace!("view already certified");
            return (Vec::new(), ViewChangeOutcome::None);
        }
        if request.verify(roster).is_err() {
            warn!(signer = request.signer_index, "view-change request with bad signature");
            return (Vec::new(), ViewChangeOutcome::None);
        }

        let outcome = self.record_request(request, roster);
        let mut actions = Vec::new();
        if let ViewChangeOutcome::Certificate(cert) = &outcome {
            actions.push(Action::Broadcast {
                message: OutboundMessage::ViewChangeCertificate(cert.clone()),
            });
        }
        (actions, outcome)
    }

    fn record_request(&mut self, request: ViewChangeRequest, roster: &Roster) -> ViewChangeOutcome {
        let view = request.view;
        let collector = self.collectors.entry(view).or_default();
        collector.insert(request.signer_index, request.signature);

        debug!(
            target_leader = view.leader_index,
            signers = collector.len(),
            need = roster.threshold(),
            "view-change request recorded"
        );

        if collector.len() < roster.threshold() {
            return ViewChangeOutcome::None;
        }

        let collector = self.collectors.remove(&view).expect("just present");
        let mut signers = SignerBitfield::new(roster.len());
        let mut signatures = Vec::with_capacity(collector.len());
        for (&index, signature) in &collector {
            signers.set(index as usize);
            signatures.push(signature.clone());
        }
        let aggregate = match BlsSignature::aggregate(&signatures) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "failed to aggregate view-change signatures");
                return ViewChangeOutcome::None;
            }
        };
        let certificate = ViewChangeCertificate {
            view,
            signature: aggregate,
            signers,
        };
        self.apply_certificate(&certificate, roster);
        ViewChangeOutcome::Certificate(certificate)
    }

    /// A certificate arrived from the network.
    ///
    /// Returns the adopted view when it checks out.
    pub fn on_certificate(
        &mut self,
        certificate: &ViewChangeCertificate,
        roster: &Roster,
    ) -> Option<View> {
        if certificate.view.chain_id != self.chain_id
            || certificate.view.block_id != self.head_id
        {
            trace!("certificate off our head, ignoring");
            return None;
        }
        if self.completed.contains(&certificate.view) {
            return None;
        }
        if let Err(e) = certificate.verify(roster) {
            warn!(error = %e, "ERR_VIEW_STALE: invalid view-change certificate");
            return None;
        }
        self.apply_certificate(certificate, roster);
        Some(certificate.view)
    }

    fn apply_certificate(&mut self, certificate: &ViewChangeCertificate, roster: &Roster) {
        let leader = certificate.view.leader_index % roster.len() as u32;
        info!(
            new_leader = leader,
            head_index = self.head_index,
            "view change certified, adopting new leader"
        );
        self.current_leader = leader;
        self.failed_attempts = 0;
        self.requested = None;
        self.completed.insert(certificate.view);
        self.collectors.remove(&certificate.view);
    }
}
