//! The leader's collective-signing round.
//!
//! One round per candidate block: the leader broadcasts the proposal,
//! collects signature shares and refusals, and freezes the block once more
//! than two-thirds of the roster signed. The round's deadline is the next
//! block-interval tick; an unfinished round is simply abandoned and its
//! batch retried.

use byzcoin_types::{
    Block, BlsSignature, CollectiveSignature, Hash, NodeIndex, Refusal, RefusalReason, Roster,
    SignatureShare, SignerBitfield, StateChange,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("share for unknown header {0}")]
    WrongHeader(Hash),
    #[error("share from index {0} outside the roster")]
    UnknownSigner(NodeIndex),
    #[error("ERR_BAD_SIGNATURE: share signature invalid")]
    BadShare,
    #[error("ERR_THRESHOLD_NOT_MET: {got} of {need} shares")]
    ThresholdNotMet { got: usize, need: usize },
    #[error("signature aggregation failed: {0}")]
    Aggregation(String),
}

/// Collection state for one candidate block.
#[derive(Debug)]
pub struct SigningRound {
    candidate: Block,
    state_changes: Vec<StateChange>,
    header_hash: Hash,
    share_message: Vec<u8>,
    shares: BTreeMap<NodeIndex, BlsSignature>,
    refusals: BTreeMap<NodeIndex, RefusalReason>,
}

impl SigningRound {
    /// Open a round for a candidate. `share_message` is the domain-tagged
    /// message every share must sign.
    pub fn new(candidate: Block, state_changes: Vec<StateChange>, share_message: Vec<u8>) -> Self {
        let header_hash = candidate.header.hash();
        Self {
            candidate,
            state_changes,
            header_hash,
            share_message,
            shares: BTreeMap::new(),
            refusals: BTreeMap::new(),
        }
    }

    pub fn header_hash(&self) -> Hash {
        self.header_hash
    }

    pub fn candidate(&self) -> &Block {
        &self.candidate
    }

    /// Record a share after verifying it against the signer's roster key.
    /// Duplicate shares are idempotent.
    pub fn add_share(&mut self, share: &SignatureShare, roster: &Roster) -> Result<(), PipelineError> {
        if share.header_hash != self.header_hash {
            return Err(PipelineError::WrongHeader(share.header_hash));
        }
        let server = roster
            .get(share.signer_index)
            .ok_or(PipelineError::UnknownSigner(share.signer_index))?;
        server
            .public_key
            .verify(&self.share_message, &share.signature)
            .map_err(|_| PipelineError::BadShare)?;
        self.shares.insert(share.signer_index, share.signature.clone());
        Ok(())
    }

    /// Record a refusal. Refusals are diagnostic: they never block the
    /// threshold, but they tell the leader why a follower balked.
    pub fn add_refusal(&mut self, refusal: &Refusal) {
        if refusal.header_hash != self.header_hash {
            debug!(got = ?refusal.header_hash, "refusal for a different candidate, ignoring");
            return;
        }
        warn!(
            signer = refusal.signer_index,
            reason = ?refusal.reason,
            "follower refused to sign"
        );
        self.refusals
            .insert(refusal.signer_index, refusal.reason.clone());
    }

    pub fn share_count(&self) -> usize {
        self.shares.len()
    }

    pub fn refusals(&self) -> &BTreeMap<NodeIndex, RefusalReason> {
        &self.refusals
    }

    pub fn threshold_met(&self, roster: &Roster) -> bool {
        self.shares.len() >= roster.threshold()
    }

    /// Aggregate the shares and freeze the block.
    ///
    /// Fails with `ERR_THRESHOLD_NOT_MET` when fewer than `⌈2n/3⌉ + 1`
    /// members signed by the deadline.
    pub fn finalize(self, roster: &Roster) -> Result<(Block, Vec<StateChange>), PipelineError> {
        let need = roster.threshold();
        if self.shares.len() < need {
            return Err(PipelineError::ThresholdNotMet {
                got: self.shares.len(),
                need,
            });
        }

        let mut signers = SignerBitfield::new(roster.len());
        let mut signatures = Vec::with_capacity(self.shares.len());
        for (&index, signature) in &self.shares {
            signers.set(index as usize);
            signatures.push(signature.clone());
        }
        let aggregate = BlsSignature::aggregate(&signatures)
            .map_err(|e| PipelineError::Aggregation(e.to_string()))?;

        let mut block = self.candidate;
        block.header.signature = Some(CollectiveSignature {
            signature: aggregate,
            signers,
        });
        Ok((block, self.state_changes))
    }
}
