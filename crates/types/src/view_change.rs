//! View-change messages.

use crate::bitfield::SignerBitfield;
use crate::crypto::{BlsKeyPair, BlsSignature, CryptoError};
use crate::hash::Hash;
use crate::identifiers::{ChainId, NodeIndex};
use crate::roster::Roster;
use crate::signing::view_change_message;
use parity_scale_codec::{Decode, Encode};

/// One view: a chain, the block the requester considers latest, and the
/// index of the proposed leader. The leader index wraps modulo the roster
/// size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode)]
pub struct View {
    pub chain_id: ChainId,
    /// Hash of the latest block known to the requester. Requests referring
    /// to a block older than the local head are stale and dropped.
    pub block_id: Hash,
    pub leader_index: NodeIndex,
}

impl View {
    /// The message co-signed for this view.
    pub fn message(&self) -> Vec<u8> {
        view_change_message(self.chain_id, &self.block_id, self.leader_index)
    }
}

/// A follower's signed request to move to a new view.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ViewChangeRequest {
    pub view: View,
    /// Roster index of the requesting server.
    pub signer_index: NodeIndex,
    pub signature: BlsSignature,
}

impl ViewChangeRequest {
    pub fn new(view: View, signer_index: NodeIndex, key: &BlsKeyPair) -> Self {
        let signature = key.sign(&view.message());
        Self {
            view,
            signer_index,
            signature,
        }
    }

    /// Verify the signature against the roster member at `signer_index`.
    pub fn verify(&self, roster: &Roster) -> Result<(), CryptoError> {
        let server = roster
            .get(self.signer_index)
            .ok_or(CryptoError::InvalidPublicKey)?;
        server.public_key.verify(&self.view.message(), &self.signature)
    }
}

/// Proof that more than two-thirds of the roster requested the same view.
///
/// Travels as the payload of the view-change block the new leader appends.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ViewChangeCertificate {
    pub view: View,
    pub signature: BlsSignature,
    pub signers: SignerBitfield,
}

impl ViewChangeCertificate {
    /// Verify threshold and aggregate signature against the roster.
    pub fn verify(&self, roster: &Roster) -> Result<(), CryptoError> {
        if self.signers.count() < roster.threshold() {
            return Err(CryptoError::VerificationFailed);
        }
        let keys: Vec<_> = self
            .signers
            .set_indices()
            .filter_map(|i| roster.get(i as u32).map(|s| s.public_key.clone()))
            .collect();
        if keys.len() != self.signers.count() {
            return Err(CryptoError::VerificationFailed);
        }
        self.signature.verify_aggregate(&self.view.message(), &keys)
    }
}
