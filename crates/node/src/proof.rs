//! Inclusion proofs: trie path + signed head + forward-link chain.

use byzcoin_trie::{PathError, TriePath};
use byzcoin_types::{
    block_share_message, BlockHeader, ChainId, Hash, InstanceId, Roster, StateInstance,
};
use parity_scale_codec::{Decode, Encode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("forward link chain broken at {0}")]
    BrokenChain(Hash),
    #[error("ERR_BAD_SIGNATURE: link signature invalid at {0}")]
    BadLinkSignature(Hash),
    #[error("links do not reach the latest header")]
    WrongHead,
    #[error("ERR_BAD_SIGNATURE: header signature invalid")]
    BadHeaderSignature,
    #[error("trie path invalid: {0}")]
    Path(#[from] PathError),
}

/// A self-contained witness for one key's state.
///
/// Verification needs only a trusted genesis id and the roster the chain
/// started with: (1) the trie path checks against the header's root, (2)
/// the header's collective signature checks against the roster, (3) the
/// forward links walk from genesis to the header, carrying roster changes.
#[derive(Clone, Debug, Encode, Decode)]
pub struct Proof {
    pub path: TriePath,
    pub latest: BlockHeader,
    pub links: Vec<byzcoin_types::ForwardLink>,
}

impl Proof {
    /// Verify everything and return the proven instance, or `None` for a
    /// valid exclusion proof.
    pub fn verify(
        &self,
        genesis_id: Hash,
        genesis_roster: &Roster,
        key: &InstanceId,
    ) -> Result<Option<StateInstance>, ProofError> {
        let chain_id = ChainId(genesis_id);

        // Walk the links from genesis, adopting roster changes as they
        // appear. Each link's signature is the target block's collective
        // signature, so every hop is threshold-checked.
        let mut cursor = genesis_id;
        let mut roster = genesis_roster.clone();
        for link in &self.links {
            if link.from != cursor {
                return Err(ProofError::BrokenChain(link.from));
            }
            let message = block_share_message(chain_id, link.to_index, &link.to);
            link.signature
                .verify(&roster, &message)
                .map_err(|_| ProofError::BadLinkSignature(link.to))?;
            if let Some(new_roster) = &link.new_roster {
                roster = new_roster.clone();
            }
            cursor = link.to;
        }
        if cursor != self.latest.hash() {
            // A chain still at genesis has no links; the head must then be
            // the genesis block itself.
            if !(self.links.is_empty() && self.latest.hash() == genesis_id) {
                return Err(ProofError::WrongHead);
            }
        }

        // The head signature. Genesis is trusted by id and carries none.
        if self.latest.index > 0 {
            self.latest
                .verify_signature(chain_id, &roster)
                .map_err(|_| ProofError::BadHeaderSignature)?;
        }

        // Finally the trie path against the signed root.
        Ok(self.path.verify(&self.latest.trie_root, key)?)
    }
}
