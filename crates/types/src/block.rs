//! Blocks: signed headers plus transaction bodies.
//!
//! The header and body travel as two documents. The header alone, with its
//! collective signature and forward links, suffices to verify inclusion
//! proofs; the body carries the transactions and their outcomes.

use crate::bitfield::SignerBitfield;
use crate::crypto::{BlsSignature, CryptoError};
use crate::hash::{sha256, Hash};
use crate::roster::Roster;
use crate::signing::block_share_message;
use crate::transaction::ClientTransaction;
use parity_scale_codec::{Decode, Encode};

/// A BLS aggregate signature plus the bitmap of roster members that signed.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct CollectiveSignature {
    pub signature: BlsSignature,
    pub signers: SignerBitfield,
}

impl CollectiveSignature {
    /// Verify against the roster that produced it. Checks the threshold and
    /// the aggregate over the signing members' keys.
    pub fn verify(&self, roster: &Roster, message: &[u8]) -> Result<(), CryptoError> {
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
        self.signature.verify_aggregate(message, &keys)
    }
}

/// A multi-level forward link from one block to a later one.
///
/// `signature` is the target block's collective signature, so walking links
/// from a trusted genesis verifies every hop with the roster current at the
/// time, in logarithmically many steps.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ForwardLink {
    pub from: Hash,
    pub to: Hash,
    pub to_index: u64,
    /// Present when the link crosses a roster change.
    pub new_roster: Option<Roster>,
    pub signature: CollectiveSignature,
}

/// The small, signed, forward-linked document of a block.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct BlockHeader {
    /// Monotonic block index, 0 for genesis.
    pub index: u64,
    /// Content hash of the roster that signed this block.
    pub roster_id: Hash,
    /// Hashes of earlier blocks, one per skip level; `prev_hashes[0]` is the
    /// direct predecessor.
    pub prev_hashes: Vec<Hash>,
    /// Hash of the encoded `DataBody`.
    pub data_hash: Hash,
    /// Root of the state trie after applying this block's accepted
    /// transactions.
    pub trie_root: Hash,
    pub timestamp_ns: i64,
    /// Links to later blocks, filled in as successors are committed.
    pub forward_links: Vec<ForwardLink>,
    /// Collective signature over the header hash. Absent only while a
    /// candidate circulates for signing.
    pub signature: Option<CollectiveSignature>,
}

impl BlockHeader {
    /// Hash of the header's immutable fields. Forward links and the
    /// signature accrue after freezing, so they are excluded.
    pub fn hash(&self) -> Hash {
        #[derive(Encode)]
        struct Immutable<'a> {
            index: u64,
            roster_id: &'a Hash,
            prev_hashes: &'a Vec<Hash>,
            data_hash: &'a Hash,
            trie_root: &'a Hash,
            timestamp_ns: i64,
        }
        sha256(
            &Immutable {
                index: self.index,
                roster_id: &self.roster_id,
                prev_hashes: &self.prev_hashes,
                data_hash: &self.data_hash,
                trie_root: &self.trie_root,
                timestamp_ns: self.timestamp_ns,
            }
            .encode(),
        )
    }

    /// The message servers co-sign for this header on `chain_id`.
    pub fn share_message(&self, chain_id: crate::identifiers::ChainId) -> Vec<u8> {
        block_share_message(chain_id, self.index, &self.hash())
    }

    /// Verify the collective signature with the given roster.
    pub fn verify_signature(
        &self,
        chain_id: crate::identifiers::ChainId,
        roster: &Roster,
    ) -> Result<(), CryptoError> {
        let sig = self
            .signature
            .as_ref()
            .ok_or(CryptoError::VerificationFailed)?;
        sig.verify(roster, &self.share_message(chain_id))
    }
}

/// Outcome of one transaction within a block.
///
/// Rejected transactions stay in the body with `accepted = false` so clients
/// can audit the failure; only accepted ones contributed to the trie root.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct TxResult {
    pub accepted: bool,
    pub tx: ClientTransaction,
}

/// The transaction document of a block.
///
/// A view-change block carries no transactions; its payload is the
/// certificate that deposed the previous leader.
#[derive(Clone, Debug, PartialEq, Eq, Default, Encode, Decode)]
pub struct DataBody {
    pub tx_results: Vec<TxResult>,
    pub view_change: Option<crate::view_change::ViewChangeCertificate>,
}

impl DataBody {
    pub fn hash(&self) -> Hash {
        sha256(&self.encode())
    }
}

/// A complete block: header plus body.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Block {
    pub header: BlockHeader,
    pub body: DataBody,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::ChainId;
    use crate::test_utils::test_roster;

    fn header() -> BlockHeader {
        BlockHeader {
            index: 3,
            roster_id: Hash::of(b"roster"),
            prev_hashes: vec![Hash::of(b"prev")],
            data_hash: Hash::of(b"data"),
            trie_root: Hash::of(b"root"),
            timestamp_ns: 1_700_000_000_000,
            forward_links: Vec::new(),
            signature: None,
        }
    }

    #[test]
    fn header_hash_excludes_signature_and_links() {
        let h = header();
        let base = h.hash();

        let mut signed = h.clone();
        signed.signature = Some(CollectiveSignature {
            signature: BlsSignature([0u8; 96]),
            signers: SignerBitfield::new(4),
        });
        assert_eq!(base, signed.hash());

        let mut mutated = h;
        mutated.trie_root = Hash::of(b"other root");
        assert_ne!(base, mutated.hash());
    }

    #[test]
    fn collective_signature_threshold_enforced() {
        let (roster, keys) = test_roster(4);
        let chain = ChainId(Hash::of(b"chain"));
        let h = header();
        let msg = h.share_message(chain);

        // Two signers out of four is below threshold (3).
        let sigs: Vec<_> = keys[..2].iter().map(|k| k.sign(&msg)).collect();
        let mut bitmap = SignerBitfield::new(4);
        bitmap.set(0);
        bitmap.set(1);
        let cs = CollectiveSignature {
            signature: BlsSignature::aggregate(&sigs).unwrap(),
            signers: bitmap,
        };
        assert!(cs.verify(&roster, &msg).is_err());

        // Three signers meet it.
        let sigs: Vec<_> = keys[..3].iter().map(|k| k.sign(&msg)).collect();
        let mut bitmap = SignerBitfield::new(4);
        (0..3).for_each(|i| bitmap.set(i));
        let cs = CollectiveSignature {
            signature: BlsSignature::aggregate(&sigs).unwrap(),
            signers: bitmap,
        };
        assert!(cs.verify(&roster, &msg).is_ok());
    }
}
