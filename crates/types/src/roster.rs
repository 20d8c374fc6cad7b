//! Roster: the ordered set of servers maintaining a chain.

use crate::crypto::BlsPublicKey;
use crate::hash::{sha256, Hash};
use crate::identifiers::NodeIndex;
use parity_scale_codec::{Decode, Encode};

/// One server: its collective-signing public key and network address.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ServerIdentity {
    pub public_key: BlsPublicKey,
    pub address: String,
}

impl ServerIdentity {
    pub fn new(public_key: BlsPublicKey, address: String) -> Self {
        Self {
            public_key,
            address,
        }
    }
}

/// An ordered list of server identities, content-addressed by hash.
///
/// The order is significant: leader rotation, signer bitmaps and view-change
/// certificates all index into it.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Roster {
    list: Vec<ServerIdentity>,
}

impl Roster {
    pub fn new(list: Vec<ServerIdentity>) -> Self {
        Self { list }
    }

    /// Content hash identifying this roster.
    pub fn id(&self) -> Hash {
        sha256(&self.encode())
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn list(&self) -> &[ServerIdentity] {
        &self.list
    }

    pub fn get(&self, index: NodeIndex) -> Option<&ServerIdentity> {
        self.list.get(index as usize)
    }

    /// Index of a server by public key.
    pub fn index_of(&self, public_key: &BlsPublicKey) -> Option<NodeIndex> {
        self.list
            .iter()
            .position(|s| &s.public_key == public_key)
            .map(|i| i as NodeIndex)
    }

    /// Leader of view `v`: member at `v mod n`.
    pub fn leader(&self, leader_index: NodeIndex) -> &ServerIdentity {
        &self.list[leader_index as usize % self.list.len()]
    }

    /// The commit threshold: more than two-thirds of the roster.
    pub fn threshold(&self) -> usize {
        self.list.len() * 2 / 3 + 1
    }

    /// Public keys in roster order.
    pub fn public_keys(&self) -> Vec<BlsPublicKey> {
        self.list.iter().map(|s| s.public_key.clone()).collect()
    }

    /// Maximum number of Byzantine members tolerated: `f = ⌊(n-1)/3⌋`.
    pub fn max_faulty(&self) -> usize {
        (self.list.len().saturating_sub(1)) / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_roster;

    #[test]
    fn id_changes_with_membership() {
        let (r4, _) = test_roster(4);
        let (r5, _) = test_roster(5);
        assert_ne!(r4.id(), r5.id());
        assert_eq!(r4.id(), r4.clone().id());
    }

    #[test]
    fn threshold_is_two_thirds_plus_one() {
        let (r4, _) = test_roster(4);
        assert_eq!(r4.threshold(), 3);
        let (r7, _) = test_roster(7);
        assert_eq!(r7.threshold(), 5);
        let (r3, _) = test_roster(3);
        assert_eq!(r3.threshold(), 3);
    }

    #[test]
    fn leader_wraps_modulo_n() {
        let (r, _) = test_roster(4);
        assert_eq!(r.leader(0), &r.list()[0]);
        assert_eq!(r.leader(5), &r.list()[1]);
    }

    #[test]
    fn max_faulty() {
        let (r4, _) = test_roster(4);
        assert_eq!(r4.max_faulty(), 1);
        let (r7, _) = test_roster(7);
        assert_eq!(r7.max_faulty(), 2);
    }
}
