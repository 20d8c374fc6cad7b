//! Domain-separated signing messages.
//!
//! Every signature in the system covers a message prefixed by a domain tag,
//! so a signature produced for one purpose can never be replayed for another.

use crate::hash::Hash;
use crate::identifiers::ChainId;

/// Domain tag for server co-signatures over block headers.
pub const DOMAIN_BLOCK_SHARE: &[u8] = b"byzcoin/block-share/v1";

/// Domain tag for view-change requests and certificates.
pub const DOMAIN_VIEW_CHANGE: &[u8] = b"byzcoin/view-change/v1";

/// Domain tag for client signatures over instruction hashes.
pub const DOMAIN_INSTRUCTION: &[u8] = b"byzcoin/instruction/v1";

/// Message a server signs to co-sign a block header.
pub fn block_share_message(chain_id: ChainId, index: u64, header_hash: &Hash) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN_BLOCK_SHARE.len() + 32 + 8 + 32);
    msg.extend_from_slice(DOMAIN_BLOCK_SHARE);
    msg.extend_from_slice(chain_id.0.as_bytes());
    msg.extend_from_slice(&index.to_le_bytes());
    msg.extend_from_slice(header_hash.as_bytes());
    msg
}

/// Message a server signs to request (and later certify) a view change.
pub fn view_change_message(chain_id: ChainId, block_id: &Hash, leader_index: u32) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN_VIEW_CHANGE.len() + 32 + 32 + 4);
    msg.extend_from_slice(DOMAIN_VIEW_CHANGE);
    msg.extend_from_slice(chain_id.0.as_bytes());
    msg.extend_from_slice(block_id.as_bytes());
    msg.extend_from_slice(&leader_index.to_le_bytes());
    msg
}

/// Message a client signs for one instruction.
pub fn instruction_message(instruction_hash: &Hash) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN_INSTRUCTION.len() + 32);
    msg.extend_from_slice(DOMAIN_INSTRUCTION);
    msg.extend_from_slice(instruction_hash.as_bytes());
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_do_not_collide() {
        let chain = ChainId(Hash::of(b"chain"));
        let h = Hash::of(b"payload");
        let a = block_share_message(chain, 1, &h);
        let b = view_change_message(chain, &h, 1);
        assert_ne!(a, b);
    }
}
