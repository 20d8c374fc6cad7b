//! 32-byte hash primitive.

use parity_scale_codec::{Decode, Encode};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode)]
pub struct Hash(pub [u8; 32]);

/// Error decoding a hash from hex.
#[derive(Debug, Error)]
pub enum HexError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("expected 32 bytes, got {0}")]
    WrongLength(usize),
}

impl Hash {
    /// The all-zero hash. Used as the absent/genesis marker.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Hash arbitrary bytes with SHA-256.
    pub fn of(data: &[u8]) -> Self {
        sha256(data)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HexError::WrongLength(bytes.len()))?;
        Ok(Hash(arr))
    }

    /// Bit `i` of the digest, most-significant first. Used for trie paths.
    pub fn bit(&self, i: usize) -> bool {
        debug_assert!(i < 256);
        self.0[i / 8] & (0x80 >> (i % 8)) != 0
    }
}

/// SHA-256 over a byte slice.
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let h = Hash::of(b"byzcoin");
        let parsed = Hash::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn bad_hex_rejected() {
        assert!(Hash::from_hex("zz").is_err());
        assert!(Hash::from_hex("aabb").is_err());
    }

    #[test]
    fn bit_extraction() {
        let h = Hash([0x80; 32]);
        assert!(h.bit(0));
        assert!(!h.bit(1));
        assert!(h.bit(8));
    }
}
