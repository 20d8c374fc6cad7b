//! Signer identities and the collective-signature backend.
//!
//! Two signature schemes coexist:
//!
//! - Clients sign instructions with Ed25519; their identities appear in darc
//!   rules as `ed25519:HEX`.
//! - Servers co-sign block headers and view-change certificates with
//!   BLS12-381, so signatures aggregate into one group signature plus a
//!   signer bitmap.

use blst::min_pk as bls;
use blst::BLST_ERROR;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use parity_scale_codec::{Decode, Encode};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

/// Domain separation tag for BLS signatures.
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Errors from key handling and signature verification.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("ERR_BAD_SIGNATURE: signature verification failed")]
    VerificationFailed,
    #[error("invalid identity string: {0}")]
    InvalidIdentity(String),
}

/// Errors from BLS aggregation.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("nothing to aggregate")]
    Empty,
    #[error("aggregation failed: {0}")]
    Backend(String),
}

// ═══════════════════════════════════════════════════════════════════════════
// Client identities (Ed25519)
// ═══════════════════════════════════════════════════════════════════════════

/// An identity appearing in darc rule expressions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode)]
pub enum Identity {
    /// `ed25519:HEX`, a client public key.
    Ed25519([u8; 32]),
    /// `darc:HEX`, whoever satisfies the `_sign` rule of the referenced darc.
    Darc([u8; 32]),
}

impl Identity {
    /// Parse the textual form used in rule expressions.
    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        let (scheme, hex_part) = s
            .split_once(':')
            .ok_or_else(|| CryptoError::InvalidIdentity(s.to_string()))?;
        let bytes = hex::decode(hex_part)
            .map_err(|_| CryptoError::InvalidIdentity(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidIdentity(s.to_string()))?;
        match scheme {
            "ed25519" => Ok(Identity::Ed25519(arr)),
            "darc" => Ok(Identity::Darc(arr)),
            _ => Err(CryptoError::InvalidIdentity(s.to_string())),
        }
    }

    /// Verify `signature` over `message` for an Ed25519 identity.
    ///
    /// Darc identities never verify directly; they are resolved through the
    /// referenced darc's `_sign` rule.
    pub fn verify(&self, message: &[u8], signature: &SignerSignature) -> Result<(), CryptoError> {
        match self {
            Identity::Ed25519(pk) => {
                let key =
                    VerifyingKey::from_bytes(pk).map_err(|_| CryptoError::InvalidPublicKey)?;
                let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
                key.verify(message, &sig)
                    .map_err(|_| CryptoError::VerificationFailed)
            }
            Identity::Darc(_) => Err(CryptoError::VerificationFailed),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Ed25519(pk) => write!(f, "ed25519:{}", hex::encode(pk)),
            Identity::Darc(id) => write!(f, "darc:{}", hex::encode(id)),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An Ed25519 public key of a client signer.
pub type SignerPublicKey = [u8; 32];

/// A detached Ed25519 signature over the canonical instruction hash.
#[derive(Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct SignerSignature(pub [u8; 64]);

impl fmt::Debug for SignerSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig:{}", &hex::encode(self.0)[..12])
    }
}

/// A client signing key.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
}

impl Signer {
    /// Generate a fresh random signer.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut seed);
        let signer = Self::from_seed(&seed);
        seed.zeroize();
        signer
    }

    /// Derive a signer deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::Ed25519(self.key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> SignerSignature {
        SignerSignature(self.key.sign(message).to_bytes())
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signer({})", self.identity())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Server keys (BLS12-381)
// ═══════════════════════════════════════════════════════════════════════════

/// A server's BLS public key (48 bytes compressed).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode)]
pub struct BlsPublicKey(pub [u8; 48]);

impl BlsPublicKey {
    fn to_backend(&self) -> Result<bls::PublicKey, CryptoError> {
        bls::PublicKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Verify a single (non-aggregated) signature.
    pub fn verify(&self, message: &[u8], signature: &BlsSignature) -> Result<(), CryptoError> {
        let pk = self.to_backend()?;
        let sig = signature.to_backend()?;
        match sig.verify(true, message, DST, &[], &pk, true) {
            BLST_ERROR::BLST_SUCCESS => Ok(()),
            _ => Err(CryptoError::VerificationFailed),
        }
    }
}

impl fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bls:{}", &hex::encode(self.0)[..12])
    }
}

/// A BLS signature (96 bytes compressed), possibly an aggregate.
#[derive(Clone, PartialEq, Eq, Encode, Decode)]
pub struct BlsSignature(pub [u8; 96]);

impl BlsSignature {
    fn to_backend(&self) -> Result<bls::Signature, CryptoError> {
        bls::Signature::from_bytes(&self.0).map_err(|_| CryptoError::InvalidSignature)
    }

    /// Aggregate signatures over the same message into one.
    pub fn aggregate(signatures: &[BlsSignature]) -> Result<BlsSignature, AggregateError> {
        if signatures.is_empty() {
            return Err(AggregateError::Empty);
        }
        let backend: Vec<bls::Signature> = signatures
            .iter()
            .map(|s| s.to_backend())
            .collect::<Result<_, _>>()
            .map_err(|e| AggregateError::Backend(e.to_string()))?;
        let refs: Vec<&bls::Signature> = backend.iter().collect();
        let agg = bls::AggregateSignature::aggregate(&refs, true)
            .map_err(|e| AggregateError::Backend(format!("{:?}", e)))?;
        Ok(BlsSignature(agg.to_signature().to_bytes()))
    }

    /// Verify an aggregate signature over one message against the given
    /// signer public keys.
    pub fn verify_aggregate(
        &self,
        message: &[u8],
        public_keys: &[BlsPublicKey],
    ) -> Result<(), CryptoError> {
        if public_keys.is_empty() {
            return Err(CryptoError::VerificationFailed);
        }
        let backend: Vec<bls::PublicKey> = public_keys
            .iter()
            .map(|pk| pk.to_backend())
            .collect::<Result<_, _>>()?;
        let refs: Vec<&bls::PublicKey> = backend.iter().collect();
        let agg_pk = bls::AggregatePublicKey::aggregate(&refs, true)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = self.to_backend()?;
        match sig.verify(
            true,
            message,
            DST,
            &[],
            &agg_pk.to_public_key(),
            true,
        ) {
            BLST_ERROR::BLST_SUCCESS => Ok(()),
            _ => Err(CryptoError::VerificationFailed),
        }
    }
}

impl fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blssig:{}", &hex::encode(self.0)[..12])
    }
}

/// A server's BLS keypair.
#[derive(Clone)]
pub struct BlsKeyPair {
    secret: bls::SecretKey,
    public: BlsPublicKey,
}

impl BlsKeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut ikm);
        let pair = Self::from_seed(&ikm);
        ikm.zeroize();
        pair
    }

    /// Derive a keypair deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let secret = bls::SecretKey::key_gen(seed, &[]).expect("seed is 32 bytes");
        let public = BlsPublicKey(secret.sk_to_pk().to_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> BlsPublicKey {
        self.public.clone()
    }

    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        BlsSignature(self.secret.sign(message, DST, &[]).to_bytes())
    }
}

impl fmt::Debug for BlsKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsKeyPair({:?})", self.public)
    }
}
