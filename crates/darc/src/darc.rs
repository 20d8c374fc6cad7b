//! The darc document and rule evaluation.

use crate::expression::{parse_expression, Expression, ExpressionError};
use byzcoin_types::{sha256, Hash, Identity};
use parity_scale_codec::{Decode, Encode};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Rule every darc needs to delegate signing: `darc:X` in another darc's
/// expression means "whoever satisfies X's `_sign`".
pub const SIGN_RULE: &str = "_sign";

/// Rule gating the darc's own evolution.
pub const EVOLVE_RULE: &str = "_evolve";

/// Nested darc references are chased at most this deep.
const MAX_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum DarcError {
    #[error("ERR_UNKNOWN_RULE: no rule for action {0:?}")]
    UnknownRule(String),
    #[error("ERR_UNAUTHORIZED: signers do not satisfy rule {0:?}")]
    Unauthorized(String),
    #[error("bad rule expression: {0}")]
    BadExpression(#[from] ExpressionError),
    #[error("referenced darc {0} not found")]
    UnknownDarc(Hash),
    #[error("darc evolution violates the version chain")]
    BadEvolution,
}

/// Resolves the latest version of a darc by its base id.
pub trait DarcResolver {
    fn resolve(&self, base_id: &Hash) -> Option<Darc>;
}

/// A named rule set. Evolving produces a new version keyed by the same
/// `base_id`; superseded versions no longer authorize anything.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Darc {
    pub version: u64,
    pub description: Vec<u8>,
    /// Base id of the version chain. Zero on version 0, whose own id is the
    /// base id.
    pub base_id: Hash,
    /// Id of the previous version, zero on version 0.
    pub prev_hash: Hash,
    /// Action → rule expression source.
    pub rules: BTreeMap<String, String>,
}

impl Darc {
    /// A fresh version-0 darc.
    pub fn new(description: Vec<u8>, rules: BTreeMap<String, String>) -> Self {
        Self {
            version: 0,
            description,
            base_id: Hash::ZERO,
            prev_hash: Hash::ZERO,
            rules,
        }
    }

    /// A version-0 darc where `owner` holds every listed action plus
    /// `_sign` and `_evolve`. The usual genesis shape.
    pub fn with_owner(description: Vec<u8>, owner: &Identity, actions: &[&str]) -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(SIGN_RULE.to_string(), owner.to_string());
        rules.insert(EVOLVE_RULE.to_string(), owner.to_string());
        for action in actions {
            rules.insert(action.to_string(), owner.to_string());
        }
        Self::new(description, rules)
    }

    /// Content hash of this version.
    pub fn id(&self) -> Hash {
        sha256(&self.encode())
    }

    /// Id of the version chain: version 0's own id, carried forward by
    /// every evolution.
    pub fn base_id(&self) -> Hash {
        if self.version == 0 {
            self.id()
        } else {
            self.base_id
        }
    }

    /// Produce the next version with new rules, linked to this one.
    pub fn evolve(&self, description: Vec<u8>, rules: BTreeMap<String, String>) -> Darc {
        Darc {
            version: self.version + 1,
            description,
            base_id: self.base_id(),
            prev_hash: self.id(),
            rules,
        }
    }

    pub fn rule(&self, action: &str) -> Option<&str> {
        self.rules.get(action).map(String::as_str)
    }

    /// Check that `new` is a valid successor of `self` and that `signers`
    /// satisfy this version's `_evolve` rule.
    pub fn verify_evolution(
        &self,
        new: &Darc,
        signers: &[Identity],
        resolver: &dyn DarcResolver,
    ) -> Result<(), DarcError> {
        if new.version != self.version + 1
            || new.base_id != self.base_id()
            || new.prev_hash != self.id()
        {
            return Err(DarcError::BadEvolution);
        }
        self.check_authorization(EVOLVE_RULE, signers, resolver)
    }

    /// Evaluate the rule for `action` against the signer set.
    ///
    /// `darc:HEX` factors are chased through `resolver` with a visited set
    /// to break cycles and a depth bound of 16.
    pub fn check_authorization(
        &self,
        action: &str,
        signers: &[Identity],
        resolver: &dyn DarcResolver,
    ) -> Result<(), DarcError> {
        let rule = self
            .rule(action)
            .ok_or_else(|| DarcError::UnknownRule(action.to_string()))?;
        let expr = parse_expression(rule)?;
        let mut visited = HashSet::new();
        if evaluate(&expr, signers, resolver, &mut visited, 0)? {
            Ok(())
        } else {
            Err(DarcError::Unauthorized(action.to_string()))
        }
    }
}

fn evaluate(
    expr: &Expression,
    signers: &[Identity],
    resolver: &dyn DarcResolver,
    visited: &mut HashSet<Hash>,
    depth: usize,
) -> Result<bool, DarcError> {
    match expr {
        Expression::Identity(id @ Identity::Ed25519(_)) => Ok(signers.contains(id)),
        Expression::Identity(Identity::Darc(base)) => {
            let base = Hash(*base);
            if depth >= MAX_DEPTH || !visited.insert(base) {
                // Cycle or runaway nesting never authorizes.
                return Ok(false);
            }
            let referenced = resolver
                .resolve(&base)
                .ok_or(DarcError::UnknownDarc(base))?;
            match referenced.rule(SIGN_RULE) {
                Some(rule) => {
                    let sub = parse_expression(rule)?;
                    evaluate(&sub, signers, resolver, visited, depth + 1)
                }
                None => Ok(false),
            }
        }
        Expression::And(a, b) => {
            Ok(evaluate(a, signers, resolver, visited, depth)?
                && evaluate(b, signers, resolver, visited, depth)?)
        }
        Expression::Or(a, b) => {
            Ok(evaluate(a, signers, resolver, visited, depth)?
                || evaluate(b, signers, resolver, visited, depth)?)
        }
    }
}
