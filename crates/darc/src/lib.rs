//! Distributed access-control documents (darcs).
//!
//! A darc is a named, evolvable set of rules mapping an action
//! (`spawn:coin`, `invoke:coin.transfer`, `_sign`, `_evolve`, ...) to a
//! boolean expression over signer identities and nested darc references.
//! Every state mutation on the ledger is gated by the darc governing the
//! target instance.

mod darc;
mod expression;

pub use darc::{Darc, DarcError, DarcResolver, EVOLVE_RULE, SIGN_RULE};
pub use expression::{parse_expression, Expression, ExpressionError};
