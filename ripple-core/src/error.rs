//! Error types for the reactive runtime.
//!
//! Every fallible operation returns [`Result`]. Derivations return
//! `Result<T>` too, so a read inside a computed can use `?` and the error
//! travels down the graph to whoever reads next.

use std::error::Error as StdError;
use std::rc::Rc;

use thiserror::Error;

use crate::graph::NodeId;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors produced by the reactive runtime.
///
/// The type is `Clone` because a failed derivation caches its error and
/// hands a copy to every reader until it recomputes successfully.
#[derive(Debug, Clone, Error)]
pub enum ReactiveError {
    /// An operation needed an owner but none was active.
    #[error("no reactive owner is active")]
    NoOwner,

    /// A context lookup walked the whole owner chain without a match and
    /// the context has no default.
    #[error("context {0} was not provided and has no default")]
    ContextNotFound(u64),

    /// An async derivation has not produced a value yet.
    ///
    /// Load boundaries treat this as "show the fallback", not as a failure.
    #[error("value is not ready yet")]
    NotReady,

    /// The node was disposed together with its owner.
    #[error("reactive node {0} has been disposed")]
    Disposed(NodeId),

    /// A node was read while it was being evaluated.
    #[error("cycle detected while evaluating node {0}")]
    Cycle(NodeId),

    /// A flush kept producing new work past the configured iteration limit.
    #[error("flush did not settle after {0} iterations")]
    RunawayFlush(usize),

    /// A node held a value of a different type than its handle expects.
    #[error("reactive node {0} holds a value of an unexpected type")]
    TypeMismatch(NodeId),

    /// A derivation failed.
    #[error("{0}")]
    Derivation(Rc<dyn StdError>),
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

impl ReactiveError {
    /// Wrap an arbitrary error raised inside a derivation.
    pub fn derivation<E>(err: E) -> Self
    where
        E: StdError + 'static,
    {
        Self::Derivation(Rc::new(err))
    }

    /// Build a derivation error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::derivation(Message(message.into()))
    }

    /// Whether this is the "value not yet available" condition.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_errors_display_their_text() {
        let err = ReactiveError::msg("price feed offline");
        assert_eq!(err.to_string(), "price feed offline");
        assert!(!err.is_not_ready());
    }

    #[test]
    fn clones_share_the_underlying_error() {
        let err = ReactiveError::derivation(std::fmt::Error);
        let copy = err.clone();
        match (err, copy) {
            (ReactiveError::Derivation(a), ReactiveError::Derivation(b)) => {
                assert!(Rc::ptr_eq(&a, &b));
            }
            _ => panic!("expected derivation errors"),
        }
    }

    #[test]
    fn not_ready_is_distinct_from_failures() {
        assert!(ReactiveError::NotReady.is_not_ready());
        assert!(!ReactiveError::NoOwner.is_not_ready());
    }
}
