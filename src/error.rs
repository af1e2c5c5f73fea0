//! Error types for radix tree operations.

use thiserror::Error;

use crate::arena::Address;
use crate::sem::SemId;

/// Result type alias using [`RadixError`].
pub type Result<T> = std::result::Result<T, RadixError>;

/// Errors that can occur while creating, mutating, or walking a tree.
///
/// [`RadixError::Duplicate`] and [`RadixError::Rejected`] are logical
/// outcomes of an insert; everything else is a system error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RadixError {
    #[error("key must not be empty")]
    EmptyKey,

    #[error("arena allocation failed")]
    OutOfMemory,

    #[error("no semaphore available for the tree lock")]
    NoSemaphore,

    #[error("key already present")]
    Duplicate,

    #[error("insert callback declined the value")]
    Rejected,

    #[error("address {addr} does not resolve to a {expected} block")]
    Dangling {
        addr: Address,
        expected: &'static str,
    },

    #[error("tree lock {0} was ended")]
    LockEnded(SemId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl RadixError {
    /// True for failures of the arena, the lock, or the tree's own
    /// bookkeeping, as opposed to a declined or duplicate insert.
    pub fn is_system(&self) -> bool {
        !matches!(self, RadixError::Duplicate | RadixError::Rejected)
    }
}
