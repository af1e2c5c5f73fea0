//! # shm-radix
//!
//! An arena-backed radix tree that indexes string identifiers (endpoint
//! IDs, node names, service patterns) and maps them to opaque data
//! handles.
//!
//! Every piece of the tree lives as a block in an [`Arena`] and refers to
//! other blocks by [`Address`], so the whole structure can sit in a shared
//! region and be reopened from the address of its record. Operations on a
//! tree are serialized by a fair FIFO lock from the [`Partition`]'s
//! [`SemTable`]. Keys may carry a wildcard marker (`~` by default) that
//! matches any remainder during wildcard lookups.
//!
//! ## Example
//!
//! ```rust
//! use shm_radix::{Address, Arena, Block, MatchFlags, Partition, RadixTree, SlabArena, Walk};
//!
//! let psm = Partition::new();
//! let tree = RadixTree::create(&psm).unwrap();
//!
//! let data = psm.arena().alloc(Block::Data(b"route".to_vec())).unwrap();
//! tree.insert(&psm, b"ipn:~", data, None, None).unwrap();
//!
//! assert_eq!(tree.find(&psm, b"ipn:12.1", true).unwrap(), Some(data));
//! assert_eq!(tree.find(&psm, b"ipn:12.1", false).unwrap(), None);
//!
//! let mut hits = 0;
//! tree.foreach_match(&psm, b"ipn:12.1", MatchFlags::FULL, |_, _| {
//!     hits += 1;
//!     Walk::Continue
//! })
//! .unwrap();
//! assert_eq!(hits, 1);
//!
//! let mut release = |arena: &mut SlabArena, d: Address| {
//!     arena.free(d);
//! };
//! tree.destroy(&psm, Some(&mut release)).unwrap();
//! assert_eq!(psm.live_blocks(), 0);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

mod arena;
mod error;
mod matching;
mod node;
mod partition;
mod sem;
mod tree;
mod walk;

pub use arena::{Address, Arena, Block, KeyBytes, SlabArena};
pub use error::{RadixError, Result};
pub use matching::{classify, Match, MatchKind};
pub use node::{DeleteFn, RadixNode, TreeHeader, TreeStats};
pub use partition::Partition;
pub use sem::{Ended, SemGuard, SemId, SemTable, DEFAULT_MAX_SEMAPHORES};
pub use tree::{InsertFn, MatchFlags, RadixTree, Walk};

// =============================================================================
// Configuration
// =============================================================================

/// Child slots allocated with every node.
pub const DEFAULT_CHILDREN: u32 = 4;
/// Slots added when a full child array grows.
pub const CHILD_INCREMENT: u32 = 4;
/// Byte that matches any remainder of a key in wildcard lookups.
pub const PREFIX_WILDCARD: u8 = b'~';

/// Per-tree tuning, fixed at creation and stored in the tree record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub default_children: u32,
    pub child_increment: u32,
    pub wildcard: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_children: DEFAULT_CHILDREN,
            child_increment: CHILD_INCREMENT,
            wildcard: PREFIX_WILDCARD,
        }
    }
}

impl Config {
    /// A split parent takes two children at once, so nodes start with at
    /// least two slots.
    pub fn validate(&self) -> Result<()> {
        if self.default_children < 2 {
            return Err(RadixError::InvalidConfig("default_children must be at least 2"));
        }
        if self.child_increment == 0 {
            return Err(RadixError::InvalidConfig("child_increment must be positive"));
        }
        Ok(())
    }
}


#[cfg(test)]
mod proptests;
