//! A partition: one arena plus the semaphores of the trees stored in it.

use parking_lot::{Mutex, MutexGuard};

use crate::arena::{Arena, SlabArena};
use crate::sem::SemTable;

/// Shared storage for any number of trees.
///
/// The arena is guarded by its own mutex; tree operations take the
/// tree's semaphore first and then hold the arena for their duration.
/// Holding the guard returned by [`Partition::arena`] while calling into
/// a tree stored here deadlocks.
pub struct Partition<A = SlabArena> {
    arena: Mutex<A>,
    sems: SemTable,
}

impl Partition<SlabArena> {
    /// A partition over an unbounded [`SlabArena`].
    pub fn new() -> Self {
        Self::with_arena(SlabArena::new())
    }
}

impl Default for Partition<SlabArena> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Arena> Partition<A> {
    pub fn with_arena(arena: A) -> Self {
        Self::with_parts(arena, SemTable::new())
    }

    pub fn with_parts(arena: A, sems: SemTable) -> Self {
        Self {
            arena: Mutex::new(arena),
            sems,
        }
    }

    /// Lock the arena, e.g. to allocate or release user data blocks.
    pub fn arena(&self) -> MutexGuard<'_, A> {
        self.arena.lock()
    }

    pub fn sems(&self) -> &SemTable {
        &self.sems
    }

    /// Number of blocks currently allocated in the arena.
    pub fn live_blocks(&self) -> usize {
        self.arena.lock().live()
    }

    pub fn into_arena(self) -> A {
        self.arena.into_inner()
    }
}
