//! Handle-based arena for tree storage.
//!
//! Every tree record, node, key fragment and child array lives in an
//! [`Arena`] and is referred to by an [`Address`]. No native reference to
//! arena storage ever crosses the tree API; only addresses do.
//!
//! [`SlabArena`] is the default arena: a vector of slots with an
//! intrusive free list. Each slot carries a generation that is bumped on
//! free, so an address to a released block stops resolving even after
//! the slot is reused.

use std::fmt;
use std::num::NonZeroU64;

use smallvec::SmallVec;

use crate::node::{RadixNode, TreeHeader};

/// Inline capacity of a key fragment before it spills to the heap.
pub const KEY_INLINE: usize = 16;

/// Key fragment storage.
pub type KeyBytes = SmallVec<[u8; KEY_INLINE]>;

/// An opaque handle into an arena.
///
/// `Option<Address>` is the absent sentinel; it has the same size as
/// `Address` itself.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(NonZeroU64);

impl Address {
    #[inline]
    fn new(index: u32, generation: u32) -> Self {
        let raw = ((generation as u64) << 32) | (index as u64 + 1);
        // Low half is at least 1.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Rebuild an address from its raw integer form. Zero is absent.
    #[inline]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Raw integer form, never zero.
    #[inline]
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Raw form of an optional address, with 0 for absent.
    #[inline]
    pub fn raw_or_zero(addr: Option<Address>) -> u64 {
        addr.map_or(0, Address::get)
    }

    #[inline]
    fn index(self) -> Option<usize> {
        ((self.0.get() & 0xFFFF_FFFF) as usize).checked_sub(1)
    }

    #[inline]
    fn generation(self) -> u32 {
        (self.0.get() >> 32) as u32
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A typed block of arena storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    /// A tree record.
    Tree(TreeHeader),
    /// A tree node.
    Node(RadixNode),
    /// The key fragment owned by a node.
    Key(KeyBytes),
    /// A node's child array. Its length is the node's capacity.
    Children(Box<[Option<Address>]>),
    /// Caller-owned payload, typically what user-data addresses point at.
    Data(Vec<u8>),
}

impl Block {
    /// Short name of the block kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Block::Tree(_) => "tree",
            Block::Node(_) => "node",
            Block::Key(_) => "key",
            Block::Children(_) => "children",
            Block::Data(_) => "data",
        }
    }
}

/// The arena allocator contract.
///
/// Thread safety is the caller's business; the tree only ever touches an
/// arena through `&mut` obtained under [`crate::Partition`]'s mutex.
pub trait Arena {
    /// Store `block` and return its address, or `None` if the arena is
    /// exhausted.
    fn alloc(&mut self, block: Block) -> Option<Address>;

    /// Release the block at `addr` and hand it back. Unknown or stale
    /// addresses yield `None`.
    fn free(&mut self, addr: Address) -> Option<Block>;

    fn resolve(&self, addr: Address) -> Option<&Block>;

    fn resolve_mut(&mut self, addr: Address) -> Option<&mut Block>;

    /// Number of blocks currently allocated.
    fn live(&self) -> usize;
}

enum Slot {
    Occupied { generation: u32, block: Block },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Slab-backed [`Arena`].
pub struct SlabArena {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live: usize,
    limit: Option<usize>,
}

impl SlabArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            live: 0,
            limit: None,
        }
    }

    /// An arena that refuses to hold more than `max_live` blocks at once.
    pub fn with_limit(max_live: usize) -> Self {
        Self {
            limit: Some(max_live),
            ..Self::new()
        }
    }

    /// Change the live-block limit. `None` removes it.
    pub fn set_limit(&mut self, max_live: Option<usize>) {
        self.limit = max_live;
    }

    /// Number of slots ever created, occupied or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for SlabArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena for SlabArena {
    fn alloc(&mut self, block: Block) -> Option<Address> {
        if self.limit.is_some_and(|max| self.live >= max) {
            return None;
        }

        let (index, generation) = match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                let Slot::Vacant {
                    generation,
                    next_free,
                } = *slot
                else {
                    debug_assert!(false, "free list points at an occupied slot");
                    return None;
                };
                self.free_head = next_free;
                *slot = Slot::Occupied { generation, block };
                (index, generation)
            }
            None => {
                let index = u32::try_from(self.slots.len()).ok()?;
                if index == u32::MAX {
                    return None;
                }
                self.slots.push(Slot::Occupied {
                    generation: 0,
                    block,
                });
                (index, 0)
            }
        };

        self.live += 1;
        Some(Address::new(index, generation))
    }

    fn free(&mut self, addr: Address) -> Option<Block> {
        let index = addr.index()?;
        let slot = self.slots.get_mut(index)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == addr.generation() => {}
            _ => return None,
        }

        let vacant = Slot::Vacant {
            generation: addr.generation().wrapping_add(1),
            next_free: self.free_head,
        };
        let Slot::Occupied { block, .. } = std::mem::replace(slot, vacant) else {
            return None;
        };
        self.free_head = Some(index as u32);
        self.live -= 1;
        Some(block)
    }

    fn resolve(&self, addr: Address) -> Option<&Block> {
        match self.slots.get(addr.index()?)? {
            Slot::Occupied { generation, block } if *generation == addr.generation() => {
                Some(block)
            }
            _ => None,
        }
    }

    fn resolve_mut(&mut self, addr: Address) -> Option<&mut Block> {
        let generation = addr.generation();
        match self.slots.get_mut(addr.index()?)? {
            Slot::Occupied {
                generation: g,
                block,
            } if *g == generation => Some(block),
            _ => None,
        }
    }

    fn live(&self) -> usize {
        self.live
    }
}
