//! Node and tree records, and the storage operations on them.
//!
//! A node owns three arena blocks: the node record itself, its key
//! fragment (absent for an empty fragment) and its child array. The
//! child array is a fixed-capacity slice of addresses; occupied slots
//! form a contiguous prefix and the rest are `None`.

use tracing::warn;

use crate::arena::{Address, Arena, Block, KeyBytes};
use crate::error::{RadixError, Result};
use crate::sem::SemId;
use crate::Config;

/// Release callback for a user-data address.
pub type DeleteFn<'f, A> = dyn FnMut(&mut A, Address) + 'f;

/// Aggregate counters kept in the tree record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Nodes currently linked into the tree, split nodes included.
    pub nodes: usize,
}

/// The tree record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeHeader {
    pub(crate) root: Option<Address>,
    pub(crate) lock: SemId,
    pub(crate) stats: TreeStats,
    pub(crate) config: Config,
}

impl TreeHeader {
    pub fn root(&self) -> Option<Address> {
        self.root
    }

    pub fn stats(&self) -> TreeStats {
        self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// A node record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RadixNode {
    pub(crate) key: Option<Address>,
    pub(crate) children: Address,
    /// Capacity of the child array, not its occupancy.
    pub(crate) num_kids: u32,
    pub(crate) parent: Option<Address>,
    /// Slot of this node in its parent's child array.
    pub(crate) order: u32,
    pub(crate) depth: u32,
    pub(crate) user_data: Option<Address>,
}

impl RadixNode {
    pub fn parent(&self) -> Option<Address> {
        self.parent
    }

    pub fn order(&self) -> usize {
        self.order as usize
    }

    pub fn depth(&self) -> usize {
        self.depth as usize
    }

    pub fn user_data(&self) -> Option<Address> {
        self.user_data
    }

    pub fn capacity(&self) -> usize {
        self.num_kids as usize
    }
}

#[inline]
fn dangling(addr: Address, expected: &'static str) -> RadixError {
    RadixError::Dangling { addr, expected }
}

/// Typed views over an arena's blocks.
pub(crate) trait NodeStore: Arena {
    fn header(&self, addr: Address) -> Result<&TreeHeader> {
        match self.resolve(addr) {
            Some(Block::Tree(h)) => Ok(h),
            _ => Err(dangling(addr, "tree")),
        }
    }

    fn header_mut(&mut self, addr: Address) -> Result<&mut TreeHeader> {
        match self.resolve_mut(addr) {
            Some(Block::Tree(h)) => Ok(h),
            _ => Err(dangling(addr, "tree")),
        }
    }

    fn node(&self, addr: Address) -> Result<&RadixNode> {
        match self.resolve(addr) {
            Some(Block::Node(n)) => Ok(n),
            _ => Err(dangling(addr, "node")),
        }
    }

    fn node_mut(&mut self, addr: Address) -> Result<&mut RadixNode> {
        match self.resolve_mut(addr) {
            Some(Block::Node(n)) => Ok(n),
            _ => Err(dangling(addr, "node")),
        }
    }

    /// The key fragment of `node`; empty when it has none.
    fn key_of(&self, node: &RadixNode) -> Result<&[u8]> {
        let Some(addr) = node.key else {
            return Ok(&[]);
        };
        match self.resolve(addr) {
            Some(Block::Key(k)) => Ok(k.as_slice()),
            _ => Err(dangling(addr, "key")),
        }
    }

    fn kids(&self, node: &RadixNode) -> Result<&[Option<Address>]> {
        match self.resolve(node.children) {
            Some(Block::Children(c)) => Ok(&c[..]),
            _ => Err(dangling(node.children, "children")),
        }
    }

    fn kids_mut(&mut self, node: &RadixNode) -> Result<&mut [Option<Address>]> {
        match self.resolve_mut(node.children) {
            Some(Block::Children(c)) => Ok(&mut c[..]),
            _ => Err(dangling(node.children, "children")),
        }
    }
}

impl<A: Arena + ?Sized> NodeStore for A {}

fn alloc<A: Arena + ?Sized>(arena: &mut A, block: Block) -> Result<Address> {
    let kind = block.kind();
    arena.alloc(block).ok_or_else(|| {
        warn!(kind, "arena allocation failed");
        RadixError::OutOfMemory
    })
}

/// Allocate a key fragment block; `None` for an empty fragment.
pub(crate) fn alloc_key<A: Arena + ?Sized>(arena: &mut A, key: &[u8]) -> Result<Option<Address>> {
    if key.is_empty() {
        return Ok(None);
    }
    alloc(arena, Block::Key(KeyBytes::from_slice(key))).map(Some)
}

/// Allocate a detached node: key, empty child array of `capacity`, and
/// record. Nothing stays allocated if any step fails.
pub(crate) fn create_node<A: Arena + ?Sized>(
    arena: &mut A,
    key: &[u8],
    data: Option<Address>,
    capacity: u32,
) -> Result<Address> {
    let key = alloc_key(arena, key)?;

    let slots = vec![None; capacity as usize].into_boxed_slice();
    let children = match alloc(arena, Block::Children(slots)) {
        Ok(c) => c,
        Err(e) => {
            if let Some(k) = key {
                arena.free(k);
            }
            return Err(e);
        }
    };

    let node = RadixNode {
        key,
        children,
        num_kids: capacity,
        parent: None,
        order: 0,
        depth: 0,
        user_data: data,
    };
    match alloc(arena, Block::Node(node)) {
        Ok(addr) => Ok(addr),
        Err(e) => {
            arena.free(children);
            if let Some(k) = key {
                arena.free(k);
            }
            Err(e)
        }
    }
}

/// Release a node's blocks. The node must already be unlinked.
pub(crate) fn free_node<A: Arena + ?Sized>(arena: &mut A, addr: Address) -> Result<RadixNode> {
    let node = *arena.node(addr)?;
    arena.free(node.children);
    if let Some(k) = node.key {
        arena.free(k);
    }
    arena.free(addr);
    Ok(node)
}

/// Replace a node's child array with one `increment` slots larger.
pub(crate) fn grow_children<A: Arena + ?Sized>(
    arena: &mut A,
    addr: Address,
    increment: u32,
) -> Result<()> {
    let node = *arena.node(addr)?;
    let capacity = node.num_kids + increment;

    let mut slots = vec![None; capacity as usize];
    slots[..node.capacity()].copy_from_slice(arena.kids(&node)?);
    let children = alloc(arena, Block::Children(slots.into_boxed_slice()))?;

    arena.free(node.children);
    let n = arena.node_mut(addr)?;
    n.children = children;
    n.num_kids = capacity;
    Ok(())
}

/// First empty slot of a node's child array, if it has one.
pub(crate) fn free_slot<A: Arena + ?Sized>(arena: &A, addr: Address) -> Result<Option<usize>> {
    let node = arena.node(addr)?;
    Ok(arena.kids(node)?.iter().position(Option::is_none))
}

/// Put `child` into `parent`'s child array at `slot`, or at the first
/// free slot (growing the array when full) if `slot` is `None`. Sets the
/// child's parent, order and depth.
pub(crate) fn link_child<A: Arena + ?Sized>(
    arena: &mut A,
    parent: Address,
    child: Address,
    slot: Option<usize>,
    increment: u32,
) -> Result<()> {
    let order = match slot {
        Some(order) => order,
        None => match free_slot(arena, parent)? {
            Some(order) => order,
            None => {
                let order = arena.node(parent)?.capacity();
                grow_children(arena, parent, increment)?;
                order
            }
        },
    };

    let p = *arena.node(parent)?;
    debug_assert!(order < p.capacity(), "child slot out of range");
    let kids = arena.kids_mut(&p)?;
    let Some(entry) = kids.get_mut(order) else {
        return Err(dangling(p.children, "children"));
    };
    *entry = Some(child);

    let c = arena.node_mut(child)?;
    c.parent = Some(parent);
    c.order = order as u32;
    c.depth = p.depth + 1;
    Ok(())
}

/// Remove the child at `order`, shifting later children left and
/// renumbering them. Returns the removed child.
pub(crate) fn remove_child<A: Arena + ?Sized>(
    arena: &mut A,
    parent: Address,
    order: usize,
) -> Result<Option<Address>> {
    let p = *arena.node(parent)?;
    let kids = arena.kids_mut(&p)?;
    if order >= kids.len() {
        return Ok(None);
    }

    let removed = kids[order];
    let mut last = order;
    for i in order..kids.len() {
        if kids[i].is_none() {
            break;
        }
        kids[i] = kids.get(i + 1).copied().flatten();
        last = i;
    }
    debug_assert!(kids[last].is_none());

    for i in order..last {
        if let Some(moved) = arena.kids(&p)?[i] {
            arena.node_mut(moved)?.order = i as u32;
        }
    }
    Ok(removed)
}

pub(crate) fn is_leaf<A: Arena + ?Sized>(arena: &A, addr: Address) -> Result<bool> {
    let node = arena.node(addr)?;
    Ok(arena.kids(node)?.first().copied().flatten().is_none())
}

/// Unlink and free a leaf, handing its data to `del_fn`. Clears the
/// tree's root when the leaf was the root. Returns the leaf's parent.
pub(crate) fn delete_leaf<A: Arena>(
    arena: &mut A,
    header: Address,
    addr: Address,
    del_fn: Option<&mut DeleteFn<'_, A>>,
) -> Result<Option<Address>> {
    debug_assert!(is_leaf(arena, addr)?, "only leaves can be deleted");

    let node = *arena.node(addr)?;
    if let (Some(data), Some(del)) = (node.user_data, del_fn) {
        del(&mut *arena, data);
    }

    match node.parent {
        Some(parent) => {
            remove_child(arena, parent, node.order())?;
        }
        None => arena.header_mut(header)?.root = None,
    }

    free_node(arena, addr)?;
    let h = arena.header_mut(header)?;
    h.stats.nodes = h.stats.nodes.saturating_sub(1);
    Ok(node.parent)
}
