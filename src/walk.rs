//! Iterative navigation: children, siblings, and pre-order successors.
//!
//! Nothing here recurses. Every walk moves along parent links and child
//! slots, bounded by a `limit` node whose subtree it never leaves
//! (`None` meaning the whole tree).

use crate::arena::{Address, Arena};
use crate::error::Result;
use crate::node::NodeStore;

/// Child `order` of `addr`, or `None` past the array or in an empty slot.
pub(crate) fn child<A: Arena + ?Sized>(
    arena: &A,
    addr: Address,
    order: usize,
) -> Result<Option<Address>> {
    let node = arena.node(addr)?;
    Ok(arena.kids(node)?.get(order).copied().flatten())
}

/// The child that follows `addr` in its parent's array.
pub(crate) fn sibling<A: Arena + ?Sized>(arena: &A, addr: Address) -> Result<Option<Address>> {
    let node = arena.node(addr)?;
    match node.parent {
        Some(parent) => child(arena, parent, node.order() + 1),
        None => Ok(None),
    }
}

/// The next node after the subtree of `addr` in pre-order, never leaving
/// the subtree of `limit`.
///
/// Also returns the key-offset correction for the move: the summed key
/// lengths of the ancestors climbed past. Moving to a sibling costs
/// nothing since siblings share the same key prefix.
pub(crate) fn next_node<A: Arena + ?Sized>(
    arena: &A,
    addr: Address,
    limit: Option<Address>,
) -> Result<Option<(Address, usize)>> {
    let mut delta = 0;
    let mut cur = addr;
    loop {
        let node = arena.node(cur)?;
        if node.parent == limit {
            return Ok(None);
        }
        if let Some(next) = sibling(arena, cur)? {
            return Ok(Some((next, delta)));
        }
        // parent != limit, so it exists unless limit is a non-ancestor
        let Some(parent) = node.parent else {
            return Ok(None);
        };
        cur = parent;
        delta += arena.key_of(arena.node(cur)?)?.len();
    }
}

/// Pre-order cursor over a subtree.
pub(crate) struct PreOrder {
    next: Option<Address>,
    limit: Option<Address>,
}

impl PreOrder {
    /// Walk the whole tree below and including `root`.
    pub(crate) fn tree(root: Option<Address>) -> Self {
        Self {
            next: root,
            limit: None,
        }
    }

    /// Walk `addr` and everything below it.
    pub(crate) fn subtree<A: Arena + ?Sized>(arena: &A, addr: Address) -> Result<Self> {
        Ok(Self {
            next: Some(addr),
            limit: arena.node(addr)?.parent,
        })
    }

    /// Walk the proper descendants of `addr`.
    pub(crate) fn below<A: Arena + ?Sized>(arena: &A, addr: Address) -> Result<Self> {
        Ok(Self {
            next: child(arena, addr, 0)?,
            limit: arena.node(addr)?.parent,
        })
    }

    /// Yield the current node and step past it. The successor is computed
    /// before the caller sees the node, so callers may change anything but
    /// the tree's shape.
    pub(crate) fn step<A: Arena + ?Sized>(&mut self, arena: &A) -> Result<Option<Address>> {
        let Some(cur) = self.next else {
            return Ok(None);
        };
        self.next = match child(arena, cur, 0)? {
            Some(first) => Some(first),
            None => next_node(arena, cur, self.limit)?.map(|(n, _)| n),
        };
        Ok(Some(cur))
    }
}

/// Recompute `depth` for every descendant of `addr` from its parent's.
pub(crate) fn fix_depth<A: Arena + ?Sized>(arena: &mut A, addr: Address) -> Result<()> {
    let mut walk = PreOrder::below(&*arena, addr)?;
    while let Some(cur) = walk.step(&*arena)? {
        let Some(parent) = arena.node(cur)?.parent else {
            continue;
        };
        let depth = arena.node(parent)?.depth + 1;
        arena.node_mut(cur)?.depth = depth;
    }
    Ok(())
}
