//! The radix tree: public API and the lookup/insert/split algorithms.
//!
//! Every operation takes the tree's semaphore, then the partition's arena,
//! and holds both until it returns. All walks are iterative.

use std::ops::BitOr;

use parking_lot::MutexGuard;
use tracing::{debug, trace, warn};

use crate::arena::{Address, Arena, Block};
use crate::error::{RadixError, Result};
use crate::matching::{classify, MatchKind};
use crate::node::{
    alloc_key, create_node, delete_leaf, free_node, is_leaf, link_child, DeleteFn, NodeStore,
    TreeHeader, TreeStats,
};
use crate::partition::Partition;
use crate::sem::SemGuard;
use crate::walk::{child, fix_depth, next_node, sibling, PreOrder};
use crate::Config;

/// Merge/transform callback for [`RadixTree::insert`].
///
/// Receives the arena, the slot being filled (holding the existing data
/// on a duplicate key, `None` otherwise) and the data being inserted.
/// Returning `false` aborts the insert.
pub type InsertFn<'f, A> = dyn FnMut(&mut A, &mut Option<Address>, Address) -> bool + 'f;

/// Callback verdict for walks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Walk {
    Continue,
    Stop,
}

/// Which matches [`RadixTree::foreach_match`] reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MatchFlags(u8);

impl MatchFlags {
    /// Nodes whose key ends the query exactly, and everything below a
    /// wildcard.
    pub const FULL: MatchFlags = MatchFlags(0b01);
    /// Ancestors whose whole fragment is a proper prefix of the query.
    pub const PARTIAL: MatchFlags = MatchFlags(0b10);
    pub const ALL: MatchFlags = MatchFlags(0b11);

    pub const fn empty() -> Self {
        MatchFlags(0)
    }

    pub const fn contains(self, other: MatchFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MatchFlags {
    type Output = MatchFlags;

    fn bitor(self, rhs: MatchFlags) -> MatchFlags {
        MatchFlags(self.0 | rhs.0)
    }
}

// =============================================================================
// Locking
// =============================================================================

/// The arena and tree lock held for one operation. The arena is released
/// before the semaphore.
struct Session<'p, A> {
    arena: MutexGuard<'p, A>,
    header: Address,
    _lock: SemGuard<'p>,
}

fn open<A: Arena>(psm: &Partition<A>, header: Address) -> Result<Session<'_, A>> {
    let lock = psm.arena().header(header)?.lock;
    let guard = psm.sems().acquire(lock).map_err(|_| {
        warn!(tree = %header, lock = %lock, "tree lock ended while waiting");
        RadixError::LockEnded(lock)
    })?;

    let arena = psm.arena();
    // The tree may have been destroyed while we queued.
    arena.header(header)?;
    Ok(Session {
        arena,
        header,
        _lock: guard,
    })
}

// =============================================================================
// Lookup
// =============================================================================

/// Move past the subtree of `addr`, correcting the key offset.
fn skip<A: Arena>(arena: &A, addr: Address, offset: &mut usize) -> Result<Option<Address>> {
    Ok(next_node(arena, addr, None)?.map(|(next, delta)| {
        *offset = offset.saturating_sub(delta);
        next
    }))
}

// A wildcard stops the comparison at a node, whichever side holds the
// marker. Every key in that node's subtree shares the compared prefix, so
// all of them match, split nodes and shorter keys included.

fn first_data<A: Arena>(arena: &A, addr: Address) -> Result<Option<Address>> {
    let mut walk = PreOrder::subtree(arena, addr)?;
    while let Some(n) = walk.step(arena)? {
        if let Some(data) = arena.node(n)?.user_data {
            return Ok(Some(data));
        }
    }
    Ok(None)
}

fn report_subtree<A, F>(arena: &mut A, addr: Address, match_fn: &mut F) -> Result<Walk>
where
    A: Arena,
    F: FnMut(&mut A, Option<Address>) -> Walk,
{
    let mut walk = PreOrder::subtree(&*arena, addr)?;
    while let Some(n) = walk.step(&*arena)? {
        let data = arena.node(n)?.user_data;
        if data.is_some() && match_fn(&mut *arena, data) == Walk::Stop {
            return Ok(Walk::Stop);
        }
    }
    Ok(Walk::Continue)
}

fn find_in<A: Arena>(
    arena: &A,
    header: Address,
    key: &[u8],
    wildcard: bool,
) -> Result<Option<Address>> {
    let h = arena.header(header)?;
    let marker = wildcard.then_some(h.config.wildcard);

    let mut offset = 0;
    let mut cur = h.root;
    while let Some(addr) = cur {
        let node = arena.node(addr)?;
        let node_key = arena.key_of(node)?;
        let m = classify(node_key, &key[offset..], marker);

        cur = match m.kind {
            MatchKind::Full => return Ok(node.user_data),
            MatchKind::Wildcard => {
                if let Some(found) = first_data(arena, addr)? {
                    return Ok(Some(found));
                }
                skip(arena, addr, &mut offset)?
            }
            MatchKind::Partial => match child(arena, addr, 0)? {
                // Only the first child is tried; its siblings are reached
                // through the walk.
                Some(first) if offset + node_key.len() < key.len() => {
                    offset += node_key.len();
                    Some(first)
                }
                _ => skip(arena, addr, &mut offset)?,
            },
            MatchKind::Subset | MatchKind::None => skip(arena, addr, &mut offset)?,
        };
    }
    Ok(None)
}

fn foreach_match_in<A, F>(
    arena: &mut A,
    header: Address,
    key: &[u8],
    flags: MatchFlags,
    mut match_fn: F,
) -> Result<()>
where
    A: Arena,
    F: FnMut(&mut A, Option<Address>) -> Walk,
{
    let h = *arena.header(header)?;
    let marker = Some(h.config.wildcard);

    let mut offset = 0;
    let mut cur = h.root;
    while let Some(addr) = cur {
        let node = *arena.node(addr)?;
        let (m, key_len) = {
            let node_key = arena.key_of(&node)?;
            (classify(node_key, &key[offset..], marker), node_key.len())
        };

        cur = match m.kind {
            MatchKind::Full => {
                // Split nodes carry no data and are not reported.
                if flags.contains(MatchFlags::FULL)
                    && node.user_data.is_some()
                    && match_fn(&mut *arena, node.user_data) == Walk::Stop
                {
                    return Ok(());
                }
                skip(&*arena, addr, &mut offset)?
            }
            MatchKind::Wildcard => {
                if flags.contains(MatchFlags::FULL)
                    && report_subtree(arena, addr, &mut match_fn)? == Walk::Stop
                {
                    return Ok(());
                }
                skip(&*arena, addr, &mut offset)?
            }
            MatchKind::Partial => {
                if flags.contains(MatchFlags::PARTIAL)
                    && match_fn(&mut *arena, node.user_data) == Walk::Stop
                {
                    return Ok(());
                }
                match child(&*arena, addr, 0)? {
                    Some(first) if offset + key_len < key.len() => {
                        offset += key_len;
                        Some(first)
                    }
                    _ => skip(&*arena, addr, &mut offset)?,
                }
            }
            MatchKind::Subset | MatchKind::None => skip(&*arena, addr, &mut offset)?,
        };
    }
    Ok(())
}

// =============================================================================
// Insert
// =============================================================================

/// Where descent for a key stops, and how.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Terminal {
    node: Option<Address>,
    kind: MatchKind,
    /// Bytes of the key consumed up to and including the match at `node`.
    key_idx: usize,
    /// Where the match ends inside `node`'s own fragment.
    node_idx: usize,
}

fn locate<A: Arena>(arena: &A, header: Address, key: &[u8]) -> Result<Terminal> {
    let Some(mut addr) = arena.header(header)?.root else {
        return Ok(Terminal {
            node: None,
            kind: MatchKind::None,
            key_idx: 0,
            node_idx: 0,
        });
    };

    let mut key_idx = 0;
    loop {
        let node = arena.node(addr)?;
        let m = classify(arena.key_of(node)?, &key[key_idx..], None);

        match m.kind {
            MatchKind::Full | MatchKind::Wildcard | MatchKind::Subset => {
                return Ok(Terminal {
                    node: Some(addr),
                    kind: m.kind,
                    key_idx: key_idx + m.index,
                    node_idx: m.index,
                });
            }
            MatchKind::Partial => {
                key_idx += m.index;
                match child(arena, addr, 0)? {
                    Some(first) if key_idx < key.len() => addr = first,
                    _ => {
                        return Ok(Terminal {
                            node: Some(addr),
                            kind: MatchKind::Partial,
                            key_idx,
                            node_idx: m.index,
                        });
                    }
                }
            }
            MatchKind::None => {
                if let Some(next) = sibling(arena, addr)? {
                    addr = next;
                    continue;
                }
                return Ok(match node.parent {
                    // The parent matched partially on the way down.
                    Some(parent) => Terminal {
                        node: Some(parent),
                        kind: MatchKind::Partial,
                        key_idx,
                        node_idx: arena.key_of(arena.node(parent)?)?.len(),
                    },
                    // Nothing shares a first byte with the root: split the
                    // root at 0 so the key can hang beside it.
                    None => Terminal {
                        node: Some(addr),
                        kind: MatchKind::Subset,
                        key_idx,
                        node_idx: 0,
                    },
                });
            }
        }
    }
}

/// Run the insert callback against an empty slot.
fn transform<A: Arena>(
    arena: &mut A,
    data: Address,
    ins_fn: Option<&mut InsertFn<'_, A>>,
) -> Result<Address> {
    let Some(ins) = ins_fn else {
        return Ok(data);
    };
    let mut slot = None;
    if !ins(&mut *arena, &mut slot, data) {
        return Err(RadixError::Rejected);
    }
    slot.ok_or(RadixError::Rejected)
}

/// A new node holding `suffix` under `parent`, or as the root of an empty
/// tree.
fn attach_new<A: Arena>(
    arena: &mut A,
    header: Address,
    parent: Option<Address>,
    suffix: &[u8],
    data: Address,
    config: &Config,
) -> Result<()> {
    debug_assert!(!suffix.is_empty());
    let node = create_node(arena, suffix, Some(data), config.default_children)?;

    match parent {
        Some(parent) => {
            if let Err(e) = link_child(arena, parent, node, None, config.child_increment) {
                free_node(arena, node)?;
                return Err(e);
            }
        }
        None => arena.header_mut(header)?.root = Some(node),
    }

    arena.header_mut(header)?.stats.nodes += 1;
    Ok(())
}

/// Split `split` after `offset` bytes of its fragment into a data-less
/// parent holding the shared prefix and `split` holding the rest, then
/// add `suffix` beside it (or give `data` to the new parent when `suffix`
/// is empty).
///
/// All allocation happens before the tree is touched.
fn split_insert<A: Arena>(
    arena: &mut A,
    header: Address,
    split: Address,
    offset: usize,
    suffix: &[u8],
    data: Address,
    config: &Config,
) -> Result<()> {
    let n = *arena.node(split)?;
    let split_key = arena.key_of(&n)?.to_vec();
    debug_assert!(offset <= split_key.len());

    let parent = create_node(arena, &split_key[..offset], None, config.default_children)?;
    let rest = match alloc_key(arena, &split_key[offset..]) {
        Ok(rest) => rest,
        Err(e) => {
            free_node(arena, parent)?;
            return Err(e);
        }
    };
    let fresh = if suffix.is_empty() {
        None
    } else {
        match create_node(arena, suffix, Some(data), config.default_children) {
            Ok(fresh) => Some(fresh),
            Err(e) => {
                if let Some(rest) = rest {
                    arena.free(rest);
                }
                free_node(arena, parent)?;
                return Err(e);
            }
        }
    };

    match n.parent {
        Some(grandparent) => {
            link_child(arena, grandparent, parent, Some(n.order()), config.child_increment)?
        }
        None => arena.header_mut(header)?.root = Some(parent),
    }

    if let Some(old) = n.key {
        arena.free(old);
    }
    arena.node_mut(split)?.key = rest;
    link_child(arena, parent, split, Some(0), config.child_increment)?;
    fix_depth(arena, split)?;

    match fresh {
        // default_children >= 2, so this never grows.
        Some(fresh) => link_child(arena, parent, fresh, None, config.child_increment)?,
        None => arena.node_mut(parent)?.user_data = Some(data),
    }

    let h = arena.header_mut(header)?;
    h.stats.nodes += 1 + usize::from(fresh.is_some());
    debug!(
        tree = %header,
        prefix = %String::from_utf8_lossy(&split_key[..offset]),
        at = offset,
        "split node"
    );
    Ok(())
}

/// Delete data-less leaves from `addr` upward.
fn prune<A: Arena>(arena: &mut A, header: Address, addr: Address) -> Result<()> {
    let mut cur = Some(addr);
    while let Some(a) = cur {
        if arena.node(a)?.user_data.is_some() || !is_leaf(arena, a)? {
            break;
        }
        cur = delete_leaf(arena, header, a, None)?;
    }
    Ok(())
}

fn insert_in<A: Arena>(
    arena: &mut A,
    header: Address,
    key: &[u8],
    data: Address,
    ins_fn: Option<&mut InsertFn<'_, A>>,
    del_fn: Option<&mut DeleteFn<'_, A>>,
) -> Result<()> {
    let term = locate(arena, header, key)?;
    let config = arena.header(header)?.config;

    if let (MatchKind::Full, Some(node)) = (term.kind, term.node) {
        let existing = arena.node(node)?.user_data;
        return match ins_fn {
            Some(ins) => {
                let mut slot = existing;
                if !ins(&mut *arena, &mut slot, data) {
                    return Err(RadixError::Rejected);
                }
                arena.node_mut(node)?.user_data = slot;
                prune(arena, header, node)
            }
            // Left behind by a split: take the data.
            None if existing.is_none() => {
                arena.node_mut(node)?.user_data = Some(data);
                Ok(())
            }
            None => Err(RadixError::Duplicate),
        };
    }

    let stored = transform(arena, data, ins_fn)?;
    let suffix = &key[term.key_idx..];
    let result = match (term.kind, term.node) {
        (MatchKind::Subset | MatchKind::Wildcard, Some(node)) => {
            split_insert(arena, header, node, term.node_idx, suffix, stored, &config)
        }
        (_, parent) => attach_new(arena, header, parent, suffix, stored, &config),
    };

    if result.is_err() && stored != data {
        if let Some(del) = del_fn {
            del(&mut *arena, stored);
        }
    }
    result
}

// =============================================================================
// Whole-tree walks
// =============================================================================

fn clear<A: Arena>(
    arena: &mut A,
    header: Address,
    mut del_fn: Option<&mut DeleteFn<'_, A>>,
) -> Result<()> {
    let mut cur = arena.header(header)?.root;
    while let Some(addr) = cur {
        cur = if is_leaf(arena, addr)? {
            delete_leaf(arena, header, addr, del_fn.as_deref_mut())?
        } else {
            child(arena, addr, 0)?
        };
    }
    Ok(())
}

fn print_in<A: Arena>(arena: &A, header: Address, buf: &mut [u8]) -> Result<usize> {
    let mut walk = PreOrder::tree(arena.header(header)?.root);
    let mut written = 0;
    while written < buf.len() {
        let Some(addr) = walk.step(arena)? else {
            break;
        };
        let node = arena.node(addr)?;
        let line = format!(
            "{:indent$}[{}]({}->{}) [{}]\n",
            "",
            String::from_utf8_lossy(arena.key_of(node)?),
            Address::raw_or_zero(node.parent),
            addr,
            Address::raw_or_zero(node.user_data),
            indent = node.depth(),
        );
        let n = line.len().min(buf.len() - written);
        buf[written..written + n].copy_from_slice(&line.as_bytes()[..n]);
        written += n;
    }
    Ok(written)
}

// =============================================================================
// Public API
// =============================================================================

/// Handle to a radix tree stored in a [`Partition`].
///
/// Keys are byte strings; values are opaque [`Address`]es the tree never
/// dereferences. The handle is `Copy`: any number of threads may hold it,
/// and each operation serializes on the tree's fair lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RadixTree {
    header: Address,
}

impl RadixTree {
    /// Create an empty tree with the default [`Config`].
    pub fn create<A: Arena>(psm: &Partition<A>) -> Result<Self> {
        Self::create_with(psm, Config::default())
    }

    pub fn create_with<A: Arena>(psm: &Partition<A>, config: Config) -> Result<Self> {
        config.validate()?;

        let lock = psm.sems().create().ok_or_else(|| {
            warn!("can't create semaphore for radix tree");
            RadixError::NoSemaphore
        })?;

        let header = TreeHeader {
            root: None,
            lock,
            stats: TreeStats::default(),
            config,
        };
        let Some(addr) = psm.arena().alloc(Block::Tree(header)) else {
            psm.sems().delete(lock);
            warn!("can't allocate space for radix tree");
            return Err(RadixError::OutOfMemory);
        };

        debug!(tree = %addr, lock = %lock, "created radix tree");
        Ok(Self { header: addr })
    }

    /// Re-open a tree from the address of its record, e.g. one stored in
    /// another structure in the same partition.
    pub fn from_address(header: Address) -> Self {
        Self { header }
    }

    pub fn address(&self) -> Address {
        self.header
    }

    /// Free every node, passing each stored data address to `del_fn`,
    /// then the tree record and its lock. Threads queued on the lock fail
    /// with [`RadixError::LockEnded`].
    pub fn destroy<A: Arena>(
        self,
        psm: &Partition<A>,
        del_fn: Option<&mut DeleteFn<'_, A>>,
    ) -> Result<()> {
        let lock = {
            let mut s = open(psm, self.header)?;
            let arena = &mut *s.arena;
            clear(arena, self.header, del_fn)?;
            let lock = arena.header(self.header)?.lock;
            arena.free(self.header);
            lock
        };

        psm.sems().end(lock);
        psm.sems().delete(lock);
        debug!(tree = %self.header, "destroyed radix tree");
        Ok(())
    }

    /// Data stored under exactly `key`.
    ///
    /// With `wildcard` set, a marker in either the stored key or `key`
    /// matches any remainder; the result is then the first data in
    /// pre-order below the node where the marker was met, skipping
    /// data-less split nodes. An exact match found first wins, even when
    /// it carries no data.
    pub fn find<A: Arena>(
        &self,
        psm: &Partition<A>,
        key: &[u8],
        wildcard: bool,
    ) -> Result<Option<Address>> {
        if key.is_empty() {
            return Ok(None);
        }
        let s = open(psm, self.header)?;
        let found = find_in(&*s.arena, self.header, key, wildcard)?;
        trace!(tree = %self.header, found = found.is_some(), "find");
        Ok(found)
    }

    /// Store `data` under `key`.
    ///
    /// Without `ins_fn` a key that already has data fails with
    /// [`RadixError::Duplicate`]. With it, the callback decides what the
    /// slot holds; for a duplicate it sees the existing data. If the tree
    /// can't be updated after `ins_fn` produced a different address,
    /// `del_fn` gets that address back.
    pub fn insert<A: Arena>(
        &self,
        psm: &Partition<A>,
        key: &[u8],
        data: Address,
        ins_fn: Option<&mut InsertFn<'_, A>>,
        del_fn: Option<&mut DeleteFn<'_, A>>,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(RadixError::EmptyKey);
        }
        let mut s = open(psm, self.header)?;
        let result = insert_in(&mut *s.arena, self.header, key, data, ins_fn, del_fn);
        trace!(tree = %self.header, ok = result.is_ok(), "insert");
        result
    }

    /// Remove the data stored under exactly `key`, handing it to `del_fn`,
    /// and delete the nodes that no longer lead to any data. Returns
    /// whether the key was present.
    pub fn remove<A: Arena>(
        &self,
        psm: &Partition<A>,
        key: &[u8],
        del_fn: Option<&mut DeleteFn<'_, A>>,
    ) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }
        let mut s = open(psm, self.header)?;
        let arena = &mut *s.arena;

        let term = locate(arena, self.header, key)?;
        let (MatchKind::Full, Some(node)) = (term.kind, term.node) else {
            return Ok(false);
        };
        let Some(data) = arena.node_mut(node)?.user_data.take() else {
            return Ok(false);
        };
        if let Some(del) = del_fn {
            del(&mut *arena, data);
        }
        prune(arena, self.header, node)?;
        Ok(true)
    }

    /// Visit every node in pre-order, data-less split nodes included.
    pub fn foreach<A, F>(&self, psm: &Partition<A>, mut visit: F) -> Result<()>
    where
        A: Arena,
        F: FnMut(Option<Address>) -> Walk,
    {
        let s = open(psm, self.header)?;
        let arena = &*s.arena;
        let mut walk = PreOrder::tree(arena.header(self.header)?.root);
        while let Some(addr) = walk.step(arena)? {
            if visit(arena.node(addr)?.user_data) == Walk::Stop {
                break;
            }
        }
        Ok(())
    }

    /// Report the nodes `key` matches, with wildcards honored.
    ///
    /// With [`MatchFlags::FULL`], `match_fn` sees the data of every node at
    /// which the key ends exactly, and of every node below one where a
    /// wildcard was met. With
    /// [`MatchFlags::PARTIAL`], it also sees every ancestor passed on the
    /// way down, data or not. An empty key reports nothing.
    pub fn foreach_match<A, F>(
        &self,
        psm: &Partition<A>,
        key: &[u8],
        flags: MatchFlags,
        match_fn: F,
    ) -> Result<()>
    where
        A: Arena,
        F: FnMut(&mut A, Option<Address>) -> Walk,
    {
        if key.is_empty() {
            return Ok(());
        }
        let mut s = open(psm, self.header)?;
        foreach_match_in(&mut *s.arena, self.header, key, flags, match_fn)
    }

    /// Write one line per node into `buf`, in pre-order:
    ///
    /// ```text
    /// <depth spaces>[<key>](<parent>-><node>) [<data>]
    /// ```
    ///
    /// Absent addresses print as 0. Output stops when `buf` is full;
    /// returns the number of bytes written.
    pub fn pretty_print<A: Arena>(&self, psm: &Partition<A>, buf: &mut [u8]) -> Result<usize> {
        let s = open(psm, self.header)?;
        print_in(&*s.arena, self.header, buf)
    }

    pub fn stats<A: Arena>(&self, psm: &Partition<A>) -> Result<TreeStats> {
        let s = open(psm, self.header)?;
        Ok(s.arena.header(self.header)?.stats)
    }

    pub fn config<A: Arena>(&self, psm: &Partition<A>) -> Result<Config> {
        let s = open(psm, self.header)?;
        Ok(s.arena.header(self.header)?.config)
    }

    pub fn root<A: Arena>(&self, psm: &Partition<A>) -> Result<Option<Address>> {
        let s = open(psm, self.header)?;
        Ok(s.arena.header(self.header)?.root)
    }
}
