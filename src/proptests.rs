use super::*;

use crate::node::NodeStore;
use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Check every structural invariant of `tree` and return the stored
/// `(full key, data)` pairs sorted by key.
pub(crate) fn validate_tree<A: Arena>(
    psm: &Partition<A>,
    tree: RadixTree,
) -> Vec<(Vec<u8>, Address)> {
    let arena = psm.arena();
    let header = *arena.header(tree.address()).expect("tree record");

    let mut stack: Vec<(Address, Vec<u8>)> = Vec::new();
    if let Some(root) = header.root() {
        let n = arena.node(root).expect("root node");
        assert_eq!(n.parent(), None, "root must not have a parent");
        assert_eq!(n.depth(), 0, "root depth must be 0");
        stack.push((root, Vec::new()));
    }

    let mut stored = Vec::new();
    let mut nodes = 0usize;
    while let Some((addr, prefix)) = stack.pop() {
        nodes += 1;
        let node = *arena.node(addr).expect("node block");
        let fragment = arena.key_of(&node).expect("key block");
        if node.parent().is_some() {
            assert!(!fragment.is_empty(), "only the root may have an empty key");
        }
        let mut key = prefix;
        key.extend_from_slice(fragment);

        let kids = arena.kids(&node).expect("children block");
        assert_eq!(kids.len(), node.capacity(), "capacity must match array");
        let occupied = kids.iter().take_while(|k| k.is_some()).count();
        assert!(
            kids[occupied..].iter().all(Option::is_none),
            "children must form a contiguous prefix"
        );
        if occupied == 0 {
            assert!(node.user_data().is_some(), "leaf without data");
        }

        let mut firsts = HashSet::new();
        for (i, c) in kids[..occupied].iter().flatten().enumerate() {
            let cn = arena.node(*c).expect("child node");
            assert_eq!(cn.parent(), Some(addr), "child parent link");
            assert_eq!(cn.order(), i, "child order must match its slot");
            assert_eq!(cn.depth(), node.depth() + 1, "child depth");
            let first = arena.key_of(cn).expect("child key").first().copied();
            assert!(firsts.insert(first), "siblings must differ in first byte");
            stack.push((*c, key.clone()));
        }

        if let Some(d) = node.user_data() {
            stored.push((key, d));
        }
    }

    assert_eq!(nodes, header.stats().nodes, "node count must match stats");
    stored.sort_by(|a, b| a.0.cmp(&b.0));
    stored
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    // A small alphabet keeps keys colliding on prefixes.
    prop::collection::vec(prop::sample::select(b"abc~".to_vec()), 1..=6)
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 4)]
    Insert(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    #[proptest(weight = 2)]
    Replace(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    #[proptest(weight = 3)]
    Remove(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    #[proptest(weight = 3)]
    Find(#[proptest(strategy = "key_strategy()")] Vec<u8>),
}

fn release(arena: &mut SlabArena, addr: Address) {
    arena.free(addr);
}

fn wildcard_keys() -> impl Strategy<Value = Vec<Vec<u8>>> {
    // Shared tails and prefix keys on both sides of `ipn:`.
    let heads: Vec<&'static [u8]> = vec![&b"ipn:"[..], &b"ipn"[..], &b"ip"[..], &b"ipx:"[..], &b"dtn:"[..]];
    let head = prop::sample::select(heads);
    let tail = prop::collection::vec(prop::sample::select(b"12.".to_vec()), 0..4);
    let key = (head, tail).prop_map(|(head, tail)| [head, &tail[..]].concat());
    prop::collection::vec(key, 1..16)
}

/// `key` matches the query `ipn:~`: the marker takes a non-empty remainder.
fn matches_ipn_wildcard(key: &[u8]) -> bool {
    key.len() > 4 && key.starts_with(b"ipn:")
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in prop::collection::vec(any::<Op>(), 0..=300)) {
        let psm = Partition::new();
        let tree = RadixTree::create(&psm).unwrap();
        let mut m: BTreeMap<Vec<u8>, Address> = BTreeMap::new();
        let mut replace = |a: &mut SlabArena, slot: &mut Option<Address>, d: Address| {
            if let Some(old) = slot.replace(d) {
                a.free(old);
            }
            true
        };

        for op in ops {
            match op {
                Op::Insert(key) => {
                    let d = psm.arena().alloc(Block::Data(key.clone())).unwrap();
                    let got = tree.insert(&psm, &key, d, None, None);
                    if m.contains_key(&key) {
                        prop_assert_eq!(got, Err(RadixError::Duplicate));
                        psm.arena().free(d);
                    } else {
                        prop_assert_eq!(got, Ok(()));
                        m.insert(key, d);
                    }
                }
                Op::Replace(key) => {
                    let d = psm.arena().alloc(Block::Data(key.clone())).unwrap();
                    tree.insert(&psm, &key, d, Some(&mut replace), None).unwrap();
                    m.insert(key, d);
                }
                Op::Remove(key) => {
                    let removed = tree.remove(&psm, &key, Some(&mut release)).unwrap();
                    prop_assert_eq!(removed, m.remove(&key).is_some());
                }
                Op::Find(key) => {
                    let got = tree.find(&psm, &key, false).unwrap();
                    prop_assert_eq!(got, m.get(&key).copied());
                }
            }
        }

        let stored = validate_tree(&psm, tree);
        let expected: Vec<(Vec<u8>, Address)> = m.into_iter().collect();
        prop_assert_eq!(stored, expected);

        tree.destroy(&psm, Some(&mut release)).unwrap();
        prop_assert_eq!(psm.live_blocks(), 0);
        prop_assert!(psm.sems().is_empty());
    }

    #[test]
    fn prop_wildcard_query_reaches_every_branch(keys in wildcard_keys()) {
        let psm = Partition::new();
        let tree = RadixTree::create(&psm).unwrap();

        let mut stored: BTreeMap<Vec<u8>, Address> = BTreeMap::new();
        for key in keys {
            if stored.contains_key(&key) {
                continue;
            }
            let d = psm.arena().alloc(Block::Data(key.clone())).unwrap();
            tree.insert(&psm, &key, d, None, None).unwrap();
            stored.insert(key, d);
        }
        let expected: BTreeSet<Address> = stored
            .iter()
            .filter(|(k, _)| matches_ipn_wildcard(k))
            .map(|(_, d)| *d)
            .collect();

        let mut hits = Vec::new();
        tree.foreach_match(&psm, b"ipn:~", MatchFlags::FULL, |_, d| {
            hits.push(d);
            Walk::Continue
        })
        .unwrap();
        let unique: BTreeSet<Address> = hits.iter().flatten().copied().collect();
        prop_assert_eq!(unique.len(), hits.len(), "each key reported once");
        prop_assert_eq!(&unique, &expected);

        let found = tree.find(&psm, b"ipn:~", true).unwrap();
        match found {
            Some(d) => prop_assert!(expected.contains(&d)),
            None => prop_assert!(expected.is_empty()),
        }
        validate_tree(&psm, tree);
    }
}

/// Call `f` with every ordering of `items` (Heap's algorithm, iterative).
fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    let mut perm = items.to_vec();
    let mut counters = vec![0usize; perm.len()];
    f(perm.clone());

    let mut i = 1;
    while i < perm.len() {
        if counters[i] < i {
            let other = if i % 2 == 0 { 0 } else { counters[i] };
            perm.swap(other, i);
            f(perm.clone());
            counters[i] += 1;
            i = 1;
        } else {
            counters[i] = 0;
            i += 1;
        }
    }
}

#[test]
fn test_permutations_are_complete() {
    let mut seen = BTreeSet::new();
    for_each_permutation(&[1, 2, 3, 4], |perm| {
        seen.insert(perm);
    });
    assert_eq!(seen.len(), 24);
}

fn small_set() -> Vec<Vec<u8>> {
    vec![
        b"a".to_vec(),
        b"b".to_vec(),
        b"ab".to_vec(),
        b"abc".to_vec(),
        b"ba".to_vec(),
        b"b~".to_vec(),
    ]
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys = small_set();

    for_each_permutation(&keys, |perm| {
        let psm = Partition::new();
        let tree = RadixTree::create(&psm).unwrap();
        let mut m: BTreeMap<Vec<u8>, Address> = BTreeMap::new();

        for k in perm {
            let d = psm.arena().alloc(Block::Data(k.clone())).unwrap();
            tree.insert(&psm, &k, d, None, None).unwrap();
            m.insert(k, d);
        }

        let stored = validate_tree(&psm, tree);
        let expected: Vec<(Vec<u8>, Address)> = m.into_iter().collect();
        assert_eq!(stored, expected);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys = small_set();

    for_each_permutation(&keys, |perm| {
        let psm = Partition::new();
        let tree = RadixTree::create(&psm).unwrap();
        let mut m: BTreeMap<Vec<u8>, Address> = BTreeMap::new();
        for k in &keys {
            let d = psm.arena().alloc(Block::Data(k.clone())).unwrap();
            tree.insert(&psm, k, d, None, None).unwrap();
            m.insert(k.clone(), d);
        }

        for k in perm {
            assert!(tree.remove(&psm, &k, Some(&mut release)).unwrap());
            m.remove(&k);
            let stored = validate_tree(&psm, tree);
            assert_eq!(stored.len(), m.len());
            for (key, d) in &m {
                assert_eq!(tree.find(&psm, key, false).unwrap(), Some(*d));
            }
        }
        assert_eq!(tree.root(&psm).unwrap(), None);
        assert_eq!(tree.stats(&psm).unwrap().nodes, 0);
    });
}
