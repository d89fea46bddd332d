use super::*;

use crate::judy::node::{
    is_leaf_chunk, key_size_at, next_chunk_offset, NodeRef, Slot, CHUNK_BYTES, SPAN_BYTES,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Default)]
struct Census {
    cells: usize,
    linear: usize,
    radix: usize,
    span: usize,
}

/// Walk every reachable node and check the structural invariants.
fn validate_trie(t: &Judy) {
    let mut census = Census::default();
    validate_slot(t, t.root, 0, &mut census);

    assert_eq!(census.cells, t.len(), "reachable cells must match Judy::len");
    let stats = t.stats();
    assert_eq!(stats.live_linear, census.linear, "leaked or unreachable linear nodes");
    assert_eq!(stats.live_radix, census.radix, "leaked or unreachable radix tables");
    assert_eq!(stats.live_span, census.span, "leaked or unreachable span nodes");
}

fn validate_slot(t: &Judy, slot: Slot, off: usize, census: &mut Census) {
    let node = match slot {
        Slot::Empty => return,
        Slot::Cell(_) => panic!("cell reached at offset {off} outside a leaf entry"),
        Slot::Node(node) => node,
    };

    match node {
        NodeRef::Linear(id) => {
            census.linear += 1;
            let linear = t.arena.linear(id);
            assert!(!linear.is_empty(), "empty linear node left in the trie");
            assert!(linear.len() <= linear.capacity());
            assert_eq!(linear.key_size(), key_size_at(off), "key size must end on a chunk boundary");
            assert!(
                linear.keys().windows(2).all(|pair| pair[0] < pair[1]),
                "linear keys must be strictly increasing"
            );

            for (idx, &value) in linear.keys().iter().enumerate() {
                let raw = value.to_be_bytes();
                let (unused, bytes) = raw.split_at(CHUNK_BYTES - linear.key_size());
                assert!(unused.iter().all(|&b| b == 0), "chunk wider than its key size");
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                assert!(bytes[end..].iter().all(|&b| b == 0), "byte after terminator");

                match linear.slot(idx) {
                    Slot::Cell(_) => {
                        assert!(is_leaf_chunk(value), "cell under a non-leaf chunk");
                        census.cells += 1;
                    }
                    child => {
                        assert!(!is_leaf_chunk(value), "child under a leaf chunk");
                        assert!(!child.is_empty(), "empty slot in linear node");
                        validate_slot(t, child, next_chunk_offset(off), census);
                    }
                }
            }
        }
        NodeRef::Radix(outer) => {
            census.radix += 1;
            let table = t.arena.radix(outer);
            assert!(!table.is_empty(), "empty radix node left in the trie");

            for (hi, &entry) in table.slots.iter().enumerate() {
                let inner = match entry {
                    Slot::Empty => continue,
                    Slot::Node(NodeRef::Radix(inner)) => inner,
                    other => panic!("outer radix entry must be an inner table, got {other:?}"),
                };
                census.radix += 1;
                let inner_table = t.arena.radix(inner);
                assert!(!inner_table.is_empty(), "empty inner radix table");

                for (lo, &child) in inner_table.slots.iter().enumerate() {
                    let byte = hi * 16 + lo;
                    match child {
                        Slot::Empty => {}
                        Slot::Cell(_) => {
                            assert_eq!(byte, 0, "cell stored under a nonzero radix byte");
                            census.cells += 1;
                        }
                        child => {
                            assert_ne!(byte, 0, "child stored under the terminator byte");
                            validate_slot(t, child, off + 1, census);
                        }
                    }
                }
            }
        }
        NodeRef::Span(id) => {
            census.span += 1;
            assert_eq!(off % CHUNK_BYTES, 0, "span must start on a chunk boundary");
            let span = t.arena.span(id);
            assert!(!span.bytes().contains(&0));
            if span.is_leaf() {
                assert!(matches!(span.next, Slot::Cell(_)), "leaf span must hold a cell");
                census.cells += 1;
            } else {
                assert!(matches!(span.next, Slot::Node(_)), "full span must hold a child");
                validate_slot(t, span.next, off + SPAN_BYTES, census);
            }
        }
    }
}

#[derive(Clone, Debug)]
enum Op {
    Insert(Vec<u8>, u64),
    Remove(Vec<u8>),
    Get(Vec<u8>),
    Seek(Vec<u8>),
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    // Mostly a tiny alphabet so keys share long prefixes and force promotion,
    // radix splits and span splits; the rest covers every nonzero byte.
    let byte = prop_oneof![
        3 => b'a'..=b'c',
        1 => 1u8..=255,
    ];
    prop::collection::vec(byte, 0..=64)
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy();
    let op = prop_oneof![
        50 => (key.clone(), 1..u64::MAX).prop_map(|(k, v)| Op::Insert(k, v)),
        25 => key.clone().prop_map(Op::Remove),
        15 => key.clone().prop_map(Op::Get),
        10 => key.clone().prop_map(Op::Seek),
    ];
    prop::collection::vec(op, 0..=2000)
}

fn put(t: &mut Judy, key: &[u8], value: u64) -> Option<u64> {
    let cell = t.insert(key).unwrap();
    let old = (*cell != 0).then_some(*cell);
    *cell = value;
    old
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in ops_strategy()) {
        let mut t = Judy::open(64).unwrap();
        let mut m: BTreeMap<Vec<u8>, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let old_t = put(&mut t, &key, value);
                    let old_m = m.insert(key, value);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Remove(key) => {
                    let old_t = t.remove(&key);
                    let old_m = m.remove(key.as_slice());
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Get(key) => {
                    let got_t = t.get(&key);
                    let got_m = m.get(key.as_slice()).copied();
                    prop_assert_eq!(got_t, got_m);
                }
                Op::Seek(key) => {
                    let got_t = t.lookup_at_or_after(&key).copied().map(|v| (t.key(), v));
                    let got_m = m.range(key..).next().map(|(k, v)| (k.clone(), *v));
                    prop_assert_eq!(got_t, got_m);
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        validate_trie(&t);
        let got: Vec<(Vec<u8>, u64)> = t.iter().collect();
        let expected: Vec<(Vec<u8>, u64)> = m.into_iter().collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_backward_is_reverse_of_forward(keys in prop::collection::vec(key_strategy(), 0..300)) {
        let mut t = Judy::open(64).unwrap();
        for key in &keys {
            put(&mut t, key, 1);
        }
        validate_trie(&t);

        let forward: Vec<Vec<u8>> = t.iter().map(|(k, _)| k).collect();
        let mut backward = Vec::new();
        let mut cell = t.last().is_some();
        while cell {
            backward.push(t.key());
            cell = t.prev().is_some();
        }
        backward.reverse();
        prop_assert_eq!(&forward, &backward);

        let mut expected = keys.clone();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(forward, expected);
    }

    #[test]
    fn prop_delete_to_empty(keys in prop::collection::vec(key_strategy(), 0..300), seed in any::<u64>()) {
        use rand::rngs::StdRng;
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let mut t = Judy::open(64).unwrap();
        for key in &keys {
            put(&mut t, key, 1);
        }

        let mut order = keys.clone();
        order.sort();
        order.dedup();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        for key in &order {
            prop_assert_eq!(t.remove(key), Some(1));
        }

        prop_assert!(t.is_empty());
        prop_assert!(t.first().is_none());
        prop_assert!(t.root.is_empty());
        validate_trie(&t);
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

fn small_set() -> Vec<Vec<u8>> {
    vec![
        b"".to_vec(),
        b"a".to_vec(),
        b"b".to_vec(),
        b"aa".to_vec(),
        b"ab".to_vec(),
        b"ba".to_vec(),
        b"abcde".to_vec(),
    ]
}

#[test]
fn exhaustive_insert_order_small_set() {
    for_each_permutation(&small_set(), |perm| {
        let mut t = Judy::open(16).unwrap();
        let mut m: BTreeMap<Vec<u8>, u64> = BTreeMap::new();

        for (i, k) in perm.into_iter().enumerate() {
            let v = i as u64 + 1;
            assert_eq!(put(&mut t, &k, v), m.insert(k, v));
        }

        validate_trie(&t);
        let got: Vec<(Vec<u8>, u64)> = t.iter().collect();
        let expected: Vec<(Vec<u8>, u64)> = m.into_iter().collect();
        assert_eq!(got, expected);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys = small_set();

    for_each_permutation(&keys, |perm| {
        let mut t = Judy::open(16).unwrap();
        let mut m: BTreeMap<Vec<u8>, u64> = BTreeMap::new();
        for (i, k) in keys.iter().enumerate() {
            let v = i as u64 + 1;
            assert_eq!(put(&mut t, k, v), m.insert(k.clone(), v));
        }

        for k in perm {
            assert_eq!(t.remove(&k), m.remove(k.as_slice()));
            assert_eq!(t.len(), m.len());
            validate_trie(&t);
        }
        assert!(t.is_empty());
        assert!(t.root.is_empty());
    });
}
