#![cfg(test)]

// Property tests for ChainedHashMap kept inside the crate so they can use
// the internal invariant checker.

use crate::chained_hash_map::ChainedHashMap;
use crate::config::{TableConfig, MAX_LOAD_FACTOR, MIN_LOAD_FACTOR};
use crate::error::Error;
use crate::hashing::{DefaultKeyHasher, KeyHasher};
use crate::pair::Pair;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    InsertPair(usize, i32),
    Erase(usize),
    At(usize),
    Contains(String),
    Mutate(usize, i32),
    ApplyIf(char, i32),
    Iterate,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=40).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            3 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            1 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertPair(i, v)),
            2 => idx.clone().prop_map(OpI::Erase),
            1 => idx.clone().prop_map(OpI::At),
            1 => prop_oneof![contains_pool, "[a-z]{0,5}"].prop_map(OpI::Contains),
            1 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => (proptest::char::range('a', 'z'), any::<i32>()).prop_map(|(c, d)| OpI::ApplyIf(c, d)),
            1 => Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..120).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Runs `ops` against `sut` and a std HashMap model. Invariants checked:
// - Duplicate keys are rejected and leave the stored value in place.
// - `at`/`contains_key` parity with the model; erase returns the owned pair.
// - `apply_if` visits exactly the matching keys and mutates in place.
// - After every op: structural invariants hold, `len` matches, load <= 0.75.
// - After an erase that did not shrink: load >= 0.25 or capacity at floor.
fn run_against_model<H>(
    mut sut: ChainedHashMap<String, i32, H>,
    pool: &[String],
    ops: Vec<OpI>,
    floor: usize,
) -> Result<(), TestCaseError>
where
    H: KeyHasher<String>,
{
    let mut model: HashMap<String, i32> = HashMap::new();

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = pool[i].clone();
                let already = model.get(&k).copied();
                match sut.insert(k.clone(), v) {
                    Ok(()) => {
                        prop_assert!(already.is_none(), "insert must fail on duplicate");
                        model.insert(k, v);
                    }
                    Err(Error::DuplicateKey) => {
                        prop_assert!(already.is_some(), "duplicate error only when key exists");
                        prop_assert_eq!(sut.at(&k).copied(), already);
                    }
                    Err(e) => prop_assert!(false, "unexpected error: {}", e),
                }
            }
            OpI::InsertPair(i, v) => {
                let pair = Pair::new(pool[i].clone(), v);
                let already = model.contains_key(&pair.key);
                match sut.insert_pair(&pair) {
                    Ok(()) => {
                        prop_assert!(!already);
                        model.insert(pair.key, pair.value);
                    }
                    Err(Error::DuplicateKey) => prop_assert!(already),
                    Err(e) => prop_assert!(false, "unexpected error: {}", e),
                }
            }
            OpI::Erase(i) => {
                let k = &pool[i];
                let capacity_before = sut.capacity();
                match sut.erase(k) {
                    Ok((kk, vv)) => {
                        prop_assert_eq!(&kk, k);
                        let mv = model.remove(k).expect("present in model");
                        prop_assert_eq!(vv, mv);
                        if sut.capacity() == capacity_before {
                            prop_assert!(
                                sut.capacity() == floor || sut.load_factor() >= MIN_LOAD_FACTOR,
                                "load {} below minimum at capacity {}",
                                sut.load_factor(),
                                sut.capacity()
                            );
                        } else {
                            prop_assert_eq!(sut.capacity() * 2, capacity_before);
                        }
                    }
                    Err(Error::KeyNotFound) => {
                        prop_assert!(!model.contains_key(k));
                        prop_assert_eq!(sut.capacity(), capacity_before);
                    }
                    Err(e) => prop_assert!(false, "unexpected error: {}", e),
                }
            }
            OpI::At(i) => {
                let k = &pool[i];
                prop_assert_eq!(sut.at(k), model.get(k));
            }
            OpI::Contains(s) => {
                prop_assert_eq!(sut.contains_key(&s), model.contains_key(&s));
            }
            OpI::Mutate(i, d) => {
                let k = &pool[i];
                match (sut.at_mut(k), model.get_mut(k)) {
                    (Some(sv), Some(mv)) => {
                        *sv = sv.saturating_add(d);
                        *mv = mv.saturating_add(d);
                    }
                    (None, None) => {}
                    _ => prop_assert!(false, "at_mut presence differs from model"),
                }
            }
            OpI::ApplyIf(c, d) => {
                let n = sut.apply_if(|k| k.starts_with(c), |v| *v = v.saturating_add(d));
                let mut expected = 0;
                for (k, v) in model.iter_mut() {
                    if k.starts_with(c) {
                        *v = v.saturating_add(d);
                        expected += 1;
                    }
                }
                prop_assert_eq!(n, expected);
            }
            OpI::Iterate => {
                let s_keys: BTreeSet<_> = sut.iter().map(|(k, _)| k.clone()).collect();
                let m_keys: BTreeSet<_> = model.keys().cloned().collect();
                prop_assert_eq!(s_keys, m_keys);
                for (k, v) in sut.iter() {
                    prop_assert_eq!(Some(v), model.get(k));
                }
            }
        }

        prop_assert!(sut.invariants_hold());
        prop_assert!(sut.load_factor() <= MAX_LOAD_FACTOR);
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }
    Ok(())
}

// Property: state-machine equivalence against std::collections::HashMap
// with the default hasher.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let sut: ChainedHashMap<String, i32> = ChainedHashMap::new();
        run_against_model(sut, &pool, ops, 2)?;
    }
}

// Property: same invariants under worst-case collisions (every key hashes
// to 0), which puts every pair in bucket 0 and stresses bucket erase/shrink.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let sut = ChainedHashMap::with_hasher(|_: &String| 0u64);
        run_against_model(sut, &pool, ops, 2)?;
    }
}

// Property: same invariants with a small table and a one-bucket floor, so
// growth and shrink happen on almost every operation.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_single_bucket_floor((pool, ops) in arb_scenario()) {
        let cfg = TableConfig { initial_capacity: 1, min_capacity: 1 };
        let sut = ChainedHashMap::with_config(cfg, DefaultKeyHasher::default())
            .expect("valid config");
        run_against_model(sut, &pool, ops, 1)?;
    }
}

// Property: after any batch of distinct inserts the capacity is the
// smallest power of two >= 16 that keeps the load at or below 0.75.
proptest! {
    #[test]
    fn prop_growth_capacity_is_minimal(n in 0usize..600) {
        let mut m: ChainedHashMap<usize, usize> = ChainedHashMap::new();
        for k in 0..n {
            m.insert(k, k).expect("distinct keys");
        }
        let mut expected = 16usize;
        while n as f64 / expected as f64 > MAX_LOAD_FACTOR {
            expected *= 2;
        }
        prop_assert_eq!(m.capacity(), expected);
        prop_assert!(m.invariants_hold());
    }
}
