//! ChainedHashMap: separately-chained table over `DynArray` buckets.
//!
//! The table is split in two layers. `Buckets` owns the structure (bucket
//! index, `len`, capacity floor) and never calls user code except the key
//! comparison handed to `locate`. `ChainedHashMap` adds the hash function
//! and the debug reentrancy guard, and is the only layer that runs
//! caller-supplied closures.

use crate::config::{load_factor, TableConfig, GROWTH_FACTOR, MAX_LOAD_FACTOR, MIN_LOAD_FACTOR};
use crate::dyn_array::{grown, DynArray};
use crate::error::{Error, Result};
use crate::hashing::{bucket_index, DefaultKeyHasher, KeyHasher};
use crate::pair::Pair;
use crate::reentrancy::DebugReentrancy;
use core::borrow::Borrow;
use core::fmt;
use core::mem;
use log::{debug, trace, warn};

/// Stored pair plus the hash of its key, computed once on insert.
#[derive(Clone, Debug)]
struct Entry<K, V> {
    hash: u64,
    pair: Pair<K, V>,
}

type Bucket<K, V> = Option<DynArray<Entry<K, V>>>;

/// (bucket index, position inside the bucket)
type Slot = (usize, usize);

#[derive(Clone, Debug)]
struct Buckets<K, V> {
    slots: Vec<Bucket<K, V>>,
    len: usize,
    min_capacity: usize,
}

impl<K, V> Buckets<K, V> {
    fn new(capacity: usize, min_capacity: usize) -> Self {
        Self {
            slots: core::iter::repeat_with(|| None).take(capacity).collect(),
            len: 0,
            min_capacity,
        }
    }

    fn try_new(capacity: usize, min_capacity: usize) -> Result<Self> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            len: 0,
            min_capacity,
        })
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn locate<F>(&self, hash: u64, mut is_key: F) -> Option<Slot>
    where
        F: FnMut(&K) -> bool,
    {
        let index = bucket_index(hash, self.capacity());
        let bucket = self.slots[index].as_ref()?;
        bucket
            .position(|e| e.hash == hash && is_key(&e.pair.key))
            .map(|pos| (index, pos))
    }

    fn entry(&self, (index, pos): Slot) -> Option<&Entry<K, V>> {
        self.slots[index].as_ref()?.at(pos)
    }

    fn entry_mut(&mut self, (index, pos): Slot) -> Option<&mut Entry<K, V>> {
        self.slots[index].as_mut()?.at_mut(pos)
    }

    fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry<K, V>> {
        self.slots.iter_mut().flatten().flat_map(|b| b.iter_mut())
    }

    /// Inserts an entry whose key is known to be absent, growing first if
    /// the new length would exceed the maximum load factor.
    fn insert_new(&mut self, hash: u64, pair: Pair<K, V>) -> Result<()> {
        let new_len = self.len + 1;
        if load_factor(new_len, self.capacity()) > MAX_LOAD_FACTOR {
            let doubled = grown(self.capacity())?;
            if let Err(e) = self.rehash(doubled, None) {
                warn!("insert rolled back: growth to {} buckets failed: {}", doubled, e);
                return Err(e);
            }
        }

        let index = bucket_index(hash, self.capacity());
        let entry = Entry { hash, pair };
        let pushed = match self.slots[index].as_mut() {
            Some(bucket) => bucket.push_distinct(entry).map(drop),
            // A new bucket is only installed once it holds the entry.
            None => DynArray::with_expected_len(1).map(|mut bucket| {
                trace!("allocating bucket {}", index);
                bucket.place(entry);
                self.slots[index] = Some(bucket);
            }),
        };
        if let Err(e) = pushed {
            warn!("insert rolled back: bucket {} push failed: {}", index, e);
            return Err(e);
        }
        self.len = new_len;
        Ok(())
    }

    /// Removes the entry at `slot`, shrinking first if the new length would
    /// fall below the minimum load factor.
    fn remove(&mut self, slot: Slot) -> Result<Pair<K, V>> {
        let new_len = self.len - 1;
        let capacity = self.capacity();
        if capacity > self.min_capacity && load_factor(new_len, capacity) < MIN_LOAD_FACTOR {
            let shrunk = (capacity / GROWTH_FACTOR).max(self.min_capacity);
            let entry = match self.rehash(shrunk, Some(slot)) {
                Ok(entry) => entry.ok_or(Error::KeyNotFound)?,
                Err(e) => {
                    warn!("erase rolled back: shrink to {} buckets failed: {}", shrunk, e);
                    return Err(e);
                }
            };
            self.len = new_len;
            return Ok(entry.pair);
        }

        let (index, pos) = slot;
        let bucket = self.slots[index].as_mut().ok_or(Error::KeyNotFound)?;
        let entry = bucket.erase(pos).map_err(|e| {
            warn!("erase rolled back: bucket {} shrink failed: {}", index, e);
            e
        })?;
        if bucket.is_empty() {
            trace!("releasing bucket {}", index);
            self.slots[index] = None;
        }
        self.len = new_len;
        Ok(entry.pair)
    }

    /// Rebuilds the index with `new_capacity` buckets, leaving out the entry
    /// at `exclude` (which is returned).
    ///
    /// Every buffer the new index needs is reserved before any entry moves.
    /// On allocation failure the staged index is dropped and `self` is
    /// untouched.
    fn rehash(&mut self, new_capacity: usize, exclude: Option<Slot>) -> Result<Option<Entry<K, V>>> {
        debug_assert!(new_capacity.is_power_of_two());
        debug!(
            "rehash: {} -> {} buckets, {} entries",
            self.capacity(),
            new_capacity,
            self.len
        );

        let mut counts: Vec<usize> = Vec::new();
        counts.try_reserve_exact(new_capacity)?;
        counts.resize(new_capacity, 0);
        for (index, bucket) in self.slots.iter().enumerate() {
            let Some(bucket) = bucket else { continue };
            for (pos, entry) in bucket.iter().enumerate() {
                if exclude != Some((index, pos)) {
                    counts[bucket_index(entry.hash, new_capacity)] += 1;
                }
            }
        }

        let mut staged: Vec<Bucket<K, V>> = Vec::new();
        staged.try_reserve_exact(new_capacity)?;
        for &n in &counts {
            staged.push(if n == 0 {
                None
            } else {
                Some(DynArray::with_expected_len(n)?)
            });
        }

        // All allocations done; nothing below can fail.
        let mut excluded = None;
        for (index, bucket) in mem::take(&mut self.slots).into_iter().enumerate() {
            let Some(bucket) = bucket else { continue };
            for (pos, entry) in bucket.into_iter().enumerate() {
                if exclude == Some((index, pos)) {
                    excluded = Some(entry);
                    continue;
                }
                let target = bucket_index(entry.hash, new_capacity);
                debug_assert!(staged[target].is_some());
                if let Some(bucket) = staged[target].as_mut() {
                    bucket.place(entry);
                }
            }
        }
        self.slots = staged;
        Ok(excluded)
    }
}

/// A unique-key hash map with separate chaining.
///
/// Buckets are `DynArray`s created on first use; the bucket count is a power
/// of two that doubles when the load factor would exceed 0.75 and halves
/// (down to a floor) when it would drop below 0.25. Inserting an existing key
/// fails instead of overwriting.
///
/// Mutating operations roll back on allocation failure: an `Err` leaves
/// every stored pair and `len` as they were. An insert whose growth rehash
/// completed before the bucket push failed keeps the larger bucket count;
/// otherwise the bucket index is untouched too.
pub struct ChainedHashMap<K, V, H = DefaultKeyHasher> {
    hasher: H,
    table: Buckets<K, V>,
    reentrancy: DebugReentrancy,
}

impl<K, V> ChainedHashMap<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(DefaultKeyHasher::default())
    }
}

impl<K, V> Default for ChainedHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, H> ChainedHashMap<K, V, H> {
    /// Empty map with the default `TableConfig` and the given hash function.
    pub fn with_hasher(hasher: H) -> Self {
        let config = TableConfig::default();
        Self {
            hasher,
            table: Buckets::new(config.initial_capacity, config.min_capacity),
            reentrancy: DebugReentrancy::new(),
        }
    }

    /// Empty map with a validated `TableConfig`.
    pub fn with_config(config: TableConfig, hasher: H) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            hasher,
            table: Buckets::try_new(config.initial_capacity, config.min_capacity)?,
            reentrancy: DebugReentrancy::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.table.len
    }

    pub fn is_empty(&self) -> bool {
        self.table.len == 0
    }

    /// Number of buckets. Always a power of two.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// `len / capacity`.
    pub fn load_factor(&self) -> f64 {
        load_factor(self.table.len, self.table.capacity())
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Iterates over `(key, value)` in unspecified order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            buckets: self.table.slots.iter(),
            current: Default::default(),
            remaining: self.table.len,
        }
    }

    /// Iterates over `(key, &mut value)` in unspecified order.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            buckets: self.table.slots.iter_mut(),
            current: Default::default(),
            remaining: self.table.len,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// Calls `value_mutator` in place on every value whose key satisfies
    /// `key_predicate` and returns how many values were visited.
    ///
    /// Pairs are never moved, added or removed.
    pub fn apply_if<P, F>(&mut self, mut key_predicate: P, mut value_mutator: F) -> usize
    where
        P: FnMut(&K) -> bool,
        F: FnMut(&mut V),
    {
        let _g = self.reentrancy.enter();
        let mut count = 0;
        for entry in self.table.entries_mut() {
            if key_predicate(&entry.pair.key) {
                value_mutator(&mut entry.pair.value);
                count += 1;
            }
        }
        count
    }
}

impl<K, V, H> ChainedHashMap<K, V, H>
where
    K: Eq,
{
    /// Inserts `key -> value`.
    ///
    /// Fails with `Error::DuplicateKey` if the key is present (the stored
    /// value is kept), or with an allocation error if growing the table or
    /// the bucket fails. On failure `key` and `value` are dropped.
    pub fn insert(&mut self, key: K, value: V) -> Result<()>
    where
        H: KeyHasher<K>,
    {
        let _g = self.reentrancy.enter();
        let hash = self.hasher.hash_key(&key);
        if self.table.locate(hash, |k| *k == key).is_some() {
            return Err(Error::DuplicateKey);
        }
        self.table.insert_new(hash, Pair::new(key, value))
    }

    /// Inserts a copy of `pair`; the caller keeps the original.
    pub fn insert_pair(&mut self, pair: &Pair<K, V>) -> Result<()>
    where
        K: Clone,
        V: Clone,
        H: KeyHasher<K>,
    {
        let _g = self.reentrancy.enter();
        let hash = self.hasher.hash_key(&pair.key);
        if self.table.locate(hash, |k| *k == pair.key).is_some() {
            return Err(Error::DuplicateKey);
        }
        self.table.insert_new(hash, pair.clone())
    }

    /// The value stored under `key`.
    pub fn at<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        H: KeyHasher<Q>,
    {
        let _g = self.reentrancy.enter();
        let hash = self.hasher.hash_key(key);
        let slot = self.table.locate(hash, |k| k.borrow() == key)?;
        self.table.entry(slot).map(|e| &e.pair.value)
    }

    pub fn at_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        H: KeyHasher<Q>,
    {
        let _g = self.reentrancy.enter();
        let hash = self.hasher.hash_key(key);
        let slot = self.table.locate(hash, |k| k.borrow() == key)?;
        self.table.entry_mut(slot).map(|e| &mut e.pair.value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        H: KeyHasher<Q>,
    {
        let _g = self.reentrancy.enter();
        let hash = self.hasher.hash_key(key);
        self.table.locate(hash, |k| k.borrow() == key).is_some()
    }

    /// Removes `key` and returns the owned pair.
    ///
    /// Fails with `Error::KeyNotFound` if the key is absent, or with an
    /// allocation error if the shrink cannot be staged; either way the map
    /// is unchanged.
    pub fn erase<Q>(&mut self, key: &Q) -> Result<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        H: KeyHasher<Q>,
    {
        let _g = self.reentrancy.enter();
        let hash = self.hasher.hash_key(key);
        let slot = self
            .table
            .locate(hash, |k| k.borrow() == key)
            .ok_or(Error::KeyNotFound)?;
        self.table.remove(slot).map(Pair::into_parts)
    }
}

#[cfg(test)]
impl<K, V, H> ChainedHashMap<K, V, H>
where
    K: Eq,
    H: KeyHasher<K>,
{
    /// Structural invariants; used by unit and property tests.
    pub(crate) fn invariants_hold(&self) -> bool {
        let t = &self.table;
        let capacity = t.capacity();
        let power_of_two = capacity.is_power_of_two() && capacity >= t.min_capacity;
        let placed = t.slots.iter().enumerate().all(|(i, b)| {
            b.iter()
                .flatten()
                .all(|e| bucket_index(e.hash, capacity) == i)
        });
        let hashes = t
            .slots
            .iter()
            .flatten()
            .flatten()
            .all(|e| e.hash == self.hasher.hash_key(&e.pair.key));
        let counted = t.slots.iter().flatten().map(|b| b.len()).sum::<usize>() == t.len;
        let no_empty_buckets = t.slots.iter().flatten().all(|b| !b.is_empty());
        let unique = t.slots.iter().flatten().all(|b| {
            b.iter()
                .enumerate()
                .all(|(i, e)| b.iter().skip(i + 1).all(|o| o.pair.key != e.pair.key))
        });
        let bounded = self.load_factor() <= MAX_LOAD_FACTOR;
        power_of_two && placed && hashes && counted && no_empty_buckets && unique && bounded
    }
}

impl<K, V, H> Clone for ChainedHashMap<K, V, H>
where
    K: Clone,
    V: Clone,
    H: Clone,
{
    fn clone(&self) -> Self {
        Self {
            hasher: self.hasher.clone(),
            table: self.table.clone(),
            reentrancy: DebugReentrancy::new(),
        }
    }
}

impl<K, V, H> fmt::Debug for ChainedHashMap<K, V, H>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Iterator over `(&K, &V)` in `ChainedHashMap`.
pub struct Iter<'a, K, V> {
    buckets: core::slice::Iter<'a, Bucket<K, V>>,
    current: core::slice::Iter<'a, Entry<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(e) = self.current.next() {
                self.remaining -= 1;
                return Some((&e.pair.key, &e.pair.value));
            }
            if let Some(bucket) = self.buckets.next()? {
                self.current = bucket.iter();
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// Iterator over `(&K, &mut V)` in `ChainedHashMap`.
pub struct IterMut<'a, K, V> {
    buckets: core::slice::IterMut<'a, Bucket<K, V>>,
    current: core::slice::IterMut<'a, Entry<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(e) = self.current.next() {
                self.remaining -= 1;
                let Pair { key, value } = &mut e.pair;
                return Some((&*key, value));
            }
            if let Some(bucket) = self.buckets.next()? {
                self.current = bucket.iter_mut();
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

impl<'a, K, V, H> IntoIterator for &'a ChainedHashMap<K, V, H> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, H> IntoIterator for &'a mut ChainedHashMap<K, V, H> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeSet;
    use std::rc::{Rc, Weak};

    fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Trace)
            .is_test(true)
            .try_init();
    }

    fn hash_char(c: &char) -> u64 {
        *c as u64
    }

    fn hash_u32(k: &u32) -> u64 {
        u64::from(*k)
    }

    fn char_map() -> ChainedHashMap<char, i32, fn(&char) -> u64> {
        ChainedHashMap::with_hasher(hash_char as fn(&char) -> u64)
    }

    /// Invariant: a fresh map has 16 empty buckets and load factor 0.
    #[test]
    fn new_map_is_empty() {
        let m: ChainedHashMap<String, i32> = ChainedHashMap::new();
        assert_eq!(m.len(), 0);
        assert!(m.is_empty());
        assert_eq!(m.capacity(), 16);
        assert_eq!(m.load_factor(), 0.0);
        assert!(m.invariants_hold());
    }

    /// Invariant: duplicate keys are rejected and the stored value is kept.
    #[test]
    fn duplicate_insert_rejected() {
        let mut m = char_map();
        m.insert('a', 1).unwrap();
        match m.insert('a', 2) {
            Err(Error::DuplicateKey) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(m.at(&'a'), Some(&1));
        assert_eq!(m.len(), 1);
    }

    /// Invariant: `insert_pair` stores a copy; the caller's pair is untouched
    /// and a second insert of the same pair is rejected.
    #[test]
    fn insert_pair_copies() {
        let mut m: ChainedHashMap<String, Vec<i32>> = ChainedHashMap::new();
        let p = Pair::new("k".to_string(), vec![1, 2]);
        m.insert_pair(&p).unwrap();
        m.at_mut("k").unwrap().push(3);
        assert_eq!(p.value, vec![1, 2]);
        assert_eq!(m.at("k"), Some(&vec![1, 2, 3]));
        assert!(matches!(m.insert_pair(&p), Err(Error::DuplicateKey)));
    }

    /// Invariant: the 13th key in a 16-bucket map triggers the first growth.
    #[test]
    fn grows_when_load_exceeds_three_quarters() {
        init_test_logger();
        let mut m: ChainedHashMap<u32, u32, _> = ChainedHashMap::with_hasher(hash_u32);
        for k in 0..12 {
            m.insert(k, k).unwrap();
        }
        assert_eq!(m.capacity(), 16);
        assert_eq!(m.load_factor(), 0.75);
        m.insert(12, 12).unwrap();
        assert_eq!(m.capacity(), 32);
        assert!(m.invariants_hold());
        for k in 0..13 {
            assert_eq!(m.at(&k), Some(&k));
        }
    }

    /// Invariant: erase returns the owned pair; missing keys fail without
    /// changing the map.
    #[test]
    fn erase_returns_pair_and_rejects_missing() {
        let mut m: ChainedHashMap<String, i32> = ChainedHashMap::new();
        m.insert("a".to_string(), 1).unwrap();
        m.insert("b".to_string(), 2).unwrap();
        let (k, v) = m.erase("a").unwrap();
        assert_eq!((k.as_str(), v), ("a", 1));
        match m.erase("a") {
            Err(Error::KeyNotFound) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(m.len(), 1);
        // 1/16 < 0.25: the successful erase halved the table once, the
        // failed one left it alone.
        assert_eq!(m.capacity(), 8);
        assert_eq!(m.load_factor(), 0.125);
        assert_eq!(m.at("b"), Some(&2));
        assert!(m.invariants_hold());
    }

    /// Invariant: a failed erase of a missing key never resizes, even when
    /// the table is at the shrink threshold.
    #[test]
    fn missing_erase_does_not_shrink() {
        let mut m: ChainedHashMap<u32, u32, _> = ChainedHashMap::with_hasher(hash_u32);
        for k in 0..4 {
            m.insert(k, k).unwrap();
        }
        assert!(m.erase(&99).is_err());
        assert_eq!(m.capacity(), 16);
        assert_eq!(m.len(), 4);
    }

    /// Invariant: shrinking halves the bucket count and keeps every
    /// remaining key reachable.
    #[test]
    fn shrink_keeps_remaining_keys() {
        init_test_logger();
        let mut m: ChainedHashMap<u32, u32, _> = ChainedHashMap::with_hasher(hash_u32);
        for k in 0..13 {
            m.insert(k, k * 10).unwrap();
        }
        assert_eq!(m.capacity(), 32);
        for k in 0..6 {
            m.erase(&k).unwrap();
        }
        // 7/32 < 0.25 shrank to 16 on the sixth erase.
        assert_eq!(m.capacity(), 16);
        assert!(m.invariants_hold());
        for k in 6..13 {
            assert_eq!(m.at(&k), Some(&(k * 10)));
        }
    }

    /// Invariant: lookups resolve the right entry when every key collides.
    #[test]
    fn collisions_with_constant_hash() {
        let mut m = ChainedHashMap::with_hasher(|_: &String| 0u64);
        for i in 0..40 {
            m.insert(format!("k{}", i), i).unwrap();
        }
        assert!(m.invariants_hold());
        for i in 0..40 {
            assert_eq!(m.at(&format!("k{}", i)), Some(&i));
        }
        for i in (0..40).step_by(2) {
            assert_eq!(m.erase(&format!("k{}", i)).unwrap().1, i);
        }
        assert_eq!(m.len(), 20);
        assert!(m.invariants_hold());
        assert!(!m.contains_key(&"k0".to_string()));
        assert!(m.contains_key(&"k1".to_string()));
    }

    /// Invariant: `apply_if` mutates matching values in place and counts them.
    #[test]
    fn apply_if_counts_and_mutates() {
        let mut m = char_map();
        m.insert('C', 2).unwrap();
        m.insert('#', 3).unwrap();
        m.insert('X', 5).unwrap();
        let n = m.apply_if(|k| k.is_ascii_uppercase(), |v| *v *= 2);
        assert_eq!(n, 2);
        assert_eq!(m.at(&'C'), Some(&4));
        assert_eq!(m.at(&'#'), Some(&3));
        assert_eq!(m.at(&'X'), Some(&10));
        assert_eq!(m.len(), 3);
    }

    /// Invariant: the hash function runs once per insert and never during
    /// a rehash.
    #[test]
    fn hash_not_recomputed_on_rehash() {
        let calls = Rc::new(Cell::new(0usize));
        let counter = calls.clone();
        let mut m = ChainedHashMap::with_hasher(move |k: &u32| {
            counter.set(counter.get() + 1);
            u64::from(*k)
        });
        for k in 0..100u32 {
            m.insert(k, ()).unwrap();
        }
        assert_eq!(m.capacity(), 256);
        assert_eq!(calls.get(), 100);
    }

    /// Invariant: every inserted and not-yet-erased value is dropped exactly
    /// once, whether erased or dropped with the map.
    #[test]
    fn values_dropped_exactly_once() {
        struct Tracked(Rc<Cell<usize>>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }
        let drops = Rc::new(Cell::new(0));
        let mut m: ChainedHashMap<u32, Tracked, _> = ChainedHashMap::with_hasher(hash_u32);
        for k in 0..30 {
            m.insert(k, Tracked(drops.clone())).unwrap();
        }
        assert!(m.insert(0, Tracked(drops.clone())).is_err());
        assert_eq!(drops.get(), 1);
        for k in 0..10 {
            drop(m.erase(&k).unwrap());
        }
        assert_eq!(drops.get(), 11);
        drop(m);
        assert_eq!(drops.get(), 31);
    }

    /// Invariant: iteration yields each live entry once; `iter_mut` writes
    /// are visible to later lookups.
    #[test]
    fn iteration_and_mutation() {
        let mut m: ChainedHashMap<String, i32> = ChainedHashMap::new();
        for (i, k) in ["k1", "k2", "k3"].iter().enumerate() {
            m.insert((*k).to_string(), i as i32).unwrap();
        }
        assert_eq!(m.iter().len(), 3);
        let seen: BTreeSet<String> = m.keys().cloned().collect();
        let expected: BTreeSet<String> = ["k1", "k2", "k3"].iter().map(|s| s.to_string()).collect();
        assert_eq!(seen, expected);
        for (_k, v) in m.iter_mut() {
            *v += 10;
        }
        assert_eq!(m.values().sum::<i32>(), 33);
        assert_eq!(m.at("k3"), Some(&12));
    }

    /// Invariant: a clone is independent of its source.
    #[test]
    fn clone_is_independent() {
        let mut a = char_map();
        a.insert('x', 1).unwrap();
        let mut b = a.clone();
        *b.at_mut(&'x').unwrap() = 2;
        b.insert('y', 3).unwrap();
        assert_eq!(a.at(&'x'), Some(&1));
        assert!(!a.contains_key(&'y'));
        assert!(b.invariants_hold());
    }

    /// Invariant: configured floors bound shrinking; invalid configs are
    /// rejected.
    #[test]
    fn config_floor_bounds_shrink() {
        let cfg = TableConfig {
            initial_capacity: 8,
            min_capacity: 4,
        };
        let mut m: ChainedHashMap<u32, u32, _> =
            ChainedHashMap::with_config(cfg, hash_u32 as fn(&u32) -> u64).unwrap();
        assert_eq!(m.capacity(), 8);
        m.insert(1, 1).unwrap();
        m.insert(2, 2).unwrap();
        m.erase(&1).unwrap();
        m.erase(&2).unwrap();
        assert_eq!(m.capacity(), 4);

        let bad = TableConfig {
            initial_capacity: 6,
            min_capacity: 2,
        };
        assert!(matches!(
            ChainedHashMap::<u32, u32, _>::with_config(bad, hash_u32 as fn(&u32) -> u64),
            Err(Error::InvalidConfig(_))
        ));
    }

    /// Invariant: a floor of one bucket works; every key lands in bucket 0.
    #[test]
    fn single_bucket_floor() {
        let cfg = TableConfig {
            initial_capacity: 1,
            min_capacity: 1,
        };
        let mut m: ChainedHashMap<u32, u32, _> =
            ChainedHashMap::with_config(cfg, hash_u32 as fn(&u32) -> u64).unwrap();
        m.insert(7, 7).unwrap();
        assert_eq!(m.capacity(), 2);
        m.erase(&7).unwrap();
        assert_eq!(m.capacity(), 1);
        m.insert(9, 9).unwrap();
        assert!(m.invariants_hold());
    }

    #[cfg(debug_assertions)]
    /// Key whose `Eq` looks the map up again while the map is comparing it.
    struct Reentrant {
        id: u32,
        map: Weak<RefCell<ReentrantMap>>,
    }

    #[cfg(debug_assertions)]
    type ReentrantMap = ChainedHashMap<Reentrant, i32, fn(&Reentrant) -> u64>;

    #[cfg(debug_assertions)]
    impl PartialEq for Reentrant {
        fn eq(&self, other: &Self) -> bool {
            if let Some(map) = self.map.upgrade() {
                let plain = Reentrant {
                    id: other.id,
                    map: Weak::new(),
                };
                RefCell::borrow(&map).contains_key(&plain);
            }
            self.id == other.id
        }
    }

    #[cfg(debug_assertions)]
    impl Eq for Reentrant {}

    #[cfg(debug_assertions)]
    fn hash_reentrant(k: &Reentrant) -> u64 {
        u64::from(k.id)
    }

    /// Invariant (debug-only): user code that re-enters the map while a
    /// lookup is scanning a bucket panics.
    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_from_key_comparison() {
        let map: Rc<RefCell<ReentrantMap>> = Rc::new(RefCell::new(ChainedHashMap::with_hasher(
            hash_reentrant as fn(&Reentrant) -> u64,
        )));
        let stored = Reentrant {
            id: 1,
            map: Rc::downgrade(&map),
        };
        map.borrow_mut().insert(stored, 10).unwrap();

        let query = Reentrant {
            id: 1,
            map: Weak::new(),
        };
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            RefCell::borrow(&map).at(&query).copied()
        }));
        let payload = res.expect_err("expected reentrancy to panic in debug builds");
        let msg = payload
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| payload.downcast_ref::<&str>().copied())
            .unwrap_or_default();
        assert!(msg.contains("reentrancy detected"), "unexpected panic: {}", msg);

        // The guard was released by unwinding; a lookup that does not
        // re-enter succeeds.
        let other = Reentrant {
            id: 2,
            map: Weak::new(),
        };
        assert_eq!(RefCell::borrow(&map).at(&other), None);
    }

    /// Invariant: a rehash whose staging cannot be allocated leaves the
    /// table untouched.
    #[test]
    fn failed_rehash_leaves_table_untouched() {
        init_test_logger();
        let mut m: ChainedHashMap<u32, u32, _> = ChainedHashMap::with_hasher(hash_u32);
        for k in 0..10 {
            m.insert(k, k * 3).unwrap();
        }
        let huge = 1usize << (usize::BITS - 2);
        assert!(matches!(m.table.rehash(huge, None), Err(Error::Alloc(_))));
        assert_eq!(m.capacity(), 16);
        assert_eq!(m.len(), 10);
        assert!(m.invariants_hold());
        for k in 0..10 {
            assert_eq!(m.at(&k), Some(&(k * 3)));
        }
    }

    /// Invariant: when the shrink of an erase fails, the excluded entry is
    /// still stored and reachable.
    #[test]
    fn failed_shrink_keeps_excluded_entry() {
        let mut m: ChainedHashMap<u32, u32, _> = ChainedHashMap::with_hasher(hash_u32);
        for k in 0..3 {
            m.insert(k, k).unwrap();
        }
        let slot = m.table.locate(hash_u32(&1), |k| *k == 1).unwrap();
        let huge = 1usize << (usize::BITS - 2);
        assert!(matches!(m.table.rehash(huge, Some(slot)), Err(Error::Alloc(_))));
        assert_eq!(m.len(), 3);
        assert_eq!(m.at(&1), Some(&1));
        assert!(m.invariants_hold());
        // A successful staged erase hands the excluded entry back.
        let entry = m.table.rehash(8, Some(slot)).unwrap().unwrap();
        assert_eq!(entry.pair.into_parts(), (1, 1));
        m.table.len -= 1;
        assert!(!m.contains_key(&1));
        assert!(m.invariants_hold());
    }

    /// Invariant: a bucket is created only when the entry lands in it; a
    /// bucket emptied by erase is released again.
    #[test]
    fn buckets_created_and_released_with_entries() {
        let mut m: ChainedHashMap<u32, u32, _> = ChainedHashMap::with_hasher(hash_u32);
        m.insert(3, 3).unwrap();
        m.insert(19, 19).unwrap();
        assert!(m.table.slots[3].is_some());
        assert_eq!(m.table.slots.iter().flatten().count(), 1);
        assert_eq!(m.table.slots[3].as_ref().map(DynArray::len), Some(2));
        for k in 4..8 {
            m.insert(k, k).unwrap();
        }
        // 5/16 stays above the shrink threshold, so bucket 4 drains in place.
        m.erase(&4).unwrap();
        assert_eq!(m.capacity(), 16);
        assert!(m.table.slots[4].is_none());
        assert!(m.invariants_hold());
    }

    #[test]
    fn debug_format_lists_entries() {
        let mut m = char_map();
        m.insert('z', 26).unwrap();
        assert_eq!(format!("{:?}", m), "{'z': 26}");
    }
}
