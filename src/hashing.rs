//! Key hash functions.
//!
//! A table hashes each key exactly once, on insert, and caches the result
//! next to the entry. Lookups hash the query with the same `KeyHasher`, so
//! an implementation must return the same value for equal keys for as long
//! as the table lives.

use core::hash::{BuildHasher, Hash};
use hashbrown::hash_map::DefaultHashBuilder;

/// A hash function over `Q`.
///
/// Implemented for every `Fn(&Q) -> u64`, so plain functions and closures
/// can be handed to `ChainedHashMap::with_hasher` directly.
pub trait KeyHasher<Q: ?Sized> {
    fn hash_key(&self, key: &Q) -> u64;
}

impl<Q, F> KeyHasher<Q> for F
where
    Q: ?Sized,
    F: Fn(&Q) -> u64,
{
    #[inline]
    fn hash_key(&self, key: &Q) -> u64 {
        self(key)
    }
}

/// Adapts a `std`-style `BuildHasher` to `KeyHasher` for any `Q: Hash`.
///
/// Because it is generic over the query type, tables using it accept
/// borrowed lookups (`String` keys queried with `&str`).
#[derive(Clone, Debug, Default)]
pub struct BuildHasherAdapter<S> {
    build: S,
}

impl<S> BuildHasherAdapter<S> {
    pub fn new(build: S) -> Self {
        Self { build }
    }

    pub fn build_hasher(&self) -> &S {
        &self.build
    }
}

impl<Q, S> KeyHasher<Q> for BuildHasherAdapter<S>
where
    Q: ?Sized + Hash,
    S: BuildHasher,
{
    #[inline]
    fn hash_key(&self, key: &Q) -> u64 {
        self.build.hash_one(key)
    }
}

/// Hasher used by `ChainedHashMap::new`.
pub type DefaultKeyHasher = BuildHasherAdapter<DefaultHashBuilder>;

/// Bucket index of `hash` in a table of `capacity` slots.
#[inline]
pub(crate) fn bucket_index(hash: u64, capacity: usize) -> usize {
    debug_assert!(capacity.is_power_of_two());
    (hash as usize) & (capacity - 1)
}
