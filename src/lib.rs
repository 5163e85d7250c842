//! chained-hashmap: a single-threaded, separately-chained hash map whose
//! buckets are deduplicating dynamic arrays.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a unique-key map with explicit, observable load-factor policy
//!   and all-or-nothing behavior under allocation failure.
//! - Layers:
//!   - DynArray<T>: contiguous owned storage with its own load policy
//!     (initial capacity 2, doubles above 0.75, halves below 0.25) and
//!     value-deduplicating `push_back`.
//!   - Buckets<K, V> (private): the bucket index of a ChainedHashMap;
//!     one optional DynArray per slot, `len`, and the rehash machinery.
//!   - ChainedHashMap<K, V, H>: public API; owns the key hash function and
//!     a debug-only reentrancy guard.
//!
//! Constraints
//! - Single-threaded: no internal synchronization. The map is `Send` when
//!   its contents are and `!Sync`; wrap it in a lock to share it.
//! - Bucket count is always a power of two; the bucket of a key is
//!   `hash & (capacity - 1)`.
//! - The load factor never exceeds 0.75 after an operation. After an erase
//!   that does not shrink, it is at least 0.25 unless the bucket count sits
//!   at its floor; a shrink halves the bucket count exactly once, so an
//!   erase from an under-filled table can still end below 0.25.
//! - Unique keys; inserting an existing key fails instead of overwriting.
//!
//! Hashing
//! - A key is hashed once, on insert. The hash is cached next to the pair
//!   and every later placement (including rehash) uses the cached value,
//!   so a rehash never calls into user code.
//!
//! Allocation failure
//! - Growth, shrink and rehash reserve every buffer they need with
//!   `try_reserve_exact` before moving a single element. A failure drops
//!   the staged buffers and reports `Error::Alloc`; no stored pair, length
//!   or bucket index changes. The one visible leftover is an insert whose
//!   growth rehash succeeded before the bucket push failed: the larger
//!   bucket count is kept.
//!
//! Reentrancy
//! - The map runs user code (hash function, `K: Eq`, `apply_if` closures)
//!   while its buckets are borrowed. A debug-only guard panics if that code
//!   re-enters the same map.
//!
//! Notes and non-goals
//! - Iteration order is unspecified and changes across rehashes.
//! - No open addressing, persistence or serialization.
//! - The bucket count never shrinks below `TableConfig::min_capacity`
//!   (default 2), so a zero-sized index is unreachable.

mod chained_hash_map;
mod chained_hash_map_proptest;
pub mod config;
mod dyn_array;
mod error;
pub mod hashing;
mod pair;
mod reentrancy;

// Public surface
pub use chained_hash_map::{ChainedHashMap, Iter, IterMut};
pub use config::TableConfig;
pub use dyn_array::DynArray;
pub use error::{Error, Result};
pub use hashing::{BuildHasherAdapter, DefaultKeyHasher, KeyHasher};
pub use pair::Pair;
