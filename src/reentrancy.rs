//! Debug-only reentrancy guard.
//!
//! `ChainedHashMap` calls into user code while its buckets are borrowed:
//! the key hash function, `K: Eq` during bucket scans, and the predicate and
//! mutator of `apply_if`. None of these may reach back into the same table.
//! In debug builds a nested entry panics; in release builds the guard
//! compiles to nothing.

use core::cell::Cell;
use core::marker::PhantomData;

/// Per-instance tracker. Entry points open a section with
/// `let _g = self.reentrancy.enter();`.
///
/// The `Cell` keeps owners `!Sync`; they stay `Send` so a table can be moved
/// behind a caller-supplied lock.
#[derive(Debug)]
pub struct DebugReentrancy {
    #[cfg(debug_assertions)]
    depth: Cell<u32>,
    _nosync: PhantomData<Cell<()>>,
}

impl DebugReentrancy {
    pub const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            depth: Cell::new(0),
            _nosync: PhantomData,
        }
    }

    /// Open a guarded section. Panics in debug builds if one is already open.
    #[inline]
    pub fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let d = self.depth.get();
            assert!(d == 0, "reentrancy detected: nested entry into ChainedHashMap");
            self.depth.set(d + 1);
            ReentrancyGuard { owner: self }
        }

        #[cfg(not(debug_assertions))]
        {
            ReentrancyGuard { _z: PhantomData }
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `DebugReentrancy::enter`.
pub struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let d = self.owner.depth.get();
            debug_assert!(d > 0);
            self.owner.depth.set(d - 1);
        }
    }
}
