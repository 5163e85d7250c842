//! Crate error type.

use std::collections::TryReserveError;
use thiserror::Error;

/// Errors reported by `DynArray` and `ChainedHashMap`.
///
/// Every operation that returns one of these has already restored the
/// structure to its pre-call state.
#[derive(Error, Debug)]
pub enum Error {
    /// Insert of a key that is already present.
    #[error("key already present in map")]
    DuplicateKey,
    /// Erase of a key that is not present.
    #[error("key not present in map")]
    KeyNotFound,
    /// `push_back` of a value equal to an element already stored.
    #[error("element already present in array")]
    DuplicateElement,
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    /// A capacity computation would overflow `usize`.
    #[error("capacity overflow")]
    CapacityOverflow,
    /// The allocator refused a growth, shrink or rehash buffer.
    #[error("allocation failed: {0}")]
    Alloc(#[from] TryReserveError),
    #[error("invalid table configuration: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;
