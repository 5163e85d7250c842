//! DynArray: deduplicating growable array with a load-factor policy.
//!
//! The array keeps its own logical `capacity`, which moves in powers of two
//! from `ARRAY_INITIAL_CAPACITY`: it doubles when a push would take
//! `len / capacity` above `MAX_LOAD_FACTOR` and halves when an erase would
//! take it below `MIN_LOAD_FACTOR`. Every buffer is reserved fallibly before
//! any element moves, so an allocation failure leaves the array untouched.

use crate::config::{
    load_factor, ARRAY_INITIAL_CAPACITY, GROWTH_FACTOR, MAX_LOAD_FACTOR, MIN_LOAD_FACTOR,
};
use crate::error::{Error, Result};

/// Ordered sequence of owned, pairwise-distinct elements.
///
/// Duplicate detection is a linear scan. That is a deliberate trade-off:
/// the array is used as a hash bucket, where chains stay short.
#[derive(Clone, Debug)]
pub struct DynArray<T> {
    data: Vec<T>,
    capacity: usize,
}

impl<T> Default for DynArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One growth step.
pub(crate) fn grown(capacity: usize) -> Result<usize> {
    capacity
        .checked_mul(GROWTH_FACTOR)
        .ok_or(Error::CapacityOverflow)
}

/// Smallest policy capacity that holds `len` elements.
fn capacity_for(len: usize) -> Result<usize> {
    let mut capacity = ARRAY_INITIAL_CAPACITY;
    while load_factor(len, capacity) > MAX_LOAD_FACTOR {
        capacity = grown(capacity)?;
    }
    Ok(capacity)
}

impl<T> DynArray<T> {
    /// Empty array. Storage is allocated on the first push.
    pub const fn new() -> Self {
        Self {
            data: Vec::new(),
            capacity: ARRAY_INITIAL_CAPACITY,
        }
    }

    /// Empty array already sized for `len` pushes, i.e. with the capacity
    /// `len` successive `push_back` calls would have reached.
    pub(crate) fn with_expected_len(len: usize) -> Result<Self> {
        let capacity = capacity_for(len)?;
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)?;
        Ok(Self { data, capacity })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn load_factor(&self) -> f64 {
        load_factor(self.data.len(), self.capacity)
    }

    /// The element at `index`, or `None` past the end.
    pub fn at(&self, index: usize) -> Option<&T> {
        self.data.get(index)
    }

    pub fn at_mut(&mut self, index: usize) -> Option<&mut T> {
        self.data.get_mut(index)
    }

    /// Index of the first element matching `pred`.
    pub fn position<P>(&self, pred: P) -> Option<usize>
    where
        P: FnMut(&T) -> bool,
    {
        self.data.iter().position(pred)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn iter(&self) -> core::slice::Iter<'_, T> {
        self.data.iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, T> {
        self.data.iter_mut()
    }

    /// Drops every element. Capacity is kept.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Removes and returns the element at `index`, shifting later elements
    /// down by one.
    ///
    /// If the array falls below the minimum load factor the capacity halves
    /// (never below `ARRAY_INITIAL_CAPACITY`). The smaller buffer is
    /// allocated before anything is removed; if that fails the array is
    /// unchanged and `Error::Alloc` is returned.
    pub fn erase(&mut self, index: usize) -> Result<T> {
        let len = self.data.len();
        if index >= len {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        let remaining = len - 1;
        if self.capacity > ARRAY_INITIAL_CAPACITY
            && load_factor(remaining, self.capacity) < MIN_LOAD_FACTOR
        {
            let capacity = (self.capacity / GROWTH_FACTOR).max(ARRAY_INITIAL_CAPACITY);
            let mut shrunk = Vec::new();
            shrunk.try_reserve_exact(capacity)?;
            let removed = self.data.remove(index);
            shrunk.append(&mut self.data);
            self.data = shrunk;
            self.capacity = capacity;
            return Ok(removed);
        }
        Ok(self.data.remove(index))
    }

    /// Appends without the duplicate check. Grows per the load policy.
    pub(crate) fn push_distinct(&mut self, value: T) -> Result<usize> {
        let index = self.data.len();
        let mut capacity = self.capacity;
        if load_factor(index + 1, capacity) > MAX_LOAD_FACTOR {
            capacity = grown(capacity)?;
        }
        if self.data.capacity() < capacity {
            self.data.try_reserve_exact(capacity - index)?;
        }
        self.capacity = capacity;
        self.data.push(value);
        Ok(index)
    }

    /// Appends into capacity reserved by `with_expected_len`.
    pub(crate) fn place(&mut self, value: T) {
        debug_assert!(self.data.len() < self.capacity);
        debug_assert!(self.data.len() < self.data.capacity());
        self.data.push(value);
    }
}

impl<T: PartialEq> DynArray<T> {
    /// Index of the first element equal to `value`.
    pub fn find(&self, value: &T) -> Option<usize> {
        self.data.iter().position(|e| e == value)
    }

    /// Appends `value` and returns its index.
    ///
    /// Fails with `Error::DuplicateElement` if an equal element is already
    /// stored, and with `Error::Alloc` if the growth buffer cannot be
    /// reserved. On failure the array is unchanged and `value` is dropped.
    pub fn push_back(&mut self, value: T) -> Result<usize> {
        if self.find(&value).is_some() {
            return Err(Error::DuplicateElement);
        }
        self.push_distinct(value)
    }
}

impl<T> IntoIterator for DynArray<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a DynArray<T> {
    type Item = &'a T;
    type IntoIter = core::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut DynArray<T> {
    type Item = &'a mut T;
    type IntoIter = core::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter_mut()
    }
}
