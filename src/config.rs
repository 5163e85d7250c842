//! Load policy constants and table configuration.

use crate::error::{Error, Result};

/// Growth triggers when an insert would push `len / capacity` above this.
pub const MAX_LOAD_FACTOR: f64 = 0.75;
/// Shrink triggers when an erase would drop `len / capacity` below this.
pub const MIN_LOAD_FACTOR: f64 = 0.25;
/// Capacity multiplier on growth and divisor on shrink.
pub const GROWTH_FACTOR: usize = 2;

/// Default number of buckets of a fresh table.
pub const INITIAL_CAPACITY: usize = 16;
/// Default floor for table shrinking.
pub const MIN_CAPACITY: usize = 2;
/// Capacity of a fresh `DynArray`; also its shrink floor.
pub const ARRAY_INITIAL_CAPACITY: usize = 2;

/// Capacity settings for a `ChainedHashMap`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TableConfig {
    /// Bucket count at construction. Power of two.
    pub initial_capacity: usize,
    /// Shrinking never goes below this. Power of two, `<= initial_capacity`.
    pub min_capacity: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            initial_capacity: INITIAL_CAPACITY,
            min_capacity: MIN_CAPACITY,
        }
    }
}

impl TableConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.initial_capacity.is_power_of_two() {
            return Err(Error::InvalidConfig(
                "initial_capacity must be a non-zero power of two",
            ));
        }
        if !self.min_capacity.is_power_of_two() {
            return Err(Error::InvalidConfig(
                "min_capacity must be a non-zero power of two",
            ));
        }
        if self.min_capacity > self.initial_capacity {
            return Err(Error::InvalidConfig(
                "min_capacity must not exceed initial_capacity",
            ));
        }
        Ok(())
    }
}

/// `len / capacity` as a real number.
#[inline]
pub(crate) fn load_factor(len: usize, capacity: usize) -> f64 {
    len as f64 / capacity as f64
}
