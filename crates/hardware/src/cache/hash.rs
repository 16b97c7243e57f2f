//! Set-index hash functions.
//!
//! Maps a line number onto a set of the array. `None` keeps consecutive lines in
//! consecutive sets; `Linear` and `Xor` scatter strided access patterns.

use crate::config::HashFunction;

/// Multiplier of the linear congruential hash.
const LINEAR_MULTIPLIER: u64 = 1_103_515_245;

/// Increment of the linear congruential hash.
const LINEAR_INCREMENT: u64 = 12_345;

/// Computes set indices for one array.
#[derive(Clone, Copy, Debug)]
pub struct SetHash {
    function: HashFunction,
    sets: usize,
    set_bits: u32,
}

impl SetHash {
    /// Creates a hash onto `sets` sets.
    pub const fn new(function: HashFunction, sets: usize) -> Self {
        let set_bits = if sets <= 1 { 0 } else { usize::BITS - (sets - 1).leading_zeros() };
        Self {
            function,
            sets,
            set_bits,
        }
    }

    /// Returns the set holding line number `line`.
    pub const fn set_index(&self, line: u64) -> usize {
        let hashed = match self.function {
            HashFunction::None => line,
            HashFunction::Linear => line.wrapping_mul(LINEAR_MULTIPLIER).wrapping_add(LINEAR_INCREMENT),
            HashFunction::Xor => {
                if self.set_bits == 0 {
                    line
                } else {
                    line ^ (line >> self.set_bits)
                }
            }
        };
        (hashed % self.sets as u64) as usize
    }
}
