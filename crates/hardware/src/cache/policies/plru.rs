//! Pseudo-LRU (PLRU) Replacement Policy.
//!
//! Bit-PLRU keeps one "recently used" bit per way. Accessing a way sets its bit; when every
//! bit would be set, all bits except the accessed one are cleared. The victim is the lowest
//! way whose bit is clear.
//!
//! # Performance
//!
//! - **Time Complexity:**
//!   - `update()`: O(1)
//!   - `get_victim()`: O(W)
//! - **Space Complexity:** O(S × W) bits
//! - **Worst Case:** Pathological cases can cause premature eviction of useful lines

use super::ReplacementPolicy;

/// PLRU Policy state.
#[derive(Debug)]
pub struct PlruPolicy {
    /// Recently-used bits for each set.
    usage: Vec<u64>,
    /// Number of ways in the cache.
    ways: usize,
}

impl PlruPolicy {
    /// Creates a new PLRU policy instance; `ways` must not exceed 64.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            usage: vec![0; sets],
            ways,
        }
    }

    const fn all_ones(&self) -> u64 {
        if self.ways >= 64 { u64::MAX } else { (1 << self.ways) - 1 }
    }
}

impl ReplacementPolicy for PlruPolicy {
    fn update(&mut self, set: usize, way: usize) {
        let mask = 1 << way;
        self.usage[set] |= mask;
        if self.usage[set] & self.all_ones() == self.all_ones() {
            self.usage[set] = mask;
        }
    }

    fn invalidate(&mut self, set: usize, way: usize) {
        self.usage[set] &= !(1 << way);
    }

    fn get_victim(&mut self, set: usize) -> usize {
        (0..self.ways)
            .find(|&i| (self.usage[set] >> i) & 1 == 0)
            .unwrap_or(0)
    }
}
