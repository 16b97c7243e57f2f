//! First-In, First-Out (FIFO) Replacement Policy.
//!
//! This policy evicts the oldest cache line in a set, regardless of how recently
//! it was accessed. It operates as a circular buffer (Round-Robin) for each set:
//! filling the way under the pointer advances it.
//!
//! # Performance
//!
//! - **Time Complexity:** O(1) for every operation
//! - **Space Complexity:** O(S) where S is the number of sets
//! - **Worst Case:** Workloads with strong temporal locality (may evict frequently-used lines)

use super::ReplacementPolicy;

/// FIFO Policy state.
#[derive(Debug)]
pub struct FifoPolicy {
    next_way: Vec<usize>,
    ways: usize,
}

impl FifoPolicy {
    /// Creates a new FIFO policy instance for `sets` sets of `ways` ways.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            next_way: vec![0; sets],
            ways,
        }
    }
}

impl ReplacementPolicy for FifoPolicy {
    fn update(&mut self, set: usize, way: usize) {
        if self.next_way[set] == way {
            self.next_way[set] = (way + 1) % self.ways;
        }
    }

    fn invalidate(&mut self, _set: usize, _way: usize) {}

    fn get_victim(&mut self, set: usize) -> usize {
        self.next_way[set]
    }
}
