//! Least Recently Used (LRU) Replacement Policy.
//!
//! This policy evicts the cache line that has not been accessed for the longest time.
//! It maintains a usage stack for each set. When a line is accessed, it is moved
//! to the top (Most Recently Used position); an invalidated line sinks to the bottom so
//! its way is reused first.
//!
//! # Performance
//!
//! - **Time Complexity:**
//!   - `update()`: O(W) where W is the number of ways (associativity)
//!   - `get_victim()`: O(1)
//! - **Space Complexity:** O(S × W) where S is the number of sets
//! - **Best Case:** Workloads with good temporal locality
//! - **Worst Case:** Scanning patterns larger than cache capacity (thrashing)

use super::ReplacementPolicy;

/// LRU Policy state.
#[derive(Debug)]
pub struct LruPolicy {
    /// A vector of usage stacks (one per set).
    /// Index 0 is MRU, last index is LRU.
    usage: Vec<Vec<usize>>,
}

impl LruPolicy {
    /// Creates a new LRU policy instance.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of sets in the cache.
    /// * `ways` - The associativity (number of ways) of the cache.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            usage: (0..sets).map(|_| (0..ways).collect()).collect(),
        }
    }

    fn detach(stack: &mut Vec<usize>, way: usize) {
        if let Some(pos) = stack.iter().position(|&x| x == way) {
            let _ = stack.remove(pos);
        }
    }
}

impl ReplacementPolicy for LruPolicy {
    fn update(&mut self, set: usize, way: usize) {
        let stack = &mut self.usage[set];
        Self::detach(stack, way);
        stack.insert(0, way);
    }

    fn invalidate(&mut self, set: usize, way: usize) {
        let stack = &mut self.usage[set];
        Self::detach(stack, way);
        stack.push(way);
    }

    /// Returns the way at the bottom of the usage stack (LRU position).
    fn get_victim(&mut self, set: usize) -> usize {
        self.usage[set].last().copied().unwrap_or(0)
    }
}
