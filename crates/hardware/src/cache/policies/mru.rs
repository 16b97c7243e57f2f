//! Most Recently Used (MRU) Replacement Policy.
//!
//! This policy evicts the cache line that was accessed most recently.
//! MRU suits cyclic access patterns whose footprint exceeds the cache: the line just used
//! is the one needed furthest in the future.

use super::ReplacementPolicy;

/// MRU Policy state.
#[derive(Debug)]
pub struct MruPolicy {
    /// Usage stacks; index 0 is the most recently used way.
    usage: Vec<Vec<usize>>,
}

impl MruPolicy {
    /// Creates a new MRU policy instance for `sets` sets of `ways` ways.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            usage: (0..sets).map(|_| (0..ways).collect()).collect(),
        }
    }
}

impl ReplacementPolicy for MruPolicy {
    fn update(&mut self, set: usize, way: usize) {
        let stack = &mut self.usage[set];
        if let Some(pos) = stack.iter().position(|&x| x == way) {
            let _ = stack.remove(pos);
        }
        stack.insert(0, way);
    }

    // A freed way goes to the MRU slot so it is picked next.
    fn invalidate(&mut self, set: usize, way: usize) {
        self.update(set, way);
    }

    fn get_victim(&mut self, set: usize) -> usize {
        self.usage[set].first().copied().unwrap_or(0)
    }
}
