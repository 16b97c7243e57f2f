//! Random Replacement Policy.
//!
//! This policy evicts a pseudo-randomly selected way, drawn from a xorshift generator with
//! a fixed seed so runs are reproducible.

use super::ReplacementPolicy;

/// Seed of the xorshift generator.
const SEED: u64 = 123_456_789;

/// Random Policy state.
#[derive(Debug)]
pub struct RandomPolicy {
    ways: usize,
    state: u64,
}

impl RandomPolicy {
    /// Creates a new random policy instance; the set count is irrelevant.
    pub const fn new(_sets: usize, ways: usize) -> Self {
        Self { ways, state: SEED }
    }
}

impl ReplacementPolicy for RandomPolicy {
    fn update(&mut self, _set: usize, _way: usize) {}

    fn invalidate(&mut self, _set: usize, _way: usize) {}

    fn get_victim(&mut self, _set: usize) -> usize {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x % self.ways as u64) as usize
    }
}
