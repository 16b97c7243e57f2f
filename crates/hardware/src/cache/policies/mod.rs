//! Cache Replacement Policies.
//!
//! Implements the algorithms that pick a victim way in a full set. The array only consults
//! a policy when every way of the set holds a valid line; invalid ways are always used
//! first.
//!
//! # Policies
//!
//! - `Fifo`: First-In, First-Out.
//! - `Lru`: Least Recently Used.
//! - `Mru`: Most Recently Used.
//! - `Plru`: Pseudo-LRU (one bit per way).
//! - `Random`: Random selection.

/// First-In, First-Out replacement policy.
pub mod fifo;

/// Least Recently Used replacement policy.
pub mod lru;

/// Most Recently Used replacement policy.
pub mod mru;

/// Pseudo-LRU replacement policy.
pub mod plru;

/// Random replacement policy.
pub mod random;

pub use fifo::FifoPolicy;
pub use lru::LruPolicy;
pub use mru::MruPolicy;
pub use plru::PlruPolicy;
pub use random::RandomPolicy;

use crate::config::ReplacementPolicy as PolicyType;

/// Trait for cache replacement policies.
///
/// Defines the interface for updating usage state and selecting victim lines.
pub trait ReplacementPolicy: Send + Sync {
    /// Updates the policy state when a line is accessed or filled.
    ///
    /// # Arguments
    ///
    /// * `set` - The cache set index.
    /// * `way` - The way index within the set that was accessed.
    fn update(&mut self, set: usize, way: usize);

    /// Updates the policy state when a line is invalidated and its way becomes free.
    ///
    /// # Arguments
    ///
    /// * `set` - The cache set index.
    /// * `way` - The way index that was freed.
    fn invalidate(&mut self, set: usize, way: usize);

    /// Selects a victim line to evict from a specific set.
    ///
    /// # Arguments
    ///
    /// * `set` - The cache set index.
    ///
    /// # Returns
    ///
    /// The index of the way to evict.
    fn get_victim(&mut self, set: usize) -> usize;
}

/// Builds the policy selected in the configuration.
///
/// # Arguments
///
/// * `kind` - Configured policy.
/// * `sets` - Number of sets.
/// * `ways` - Ways per set.
pub fn build(kind: PolicyType, sets: usize, ways: usize) -> Box<dyn ReplacementPolicy> {
    match kind {
        PolicyType::Fifo => Box::new(FifoPolicy::new(sets, ways)),
        PolicyType::Random => Box::new(RandomPolicy::new(sets, ways)),
        PolicyType::Plru => Box::new(PlruPolicy::new(sets, ways)),
        PolicyType::Lru => Box::new(LruPolicy::new(sets, ways)),
        PolicyType::Mru => Box::new(MruPolicy::new(sets, ways)),
    }
}
