//! Cache line store.
//!
//! This module holds the per-line metadata and data of a coherent cache. It includes:
//! 1. **Lines:** State, sharers/owner, data, timestamp and prefetch flag.
//! 2. **Array:** Set-associative lookup, victim selection and retagging.
//! 3. **Hashing:** Configurable set-index functions.
//! 4. **Policies:** Pluggable replacement algorithms.

/// Set-associative line array.
pub mod array;

/// Set-index hash functions.
pub mod hash;

/// Per-line metadata.
pub mod line;

/// Replacement policy implementations (FIFO, LRU, MRU, PLRU, Random).
pub mod policies;

pub use array::CacheArray;
pub use line::CacheLine;
