/// Eviction of lines with and without upper-level copies.
pub mod eviction;





/// Fills and hits with zero latencies.
pub mod responses;

/// Writebacks from the upper level.
pub mod writebacks;
