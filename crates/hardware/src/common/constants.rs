//! Global constants.
//!
//! This module defines constants shared by the protocol engine and the simulation glue. It
//! includes:
//! 1. **Retry:** The cap on the exponential NACK backoff.
//! 2. **Packets:** Sizes used when a configuration leaves them unspecified.
//! 3. **Simulation:** Link latency and watchdog limits for the driver.

/// Largest exponent used for NACK backoff; the delay is `2^min(retries, MAX_BACKOFF_SHIFT)`.
pub const MAX_BACKOFF_SHIFT: u32 = 10;

/// Header bytes charged to every packet on a link.
pub const DEFAULT_PACKET_HEADER_BYTES: u64 = 8;

/// MSHR slots kept free for requests initiated by the lower level.
pub const DEFAULT_FORWARD_RESERVE: usize = 2;

/// Cycle limit applied by `run_until_idle` when the caller passes zero.
pub const DEFAULT_MAX_CYCLES: u64 = 10_000_000;

/// Cycles a message spends on a link between two components.
pub const DEFAULT_LINK_LATENCY: u64 = 1;
