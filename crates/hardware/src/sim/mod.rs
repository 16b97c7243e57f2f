//! Simulation driver.
//!
//! Provides the cycle loop that clocks every component of a hierarchy and the queue of
//! events in flight between them.

/// Timed delivery queue.
pub mod queue;

/// Cycle loop, ports and the deadlock watchdog.
pub mod simulator;

pub use simulator::Simulator;
