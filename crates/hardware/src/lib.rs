//! Inclusive cache-coherence simulator library.
//!
//! This crate implements a cycle-driven model of an inclusive, directory-style MESI/MSI
//! cache hierarchy with the following:
//! 1. **Protocol:** Commands, stable and transient line states, and the message type.
//! 2. **Cache:** Set-associative line store with sharer/owner tracking and replacement.
//! 3. **MSHR:** Per-address serialisation of requests, evictions and writebacks.
//! 4. **Coherence:** The per-cache protocol engine, including hierarchy-wide flushes.
//! 5. **SoC:** Cache controllers, root memories, requesters, routing and the builder.
//! 6. **Simulation:** Configuration, the cycle loop and statistics collection.

/// Common types and constants (addresses, errors, limits).
pub mod common;
/// Hierarchy configuration (defaults, enums, per-component and topology structures).
pub mod config;
/// Protocol vocabulary (commands, states, events).
pub mod protocol;
/// Cache line store (array, lines, hashing, replacement).
pub mod cache;
/// Miss-status holding registers.
pub mod mshr;
/// Coherence protocol engine.
pub mod coherence;
/// Cycle driver and event queue.
pub mod sim;
/// Hierarchy components (controllers, memory, requesters, routing, builder).
pub mod soc;
/// Statistics collection and reporting.
pub mod stats;

/// Root configuration type; deserialize from JSON or build from `Default::default()`.
pub use crate::config::HierarchyConfig;
/// Per-cache protocol engine.
pub use crate::coherence::CoherenceEngine;
/// Cycle driver over a set of components.
pub use crate::sim::Simulator;
/// Constructed hierarchy; build with `System::new`.
pub use crate::soc::System;
