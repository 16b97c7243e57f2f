//! Hierarchy components.
//!
//! This module organizes the components that make up a simulated memory hierarchy,
//! including the cache controllers, root memories, traffic sources, the address router
//! and the builder that assembles them.

/// Hierarchy builder.
pub mod builder;

/// Clocked wrapper around one coherence engine.
pub mod controller;

/// Address routing toward lower components.
pub mod interconnect;

/// Root memory endpoint and its backing store.
pub mod memory;

/// Processor-side traffic sources.
pub mod requester;

/// Transport and endpoint trait definitions.
pub mod traits;

pub use builder::System;
