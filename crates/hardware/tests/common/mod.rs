//! Shared test infrastructure.

/// Engine and hierarchy harnesses.
pub mod harness;
