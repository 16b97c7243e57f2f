//! Common utilities and types shared across the memory hierarchy.
//!
//! This module provides fundamental building blocks used by every component. It includes:
//! 1. **Addresses:** The address alias and line arithmetic helpers.
//! 2. **Constants:** Backoff, packet and watchdog constants.
//! 3. **Error Handling:** Protocol violations, configuration and driver errors.

/// Address alias and line arithmetic.
pub mod addr;

/// Common constants used throughout the hierarchy.
pub mod constants;

/// Error types.
pub mod error;

pub use addr::{Addr, line_base, line_offset};
pub use constants::MAX_BACKOFF_SHIFT;
pub use error::{ConfigError, ProtocolViolation, SimError};
