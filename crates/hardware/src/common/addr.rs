//! Address helpers.
//!
//! Addresses are plain byte addresses in the simulated physical address space. This module
//! provides:
//! 1. **Alias:** `Addr`, used everywhere a byte or line address is stored.
//! 2. **Line arithmetic:** Base-address and offset extraction for a power-of-two line size.

/// A byte address in the simulated physical address space.
pub type Addr = u64;

/// Returns the line-aligned base address containing `addr`.
///
/// # Arguments
///
/// * `addr` - Any byte address.
/// * `line_size` - Line size in bytes; must be a power of two.
///
/// # Returns
///
/// `addr` with the low `log2(line_size)` bits cleared.
#[inline(always)]
pub const fn line_base(addr: Addr, line_size: u64) -> Addr {
    addr & !(line_size - 1)
}

/// Returns the byte offset of `addr` within its line.
#[inline(always)]
pub const fn line_offset(addr: Addr, line_size: u64) -> u64 {
    addr & (line_size - 1)
}

/// Returns the line number (address divided by the line size).
#[inline(always)]
pub const fn line_number(addr: Addr, line_size: u64) -> u64 {
    addr / line_size
}
