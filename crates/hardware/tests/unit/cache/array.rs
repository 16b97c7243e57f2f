//! Cache Array Unit Tests.
//!
//! Verifies lookup, victim selection, retagging and deallocation, plus the line metadata
//! helpers.

use memhier_core::cache::{CacheArray, CacheLine};
use memhier_core::config::CacheConfig;
use memhier_core::protocol::State;
use pretty_assertions::assert_eq;

/// 4 sets of 2 ways, LRU, 64-byte lines. Addresses 0x0, 0x100 and 0x200 share set 0.
fn small_array() -> CacheArray {
    CacheArray::new(&CacheConfig {
        lines: 8,
        associativity: 2,
        ..CacheConfig::default()
    })
}

fn install(array: &mut CacheArray, addr: u64, state: State) -> usize {
    let idx = array.find_replacement_candidate(addr);
    array.replace(addr, idx);
    array.line_mut(idx).set_state(state);
    idx
}

// ══════════════════════════════════════════════════════════
// 1. Geometry and Lookup
// ══════════════════════════════════════════════════════════

/// Geometry follows the configuration.
#[test]
fn geometry() {
    let array = small_array();
    assert_eq!(array.sets(), 4);
    assert_eq!(array.ways(), 2);
    assert_eq!(array.line_size(), 64);
    assert_eq!(array.set_of(0x0), 0);
    assert_eq!(array.set_of(0x40), 1);
    assert_eq!(array.set_of(0x100), 0);
    assert_eq!(array.lines().count(), 8);
}

/// Lookup never allocates.
#[test]
fn lookup_miss() {
    let mut array = small_array();
    assert_eq!(array.lookup(0x40, true), None);
    assert_eq!(array.peek(0x40), None);
    assert!(array.valid_addresses().is_empty());
}

/// A retagged line is found by its new address and starts out invalid.
#[test]
fn replace_maps_address() {
    let mut array = small_array();
    let idx = array.find_replacement_candidate(0x40);
    array.replace(0x40, idx);

    assert_eq!(array.peek(0x40), Some(idx));
    assert_eq!(array.line(idx).base_addr(), 0x40);
    assert_eq!(array.line(idx).state(), State::I);
    assert_eq!(array.set_of(0x40), idx / array.ways());
}

// ══════════════════════════════════════════════════════════
// 2. Replacement
// ══════════════════════════════════════════════════════════

/// Invalid ways are used before the policy is consulted.
#[test]
fn invalid_way_first() {
    let mut array = small_array();
    let a = install(&mut array, 0x0, State::S);
    let b = install(&mut array, 0x100, State::S);
    assert_ne!(a, b);
    assert_eq!(a / 2, b / 2);
}

/// With the set full, the least recently used line is the candidate.
#[test]
fn lru_candidate() {
    let mut array = small_array();
    let a = install(&mut array, 0x0, State::S);
    let b = install(&mut array, 0x100, State::E);

    assert_eq!(array.find_replacement_candidate(0x200), a);
    let _ = array.lookup(0x0, true);
    assert_eq!(array.find_replacement_candidate(0x200), b);
}

/// A lookup without replacement update leaves the victim unchanged.
#[test]
fn lookup_without_update() {
    let mut array = small_array();
    let a = install(&mut array, 0x0, State::S);
    let _ = install(&mut array, 0x100, State::S);
    let _ = array.lookup(0x0, false);
    assert_eq!(array.find_replacement_candidate(0x200), a);
}

/// Retagging a victim unmaps its previous address.
#[test]
fn replace_unmaps_previous() {
    let mut array = small_array();
    let a = install(&mut array, 0x0, State::M);
    let _ = install(&mut array, 0x100, State::S);
    array.line_mut(a).set_state(State::I);
    array.replace(0x200, a);

    assert_eq!(array.peek(0x0), None);
    assert_eq!(array.peek(0x200), Some(a));
}

/// Deallocation invalidates and unmaps the line.
#[test]
fn deallocate_line() {
    let mut array = small_array();
    let a = install(&mut array, 0x0, State::S);
    array.line_mut(a).add_sharer("cpu0");
    array.line_mut(a).set_data(&[7; 64]);
    array.deallocate(a);

    assert_eq!(array.peek(0x0), None);
    assert_eq!(array.line(a).state(), State::I);
    assert!(!array.line(a).has_sharers());
    assert!(array.line(a).data().iter().all(|&b| b == 0));
}

/// Only lines in a valid state are reported.
#[test]
fn valid_addresses_filter() {
    let mut array = small_array();
    let _ = install(&mut array, 0x0, State::S);
    let _ = install(&mut array, 0x40, State::IS);
    let idx = array.find_replacement_candidate(0x80);
    array.replace(0x80, idx);

    let valid: Vec<u64> = array.valid_addresses().into_iter().collect();
    assert_eq!(valid, vec![0x0, 0x40]);
}

/// The status dump shows owners and sharers of valid lines.
#[test]
fn status_dump() {
    let mut array = small_array();
    let a = install(&mut array, 0x40, State::E);
    array.line_mut(a).set_owner("cpu1");
    let mut out = String::new();
    array.print_status(&mut out).expect("write to string");
    assert!(out.contains("4 sets x 2 ways"));
    assert!(out.contains("owner=cpu1"));
}

// ══════════════════════════════════════════════════════════
// 3. Line Metadata
// ══════════════════════════════════════════════════════════

/// Sharers are kept sorted and queried by name.
#[test]
fn line_sharers() {
    let mut line = CacheLine::new(0, 64);
    line.add_sharer("cpu1");
    line.add_sharer("cpu0");
    line.add_sharer("cpu1");

    assert_eq!(line.sharers().iter().collect::<Vec<_>>(), vec!["cpu0", "cpu1"]);
    assert!(line.is_sharer("cpu0"));
    assert!(line.has_other_sharers("cpu0"));
    line.remove_sharer("cpu1");
    assert!(!line.has_other_sharers("cpu0"));
}

/// Entering I drops the sharers and the owner.
#[test]
fn line_invalidation_clears_tracking() {
    let mut line = CacheLine::new(3, 64);
    line.set_state(State::E);
    line.set_owner("cpu0");
    assert!(line.is_owner("cpu0"));
    line.set_state(State::I);
    assert!(!line.has_owner());
    assert_eq!(line.owner(), None);
    assert_eq!(line.index(), 3);
}

/// Data writes are truncated to the line size.
#[test]
fn line_data_truncated() {
    let mut line = CacheLine::new(0, 4);
    line.set_data(&[1, 2, 3, 4, 5, 6]);
    assert_eq!(line.data(), &[1, 2, 3, 4]);
    line.set_data(&[9]);
    assert_eq!(line.data(), &[9, 2, 3, 4]);
}

/// Reset clears the timestamp and prefetch flag.
#[test]
fn line_reset() {
    let mut line = CacheLine::new(0, 8);
    line.set_timestamp(42);
    line.set_prefetch(true);
    line.set_state(State::S);
    line.reset();
    assert_eq!(line.timestamp(), 0);
    assert!(!line.prefetch());
    assert_eq!(line.state(), State::I);
}
