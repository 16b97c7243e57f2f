//! Writeback Tests.
//!
//! Verifies how `PutS`, `PutE`, `PutM` and `PutX` update the line and its sharer records, and
//! the writeback-acknowledgment handshake in both directions.

use memhier_core::common::ProtocolViolation;
use memhier_core::config::CacheConfig;
use memhier_core::protocol::{Command, State};
use pretty_assertions::assert_eq;

use crate::common::harness::{EngineHarness, LINE, LOWER, commands, only, test_config};

const A: u64 = 0x0;
const B: u64 = 0x40;
const C: u64 = 0x80;

/// A fully associative two-line cache.
fn two_line_config() -> CacheConfig {
    CacheConfig {
        lines: 2,
        associativity: 2,
        ..test_config()
    }
}

/// Fills `A` and `B` shared for `cpu0`, then has `cpu0` drop both copies.
fn fill_and_release(h: &mut EngineHarness) {
    for addr in [A, B] {
        let _ = h.fill("cpu0", addr, Command::GetSResp, 0);
        let put = h.request(Command::PutS, "cpu0", addr);
        let _ = h.deliver(put).expect("PutS accepted");
    }
    assert!(h.settle().is_empty());
}

// ══════════════════════════════════════════════════════════
// 1. Upper-level writebacks
// ══════════════════════════════════════════════════════════

/// A dirty `PutM` stores the data and leaves the line modified with no owner.
#[test]
fn put_m_stores_dirty_data() {
    let mut h = EngineHarness::with_defaults();
    let _ = h.fill("cpu0", A, Command::GetXResp, 0);

    let mut put = h.request(Command::PutM, "cpu0", A);
    put.dirty = true;
    put.payload = vec![0x77; LINE as usize];
    assert_eq!(h.deliver(put), Ok(true));

    assert_eq!(h.engine.line_state(A), State::M);
    assert!(!h.line(A).has_owner());
    assert_eq!(h.line(A).data()[0], 0x77);
    assert!(h.settle().is_empty());
}

/// With writeback acknowledgments enabled the writer receives `AckPut`.
#[test]
fn put_acknowledged_when_configured() {
    let mut h = EngineHarness::new(&CacheConfig {
        send_writeback_ack: true,
        ..test_config()
    });
    let _ = h.fill("cpu0", A, Command::GetXResp, 0);

    let put = h.request(Command::PutE, "cpu0", A);
    let _ = h.deliver(put.clone()).expect("PutE accepted");
    let ack = only(&h.settle(), Command::AckPut).event;
    assert_eq!(ack.dst, "cpu0");
    assert_eq!(ack.response_to, Some(put.id));
    assert_eq!(h.engine.line_state(A), State::E);
}

/// `PutX` hands back ownership while the writer keeps a shared copy.
#[test]
fn put_x_keeps_sharer() {
    let mut h = EngineHarness::with_defaults();
    let _ = h.fill("cpu0", A, Command::GetXResp, 0);

    let mut put = h.request(Command::PutX, "cpu0", A);
    put.dirty = true;
    put.payload = vec![0x5a; LINE as usize];
    let _ = h.deliver(put).expect("PutX accepted");

    assert_eq!(h.engine.line_state(A), State::M);
    assert!(!h.line(A).has_owner());
    assert_eq!(h.sharers(A), vec!["cpu0"]);
}

/// A `PutS` from a sharer being invalidated stands in for its acknowledgment.
#[test]
fn put_s_answers_invalidation() {
    let mut h = EngineHarness::with_defaults();
    let _ = h.fill("cpu0", A, Command::GetSResp, 0);
    let inv = h.lower_request(Command::Inv, A);
    let _ = h.deliver(inv).expect("Inv accepted");
    let _ = only(&h.settle(), Command::Inv);

    let put = h.request(Command::PutS, "cpu0", A);
    let _ = h.deliver(put).expect("PutS accepted");
    assert_eq!(h.engine.line_state(A), State::S);

    let ack = only(&h.settle(), Command::AckInv);
    assert_eq!(ack.event.dst, LOWER);
    assert_eq!(h.engine.line_state(A), State::I);
    assert!(h.engine.awaited().is_empty());
}

// ══════════════════════════════════════════════════════════
// 2. Lower-level acknowledgments
// ══════════════════════════════════════════════════════════

/// An eviction waits for `AckPut` when the level below acknowledges writebacks.
#[test]
fn eviction_tracks_writeback() {
    let mut h = EngineHarness::new(&CacheConfig {
        expect_writeback_ack: true,
        ..two_line_config()
    });
    fill_and_release(&mut h);

    let request = h.request(Command::GetS, "cpu0", C);
    let _ = h.deliver(request).expect("GetS accepted");
    let sent = h.settle();
    assert_eq!(commands(&sent), vec![Command::PutS, Command::GetS]);
    assert_eq!(sent[0].event.base_addr, A);
    assert!(h.engine.mshr().pending_writeback(A));

    let ack = h.lower_request(Command::AckPut, A);
    assert_eq!(h.deliver(ack), Ok(true));
    assert!(!h.engine.mshr().pending_writeback(A));
}

/// An `AckPut` for a writeback that was never sent is a violation.
#[test]
fn unexpected_ack_put() {
    let mut h = EngineHarness::with_defaults();
    let ack = h.lower_request(Command::AckPut, A);
    assert!(matches!(
        h.deliver(ack),
        Err(ProtocolViolation::MissingRequest { cmd: Command::AckPut, .. })
    ));
}

/// Clean lines are dropped without a writeback when silent eviction is enabled.
#[test]
fn silent_clean_eviction() {
    let mut h = EngineHarness::new(&CacheConfig {
        silent_evict_clean: true,
        ..two_line_config()
    });
    fill_and_release(&mut h);

    let request = h.request(Command::GetS, "cpu0", C);
    let _ = h.deliver(request).expect("GetS accepted");
    assert_eq!(commands(&h.settle()), vec![Command::GetS]);
    assert_eq!(h.engine.line_state(A), State::I);
}
