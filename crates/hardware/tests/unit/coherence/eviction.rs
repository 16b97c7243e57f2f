//! Eviction Tests.
//!
//! A miss that needs a line held by upper levels must first recall every copy. These tests
//! follow the victim through its invalidation state, the deferred eviction replay and the
//! writeback, and check that the waiting miss is then forwarded.

use memhier_core::config::CacheConfig;
use memhier_core::protocol::{Command, State};
use pretty_assertions::assert_eq;

use crate::common::harness::{CACHE, EngineHarness, LINE, commands, only, test_config};

const A: u64 = 0x0;
const B: u64 = 0x40;
const C: u64 = 0x80;

fn two_line_harness() -> EngineHarness {
    EngineHarness::new(&CacheConfig {
        lines: 2,
        associativity: 2,
        ..test_config()
    })
}

// ══════════════════════════════════════════════════════════
// 1. Owned victim
// ══════════════════════════════════════════════════════════

/// The owner of the victim is asked for its data before the miss proceeds.
#[test]
fn owned_victim_recalled() {
    let mut h = two_line_harness();
    let _ = h.fill("cpu0", A, Command::GetXResp, 0);
    let _ = h.fill("cpu0", B, Command::GetXResp, 0);

    let request = h.request(Command::GetS, "cpu1", C);
    assert_eq!(h.deliver(request), Ok(true));
    let fetch = only(&h.settle(), Command::FetchInv).event;
    assert_eq!(fetch.dst, "cpu0");
    assert_eq!(fetch.base_addr, A);
    assert_eq!(fetch.rqstr, CACHE);
    assert_eq!(h.engine.line_state(A), State::EInv);
    assert_eq!(h.engine.mshr().evict_pointers(A), vec![C]);
    assert_eq!(h.engine.stats().get("evict_E"), 1);

    let mut response = h.reply(&fetch, Command::FetchResp);
    response.dirty = true;
    response.payload = vec![0x11; LINE as usize];
    let _ = h.deliver(response).expect("FetchResp accepted");

    let sent = h.settle();
    assert_eq!(commands(&sent), vec![Command::PutM, Command::GetS]);
    let put = &sent[0].event;
    assert_eq!(put.base_addr, A);
    assert!(put.dirty);
    assert_eq!(put.payload, vec![0x11; LINE as usize]);
    assert_eq!(sent[1].event.base_addr, C);

    assert!(h.engine.array().peek(A).is_none());
    assert_eq!(h.engine.line_state(C), State::IS);
    assert_eq!(h.engine.stats().get("evict_M"), 1);
    assert!(h.engine.mshr().evict_pointers(A).is_empty());
}

/// The miss completes normally once the victim is gone.
#[test]
fn miss_completes_after_eviction() {
    let mut h = two_line_harness();
    let _ = h.fill("cpu0", A, Command::GetXResp, 0);
    let _ = h.fill("cpu0", B, Command::GetXResp, 0);

    let request = h.request(Command::GetS, "cpu1", C);
    let _ = h.deliver(request).expect("GetS accepted");
    let fetch = only(&h.settle(), Command::FetchInv).event;
    let response = h.reply(&fetch, Command::FetchResp);
    let _ = h.deliver(response).expect("FetchResp accepted");
    let sent = h.settle();
    let _ = only(&sent, Command::PutE);
    let forwarded = only(&sent, Command::GetS).event;

    let fill = h.respond(&forwarded, Command::GetXResp, Some(0x22));
    let _ = h.deliver(fill).expect("fill accepted");
    let grant = only(&h.settle(), Command::GetXResp);
    assert_eq!(grant.event.dst, "cpu1");
    assert_eq!(h.engine.line_state(C), State::E);
    assert!(h.engine.is_idle());
}

// ══════════════════════════════════════════════════════════
// 2. Shared victim
// ══════════════════════════════════════════════════════════

/// Every sharer of the victim must acknowledge before the writeback goes out.
#[test]
fn shared_victim_waits_for_all_sharers() {
    let mut h = two_line_harness();
    let _ = h.fill("cpu0", A, Command::GetSResp, 0);
    let hit = h.request(Command::GetS, "cpu1", A);
    let _ = h.deliver(hit).expect("GetS accepted");
    let _ = h.settle();
    let _ = h.fill("cpu0", B, Command::GetSResp, 0);

    let request = h.request(Command::GetS, "cpu0", C);
    let _ = h.deliver(request).expect("GetS accepted");
    let sent = h.settle();
    assert_eq!(commands(&sent), vec![Command::Inv, Command::Inv]);
    assert_eq!(h.engine.line_state(A), State::SInv);

    let first = h.reply(&sent[0].event, Command::AckInv);
    let _ = h.deliver(first).expect("AckInv accepted");
    assert!(h.settle().is_empty());
    assert_eq!(h.engine.line_state(A), State::SInv);

    let second = h.reply(&sent[1].event, Command::AckInv);
    let _ = h.deliver(second).expect("AckInv accepted");
    assert_eq!(commands(&h.settle()), vec![Command::PutS, Command::GetS]);
    assert!(h.engine.array().peek(A).is_none());
    assert_eq!(h.engine.line_state(C), State::IS);
}

/// A victim with no upper copies is written back at once.
#[test]
fn unshared_victim_evicted_immediately() {
    let mut h = two_line_harness();
    for addr in [A, B] {
        let _ = h.fill("cpu0", addr, Command::GetXResp, 0);
        let mut put = h.request(Command::PutM, "cpu0", addr);
        put.dirty = true;
        put.payload = vec![0x44; LINE as usize];
        let _ = h.deliver(put).expect("PutM accepted");
    }

    let request = h.request(Command::GetX, "cpu1", C);
    let _ = h.deliver(request).expect("GetX accepted");
    let sent = h.settle();
    assert_eq!(commands(&sent), vec![Command::PutM, Command::GetX]);
    assert!(sent[0].event.dirty);
    assert_eq!(h.engine.line_state(C), State::IM);
}
