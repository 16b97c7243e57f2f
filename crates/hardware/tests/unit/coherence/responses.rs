//! Response Timing Tests.
//!
//! Fills and hits through a cache whose latencies are all zero, where every send time is
//! the current cycle.

use memhier_core::config::CacheConfig;
use memhier_core::protocol::{Command, State};
use pretty_assertions::assert_eq;

use crate::common::harness::{EngineHarness, only, test_config};

const ADDR: u64 = 0x3000;

fn zero_latency() -> CacheConfig {
    CacheConfig {
        access_latency: 0,
        tag_latency: Some(0),
        mshr_latency: 0,
        ..test_config()
    }
}

/// A shared fill is answered in the cycle it arrives.
#[test]
fn shared_fill_without_latency() {
    let mut h = EngineHarness::new(&zero_latency());
    let sent = h.fill("cpu0", ADDR, Command::GetSResp, 1);
    let response = only(&sent, Command::GetSResp);
    assert_eq!(response.deliver_at, 0);
    assert_eq!(h.engine.line_state(ADDR), State::S);
    assert_eq!(h.line(ADDR).timestamp(), 0);
}

/// An exclusive fill for a read grants E without any delay.
#[test]
fn exclusive_fill_without_latency() {
    let mut h = EngineHarness::new(&zero_latency());
    let sent = h.fill("cpu0", ADDR, Command::GetXResp, 2);
    assert_eq!(only(&sent, Command::GetXResp).deliver_at, 0);
    assert_eq!(h.engine.line_state(ADDR), State::E);
    assert_eq!(h.line(ADDR).owner(), Some("cpu0"));
}

/// A write miss completes to M without any delay.
#[test]
fn write_fill_without_latency() {
    let mut h = EngineHarness::new(&zero_latency());
    let request = h.request(Command::GetX, "cpu0", ADDR);
    let _ = h.deliver(request).expect("GetX accepted");
    let forwarded = only(&h.settle(), Command::GetX).event;
    let response = h.respond(&forwarded, Command::GetXResp, Some(3));
    assert_eq!(h.deliver(response), Ok(true));
    let sent = h.settle();
    assert_eq!(only(&sent, Command::GetXResp).deliver_at, 0);
    assert_eq!(h.engine.line_state(ADDR), State::M);
}

/// A read hit on a shared line is answered in the same cycle.
#[test]
fn hit_without_latency() {
    let mut h = EngineHarness::new(&zero_latency());
    let _ = h.fill("cpu0", ADDR, Command::GetSResp, 4);
    let request = h.request(Command::GetS, "cpu1", ADDR);
    assert_eq!(h.deliver(request), Ok(true));
    let sent = h.settle();
    assert_eq!(only(&sent, Command::GetSResp).event.payload, vec![4; 64]);
    assert_eq!(h.sharers(ADDR), vec!["cpu0", "cpu1"]);
}
