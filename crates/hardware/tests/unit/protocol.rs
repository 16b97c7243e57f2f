//! Protocol Vocabulary Unit Tests.
//!
//! Verifies command classification and naming, state classification and statistic
//! names, and the construction of responses and NACKs from events.

use memhier_core::common::{line_base, line_offset};
use memhier_core::protocol::{Command, EventId, IdGenerator, MemEvent, State, flags};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn get_s(ids: &mut IdGenerator) -> MemEvent {
    let mut event = MemEvent::new(ids.next_id(), "cpu0", 0x1234, line_base(0x1234, 64), Command::GetS, 64);
    event.dst = "l1".to_owned();
    event
}

// ══════════════════════════════════════════════════════════
// 1. Addresses
// ══════════════════════════════════════════════════════════

/// Line base and offset split an address at the line size.
#[test]
fn line_arithmetic() {
    assert_eq!(line_base(0x1234, 64), 0x1200);
    assert_eq!(line_offset(0x1234, 64), 0x34);
    assert_eq!(line_base(0x1240, 64), 0x1240);
    assert_eq!(line_base(0x1234, 4096), 0x1000);
}

// ══════════════════════════════════════════════════════════
// 2. Commands
// ══════════════════════════════════════════════════════════

/// Requests map to the response that completes them.
#[rstest]
#[case(Command::GetS, Some(Command::GetSResp))]
#[case(Command::GetX, Some(Command::GetXResp))]
#[case(Command::GetSX, Some(Command::GetXResp))]
#[case(Command::FlushLineInv, Some(Command::FlushLineResp))]
#[case(Command::FlushAll, Some(Command::FlushAllResp))]
#[case(Command::ForwardFlush, Some(Command::AckFlush))]
#[case(Command::PutM, Some(Command::AckPut))]
#[case(Command::Inv, Some(Command::AckInv))]
#[case(Command::FetchInv, Some(Command::FetchResp))]
#[case(Command::FetchInvX, Some(Command::FetchXResp))]
#[case(Command::GetSResp, None)]
#[case(Command::AckInv, None)]
fn command_responses(#[case] cmd: Command, #[case] expected: Option<Command>) {
    assert_eq!(cmd.response(), expected);
}

/// NACKs of downward traffic travel up; NACKs of invalidations travel down.
#[rstest]
#[case(Command::GetS, true)]
#[case(Command::PutE, true)]
#[case(Command::FlushAll, true)]
#[case(Command::AckInv, true)]
#[case(Command::Inv, false)]
#[case(Command::FetchInvX, false)]
#[case(Command::GetXResp, false)]
fn command_direction(#[case] cmd: Command, #[case] down: bool) {
    assert_eq!(cmd.travels_down(), down);
}

/// Classification helpers agree with each other.
#[test]
fn command_classes() {
    for cmd in Command::ALL {
        if cmd.is_data_request() {
            assert!(cmd.is_flush_blockable(), "{cmd} should wait behind a flush");
        }
        if cmd.is_writeback() || cmd.is_invalidation() {
            assert!(!cmd.is_data_request());
        }
    }
    assert!(Command::FlushLine.is_flush_blockable());
    assert!(!Command::PutS.is_flush_blockable());
}

/// Names match the statistic keys.
#[test]
fn command_names() {
    assert_eq!(Command::NullCmd.to_string(), "NULLCMD");
    assert_eq!(Command::Nack.to_string(), "NACK");
    assert_eq!(Command::FetchInvX.to_string(), "FetchInvX");
    let names: std::collections::HashSet<&str> = Command::ALL.iter().map(|c| c.as_str()).collect();
    assert_eq!(names.len(), Command::ALL.len());
}

// ══════════════════════════════════════════════════════════
// 3. States
// ══════════════════════════════════════════════════════════

/// Only I, S, E, M and NP are stable; only NP and I hold no data.
#[test]
fn state_classes() {
    let stable: Vec<State> = State::ALL.into_iter().filter(|s| s.is_stable()).collect();
    assert_eq!(stable, vec![State::NP, State::I, State::S, State::E, State::M]);
    for state in State::ALL {
        assert_eq!(state.in_transition(), !state.is_stable());
    }
    assert!(!State::I.is_valid());
    assert!(State::IS.is_valid());
}

/// Statistic names drop the underscores of trace names.
#[rstest]
#[case(State::SInv, "S_Inv", "SInv")]
#[case(State::MInvX, "M_InvX", "MInvX")]
#[case(State::SB, "S_B", "SB")]
#[case(State::IM, "IM", "IM")]
fn state_names(#[case] state: State, #[case] trace: &str, #[case] stat: &str) {
    assert_eq!(state.to_string(), trace);
    assert_eq!(state.stat_name(), stat);
}

// ══════════════════════════════════════════════════════════
// 4. Events
// ══════════════════════════════════════════════════════════

/// Ids are unique per generator and carry its origin.
#[test]
fn id_generator_sequence() {
    let mut ids = IdGenerator::new(7);
    let a = ids.next_id();
    let b = ids.next_id();
    assert_eq!(a, EventId { origin: 7, seq: 0 });
    assert_eq!(b, EventId { origin: 7, seq: 1 });
    assert_eq!(b.to_string(), "7:1");
}

/// A new event is requested by its sender and has no destination yet.
#[test]
fn new_event_defaults() {
    let event = MemEvent::new(EventId::default(), "cpu0", 0x1234, 0x1200, Command::GetX, 64);
    assert_eq!(event.rqstr, "cpu0");
    assert!(event.dst.is_empty());
    assert_eq!(event.routing_address(), 0x1200);
    assert!(event.payload.is_empty());
    assert!(event.response_to.is_none());
}

/// Responses swap source and destination and point back at the request.
#[test]
fn response_construction() {
    let mut ids = IdGenerator::new(1);
    let mut request = get_s(&mut ids);
    request.set_flag(flags::LOCKED);
    request.payload = vec![1, 2, 3];

    let response = request.make_response(ids.next_id());
    assert_eq!(response.cmd, Command::GetSResp);
    assert_eq!(response.src, "l1");
    assert_eq!(response.dst, "cpu0");
    assert_eq!(response.rqstr, "cpu0");
    assert_eq!(response.response_to, Some(request.id));
    assert_eq!(response.base_addr, 0x1200);
    assert!(response.query_flag(flags::LOCKED));
    assert!(response.payload.is_empty());
}

/// A NACK carries the rejected event unchanged.
#[test]
fn nack_carries_event() {
    let mut ids = IdGenerator::new(1);
    let request = get_s(&mut ids);
    let nack = request.make_nack(ids.next_id());
    assert_eq!(nack.cmd, Command::Nack);
    assert_eq!(nack.nacked.as_deref(), Some(&request));
}

/// Flags combine and are queried as a set.
#[test]
fn flag_queries() {
    let mut event = MemEvent::new(EventId::default(), "cpu0", 0, 0, Command::GetS, 8);
    assert!(!event.is_noncacheable());
    event.set_flag(flags::NONCACHEABLE | flags::LLSC);
    assert!(event.is_noncacheable());
    assert!(event.query_flag(flags::LLSC));
    assert!(!event.query_flag(flags::LLSC | flags::NO_RESPONSE));
}

/// Only prefetches generated by the cache itself count as local.
#[test]
fn local_prefetch_detection() {
    let mut event = MemEvent::new(EventId::default(), "l1", 0, 0, Command::GetS, 64);
    assert!(!event.is_local_prefetch("l1"));
    event.prefetch = true;
    assert!(event.is_local_prefetch("l1"));
    assert!(!event.is_local_prefetch("l2"));
}

/// The eviction replay stores the victim in `addr` and the waiting address in `base_addr`.
#[test]
fn eviction_replay_addresses() {
    let replay = MemEvent::eviction_replay(EventId::default(), "l1", 0x40, 0x80);
    assert_eq!(replay.cmd, Command::NullCmd);
    assert_eq!(replay.addr, 0x40);
    assert_eq!(replay.base_addr, 0x80);
    assert_eq!(replay.src, "l1");
}
