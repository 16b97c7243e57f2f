//! Root Memory Tests.
//!
//! The memory answers after its fixed latency, stores writeback data and rejects commands
//! that never travel to the root of the hierarchy.

use memhier_core::common::{ProtocolViolation, SimError};
use memhier_core::config::MemoryConfig;
use memhier_core::protocol::{Command, EndpointKind, IdGenerator, MemEvent, flags};
use memhier_core::soc::memory::MemoryEndpoint;
use memhier_core::soc::traits::Endpoint;
use pretty_assertions::assert_eq;

use crate::common::harness::LINE;
use crate::common::mocks::transport::{MockLink, RecordingTransport};

const LATENCY: u64 = 10;

fn config() -> MemoryConfig {
    MemoryConfig {
        size: 4096,
        latency: LATENCY,
        ..MemoryConfig::default()
    }
}

fn memory(config: &MemoryConfig) -> MemoryEndpoint {
    MemoryEndpoint::new("mem", 3, config).expect("memory builds")
}

fn request(ids: &mut IdGenerator, cmd: Command, addr: u64) -> MemEvent {
    let mut event = MemEvent::new(ids.next_id(), "l2", addr, addr & !(LINE - 1), cmd, LINE);
    event.dst = "mem".to_owned();
    event
}

/// Delivers `event`, ticks once at `cycle` and returns what was sent.
fn exchange(memory: &mut MemoryEndpoint, event: MemEvent, cycle: u64) -> Result<Vec<MemEvent>, SimError> {
    let mut link = RecordingTransport::new();
    memory.receive(event);
    memory.tick(cycle, &mut link)?;
    Ok(link.take().into_iter().map(|s| s.event).collect())
}

// ══════════════════════════════════════════════════════════
// 1. Data responses
// ══════════════════════════════════════════════════════════

/// A GetS is answered exclusively, to its sender, after the configured latency.
#[test]
fn read_answered_after_latency() {
    let mut ids = IdGenerator::new(7);
    let mut mem = memory(&config());
    mem.write(0x80, &[0xab; LINE as usize]);
    let event = request(&mut ids, Command::GetS, 0x80);
    let id = event.id;

    let mut link = MockLink::new();
    link.expect_forward_by_destination()
        .withf(move |e, deliver_at| {
            *deliver_at == 5 + LATENCY
                && e.cmd == Command::GetXResp
                && e.response_to == Some(id)
                && e.dst == "l2"
                && e.src == "mem"
                && e.payload == vec![0xab; LINE as usize]
        })
        .times(1)
        .returning(|_, _| Ok(()));
    link.expect_forward_by_address().never();

    mem.receive(event);
    mem.tick(5, &mut link).expect("tick succeeds");
    assert!(mem.is_idle());
    assert_eq!(mem.stats().get("received_GetS"), 1);
    assert_eq!(mem.stats().get("eventSent_GetXResp"), 1);
}

/// Without exclusive grants a read is answered shared.
#[test]
fn shared_grant_when_configured() {
    let mut ids = IdGenerator::new(7);
    let mut mem = memory(&MemoryConfig {
        grant_exclusive: false,
        ..config()
    });
    let sent = exchange(&mut mem, request(&mut ids, Command::GetS, 0x40), 0).expect("tick succeeds");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].cmd, Command::GetSResp);
}

/// Non-cacheable reads return the exact bytes asked for and are never exclusive.
#[test]
fn noncacheable_read() {
    let mut ids = IdGenerator::new(7);
    let mut mem = memory(&config());
    mem.write(0x100, &[1, 2, 3, 4, 5, 6, 7, 8]);
    let mut event = request(&mut ids, Command::GetS, 0x102);
    event.size = 2;
    event.set_flag(flags::NONCACHEABLE);
    let sent = exchange(&mut mem, event, 0).expect("tick succeeds");
    assert_eq!(sent[0].cmd, Command::GetSResp);
    assert_eq!(sent[0].payload, vec![3, 4]);
}

/// Addresses beyond the store wrap around it.
#[test]
fn addresses_wrap() {
    let mut mem = memory(&config());
    mem.write(4096 + 0x10, &[0x77]);
    assert_eq!(mem.read(0x10, 1), vec![0x77]);
    assert_eq!(mem.read(2 * 4096 + 0x10, 1), vec![0x77]);
}

// ══════════════════════════════════════════════════════════
// 2. Writebacks and flushes
// ══════════════════════════════════════════════════════════

/// A dirty writeback lands in the store and is not acknowledged by default.
#[test]
fn writeback_stored_silently() {
    let mut ids = IdGenerator::new(7);
    let mut mem = memory(&config());
    let mut put = request(&mut ids, Command::PutM, 0xc0);
    put.payload = vec![0x5a; LINE as usize];
    put.dirty = true;
    let sent = exchange(&mut mem, put, 0).expect("tick succeeds");
    assert!(sent.is_empty());
    assert_eq!(mem.read(0xc0, LINE), vec![0x5a; LINE as usize]);
}

/// With acknowledgements enabled every writeback gets an AckPut.
#[test]
fn writeback_acknowledged() {
    let mut ids = IdGenerator::new(7);
    let mut mem = memory(&MemoryConfig {
        send_writeback_ack: true,
        ..config()
    });
    let sent = exchange(&mut mem, request(&mut ids, Command::PutS, 0xc0), 0).expect("tick succeeds");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].cmd, Command::AckPut);
    assert!(mem.init_coherence().sends_writeback_ack);
}

/// Line flushes store dirty data and always succeed.
#[test]
fn flush_line_succeeds() {
    let mut ids = IdGenerator::new(7);
    let mut mem = memory(&config());
    let mut flush = request(&mut ids, Command::FlushLineInv, 0x200);
    flush.payload = vec![0x11; LINE as usize];
    flush.dirty = true;
    let sent = exchange(&mut mem, flush, 0).expect("tick succeeds");
    assert_eq!(sent[0].cmd, Command::FlushLineResp);
    assert!(sent[0].success);
    assert_eq!(mem.read(0x200, 1), vec![0x11]);
}

/// A hierarchy-wide flush that reaches memory is acknowledged.
#[test]
fn flush_all_acknowledged() {
    let mut ids = IdGenerator::new(7);
    let mut mem = memory(&config());
    let sent = exchange(&mut mem, request(&mut ids, Command::FlushAll, 0), 0).expect("tick succeeds");
    assert_eq!(sent[0].cmd, Command::FlushAllResp);
    assert!(sent[0].success);
}

// ══════════════════════════════════════════════════════════
// 3. Errors and setup
// ══════════════════════════════════════════════════════════

/// Invalidations never reach memory; receiving one is a protocol violation.
#[test]
fn invalidation_rejected() {
    let mut ids = IdGenerator::new(7);
    let mut mem = memory(&config());
    let err = exchange(&mut mem, request(&mut ids, Command::Inv, 0x40), 0).unwrap_err();
    assert!(matches!(
        err,
        SimError::Protocol(ProtocolViolation::UnexpectedCommand { cmd: Command::Inv, .. })
    ));
}

/// The memory announces itself as a non-inclusive memory endpoint.
#[test]
fn announces_memory() {
    let init = memory(&config()).init_coherence();
    assert_eq!(init.kind, EndpointKind::Memory);
    assert_eq!(init.name, "mem");
    assert!(!init.inclusive);
    assert!(!init.sends_writeback_ack);
}
