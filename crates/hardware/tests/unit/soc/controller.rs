//! Cache Controller Tests.
//!
//! Covers what the controller adds around the engine: per-cycle admission limits, bank
//! conflicts, flush gating, non-cacheable pass-through and error reporting.

use memhier_core::common::{ProtocolViolation, SimError};
use memhier_core::config::CacheConfig;
use memhier_core::protocol::{Command, EndpointKind, IdGenerator, InitCoherence, MemEvent, State, flags};
use memhier_core::soc::controller::CacheController;
use memhier_core::soc::traits::Endpoint;
use pretty_assertions::assert_eq;

use crate::common::harness::{CACHE, LINE, LOWER, test_config};
use crate::common::mocks::transport::RecordingTransport;

struct Rig {
    cache: CacheController,
    link: RecordingTransport,
    ids: IdGenerator,
    cycle: u64,
}

impl Rig {
    fn new(config: &CacheConfig) -> Self {
        Self {
            cache: CacheController::new(CACHE, 1, config).expect("config is valid"),
            link: RecordingTransport::new(),
            ids: IdGenerator::new(50),
            cycle: 0,
        }
    }

    fn event(&mut self, cmd: Command, src: &str, addr: u64) -> MemEvent {
        let mut event = MemEvent::new(self.ids.next_id(), src, addr, addr, cmd, LINE);
        event.dst = CACHE.to_owned();
        event
    }

    fn tick(&mut self) -> Result<(), SimError> {
        let result = self.cache.tick(self.cycle, &mut self.link);
        self.cycle += 1;
        result
    }

    /// Ticks until the controller is idle, for at most `limit` cycles.
    fn drain(&mut self, limit: u64) {
        for _ in 0..limit {
            self.tick().expect("tick succeeds");
            if self.cache.is_idle() {
                return;
            }
        }
    }
}

// ══════════════════════════════════════════════════════════
// 1. Admission
// ══════════════════════════════════════════════════════════

/// At most `max_requests_per_cycle` messages reach the engine each cycle.
#[test]
fn request_limit_per_cycle() {
    let mut rig = Rig::new(&CacheConfig {
        max_requests_per_cycle: 1,
        ..test_config()
    });
    let first = rig.event(Command::GetS, "cpu0", 0x0);
    let second = rig.event(Command::GetS, "cpu0", 0x40);
    rig.cache.receive(first);
    rig.cache.receive(second);

    rig.tick().expect("tick succeeds");
    assert_eq!(rig.cache.queued(), 1);
    assert_eq!(rig.cache.engine().line_state(0x0), State::IS);
    rig.tick().expect("tick succeeds");
    assert_eq!(rig.cache.queued(), 0);
    assert_eq!(rig.cache.engine().line_state(0x40), State::IS);
}

/// Two requests to the same bank cannot start in the same cycle.
#[test]
fn bank_conflict_holds_request() {
    let mut rig = Rig::new(&CacheConfig {
        banks: 2,
        ..test_config()
    });
    let a = rig.event(Command::GetS, "cpu0", 0x0);
    let same_bank = rig.event(Command::GetS, "cpu0", 0x80);
    let other_bank = rig.event(Command::GetS, "cpu0", 0x40);
    rig.cache.receive(a);
    rig.cache.receive(same_bank);
    rig.cache.receive(other_bank);

    rig.tick().expect("tick succeeds");
    assert_eq!(rig.cache.queued(), 1);
    assert_eq!(rig.cache.engine().line_state(0x40), State::IS);
    assert_eq!(rig.cache.engine().line_state(0x80), State::I);
}

/// Upper-level requests wait while a forwarded flush holds the cache.
#[test]
fn flush_gates_requests() {
    let mut rig = Rig::new(&test_config());
    let forward = rig.event(Command::ForwardFlush, LOWER, 0);
    rig.cache.receive(forward);
    rig.drain(8);
    assert!(rig.link.take().iter().any(|s| s.event.cmd == Command::AckFlush));

    let request = rig.event(Command::GetS, "cpu0", 0x0);
    rig.cache.receive(request);
    rig.tick().expect("tick succeeds");
    assert_eq!(rig.cache.queued(), 1);

    let unblock = rig.event(Command::UnblockFlush, LOWER, 0);
    rig.cache.receive(unblock);
    rig.tick().expect("tick succeeds");
    assert_eq!(rig.cache.queued(), 1);
    rig.tick().expect("tick succeeds");
    assert_eq!(rig.cache.queued(), 0);
    assert_eq!(rig.cache.engine().line_state(0x0), State::IS);
}

// ══════════════════════════════════════════════════════════
// 2. Non-cacheable traffic
// ══════════════════════════════════════════════════════════

/// A non-cacheable request goes straight down and its answer straight back.
#[test]
fn noncacheable_pass_through() {
    let mut rig = Rig::new(&test_config());
    let mut read = rig.event(Command::GetS, "cpu0", 0x100);
    read.set_flag(flags::NONCACHEABLE);
    rig.cache.receive(read.clone());
    rig.tick().expect("tick succeeds");
    rig.tick().expect("tick succeeds");

    let down = rig.link.take();
    assert_eq!(down.len(), 1);
    assert!(down[0].by_address);
    assert_eq!(down[0].event.src, CACHE);
    assert!(!rig.cache.is_idle());

    let mut response = down[0].event.make_response_with(rig.ids.next_id(), Command::GetSResp);
    response.src = "mem".to_owned();
    rig.cache.receive(response);
    rig.tick().expect("tick succeeds");
    rig.tick().expect("tick succeeds");

    let up = rig.link.take();
    assert_eq!(up.len(), 1);
    assert!(!up[0].by_address);
    assert_eq!(up[0].event.dst, "cpu0");
    assert_eq!(up[0].event.response_to, Some(read.id));
    assert_eq!(rig.cache.engine().line_state(0x100), State::I);
    assert!(rig.cache.is_idle());
}

/// Pass-through traffic leaves one cycle after it arrives, in either direction.
#[test]
fn noncacheable_forwarded_next_cycle() {
    let mut rig = Rig::new(&test_config());
    let mut write = rig.event(Command::GetX, "cpu1", 0x140);
    write.set_flag(flags::NONCACHEABLE);
    rig.cache.receive(write);
    rig.tick().expect("tick succeeds");
    assert!(rig.link.take().is_empty());
    rig.tick().expect("tick succeeds");
    let down = rig.link.take();
    assert_eq!(down.len(), 1);
    assert_eq!(down[0].deliver_at, 1);
    assert!(down[0].event.dst.is_empty());

    let mut response = down[0].event.make_response_with(rig.ids.next_id(), Command::GetXResp);
    response.src = "mem".to_owned();
    rig.cache.receive(response);
    rig.tick().expect("tick succeeds");
    assert!(rig.link.take().is_empty());
    rig.tick().expect("tick succeeds");
    let up = rig.link.take();
    assert_eq!(up.len(), 1);
    assert_eq!(up[0].deliver_at, 3);
    assert_eq!(up[0].event.src, CACHE);
    assert_eq!(up[0].event.dst, "cpu1");
}

/// A non-cacheable response nobody asked for is a violation.
#[test]
fn unmatched_noncacheable_response() {
    let mut rig = Rig::new(&test_config());
    let mut response = rig.event(Command::GetSResp, "mem", 0x100);
    response.set_flag(flags::NONCACHEABLE);
    rig.cache.receive(response);
    assert!(matches!(
        rig.tick(),
        Err(SimError::Protocol(ProtocolViolation::MissingRequest { .. }))
    ));
}

// ══════════════════════════════════════════════════════════
// 3. Errors and setup
// ══════════════════════════════════════════════════════════

/// Engine violations surface from `tick`.
#[test]
fn violation_aborts_tick() {
    let mut rig = Rig::new(&test_config());
    let put = rig.event(Command::PutM, "cpu0", 0x0);
    rig.cache.receive(put);
    assert!(matches!(
        rig.tick(),
        Err(SimError::Protocol(ProtocolViolation::UnhandledState { cmd: Command::PutM, .. }))
    ));
}

/// The init exchange teaches the cache whether its writebacks will be acknowledged.
#[test]
fn init_from_memory() {
    let mut cache = CacheController::new(CACHE, 1, &test_config()).expect("config is valid");
    assert!(!cache.init_coherence().expects_writeback_ack);

    let memory = InitCoherence {
        name: "mem".to_owned(),
        kind: EndpointKind::Memory,
        inclusive: false,
        sends_writeback_ack: true,
        expects_writeback_ack: false,
        line_size: 0,
        tracks_presence: false,
    };
    cache.apply_init(&memory);
    let announced = cache.init_coherence();
    assert!(announced.expects_writeback_ack);
    assert_eq!(announced.kind, EndpointKind::Cache);
    assert!(announced.inclusive);
}
