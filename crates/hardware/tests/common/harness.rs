use memhier_core::System;
use memhier_core::cache::CacheLine;
use memhier_core::coherence::CoherenceEngine;
use memhier_core::common::{Addr, ProtocolViolation, line_base};
use memhier_core::config::{CacheConfig, Protocol};
use memhier_core::protocol::{Command, IdGenerator, MemEvent};
use tracing_subscriber::EnvFilter;

use crate::common::mocks::transport::{RecordingTransport, Sent};

/// Name of the cache driven by [`EngineHarness`].
pub const CACHE: &str = "l1";

/// Name used for the component below the harness cache.
pub const LOWER: &str = "l2";

/// Line size used throughout the tests.
pub const LINE: u64 = 64;

/// Cycles [`EngineHarness::settle`] may advance before giving up.
const SETTLE_LIMIT: usize = 256;

/// Installs a test subscriber once; `RUST_LOG` selects what is printed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A small 4-set, 4-way MESI cache that is not the last level.
pub fn test_config() -> CacheConfig {
    CacheConfig {
        lines: 16,
        associativity: 4,
        ..CacheConfig::default()
    }
}

/// [`test_config`] with the MSI protocol.
pub fn msi_config() -> CacheConfig {
    CacheConfig {
        protocol: Protocol::Msi,
        ..test_config()
    }
}

/// Drives one coherence engine without a simulator.
///
/// Events are handed straight to the engine; whatever it sends is captured by a
/// [`RecordingTransport`]. `settle` plays the role of the controller: it replays scheduled
/// events and advances time until every outgoing queue has drained.
pub struct EngineHarness {
    pub engine: CoherenceEngine,
    pub link: RecordingTransport,
    ids: IdGenerator,
    now: u64,
}

impl EngineHarness {
    pub fn new(config: &CacheConfig) -> Self {
        init_tracing();
        Self {
            engine: CoherenceEngine::new(CACHE, 1, config).expect("test config is valid"),
            link: RecordingTransport::new(),
            ids: IdGenerator::new(99),
            now: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&test_config())
    }

    /// Current harness time.
    pub const fn now(&self) -> u64 {
        self.now
    }

    /// A request from the upper-level agent `src`.
    pub fn request(&mut self, cmd: Command, src: &str, addr: Addr) -> MemEvent {
        let mut event = MemEvent::new(self.ids.next_id(), src, addr, line_base(addr, LINE), cmd, LINE);
        event.dst = CACHE.to_owned();
        event
    }

    /// A request from the lower level.
    pub fn lower_request(&mut self, cmd: Command, addr: Addr) -> MemEvent {
        self.request(cmd, LOWER, addr)
    }

    /// The lower level's answer to an event the cache forwarded, optionally filled with `fill`.
    pub fn respond(&mut self, forwarded: &MemEvent, cmd: Command, fill: Option<u8>) -> MemEvent {
        let mut response = forwarded.make_response_with(self.ids.next_id(), cmd);
        response.src = "mem".to_owned();
        response.dst = CACHE.to_owned();
        if let Some(byte) = fill {
            response.payload = vec![byte; LINE as usize];
        }
        response
    }

    /// The addressee's answer to an event the cache sent by destination.
    pub fn reply(&mut self, to: &MemEvent, cmd: Command) -> MemEvent {
        to.make_response_with(self.ids.next_id(), cmd)
    }

    /// Hands `event` to the engine at the current time.
    pub fn deliver(&mut self, event: MemEvent) -> Result<bool, ProtocolViolation> {
        self.engine.set_timestamp(self.now);
        self.engine.handle_event(event, false)
    }

    /// Runs replays and drains both outgoing queues, advancing time as needed.
    ///
    /// # Returns
    ///
    /// Everything sent while settling, in send order.
    pub fn settle(&mut self) -> Vec<Sent> {
        for _ in 0..SETTLE_LIMIT {
            self.engine.set_timestamp(self.now);
            for event in self.engine.take_retry_buffer() {
                let _ = self.engine.replay(event).expect("replay succeeds");
            }
            let _ = self.engine.send_outgoing(&mut self.link).expect("transport accepts");
            let drained = self.engine.outgoing_down().next().is_none() && self.engine.outgoing_up().next().is_none();
            if drained && !self.engine.has_retries() {
                break;
            }
            self.now += 1;
        }
        self.link.take()
    }

    /// Misses on `addr` for `src` and completes the fill with `grant` from memory.
    ///
    /// # Returns
    ///
    /// What the cache sent toward `src` once the fill arrived.
    pub fn fill(&mut self, src: &str, addr: Addr, grant: Command, byte: u8) -> Vec<Sent> {
        let request = self.request(Command::GetS, src, addr);
        let _ = self.deliver(request).expect("GetS accepted");
        let forwarded = only(&self.settle(), Command::GetS).event;
        let response = self.respond(&forwarded, grant, Some(byte));
        let _ = self.deliver(response).expect("fill accepted");
        self.settle()
    }

    /// The line holding `addr`; panics if none does.
    pub fn line(&self, addr: Addr) -> &CacheLine {
        let idx = self.engine.array().peek(addr).expect("line is allocated");
        self.engine.array().line(idx)
    }

    /// Sorted sharers of the line holding `addr`.
    pub fn sharers(&self, addr: Addr) -> Vec<String> {
        self.line(addr).sharers().iter().cloned().collect()
    }
}

/// The single sent event with command `cmd`; panics unless exactly one matches.
pub fn only(sent: &[Sent], cmd: Command) -> Sent {
    let matches: Vec<&Sent> = sent.iter().filter(|s| s.event.cmd == cmd).collect();
    assert_eq!(matches.len(), 1, "expected exactly one {cmd}, sent: {sent:?}");
    matches[0].clone()
}

/// Commands of `sent`, in order.
pub fn commands(sent: &[Sent]) -> Vec<Command> {
    sent.iter().map(|s| s.event.cmd).collect()
}

/// One last-level MESI cache `l2` between two requesters and memory.
pub const SINGLE_LEVEL: &str = r#"{
    "caches": [
        { "name": "l2",
          "params": { "lines": 16, "associativity": 4, "last_level": true, "flush_manager": true },
          "down": [ { "target": "mem" } ] }
    ],
    "memories": [ { "name": "mem", "params": { "size": 1048576, "latency": 10 } } ],
    "requesters": [
        { "name": "cpu0", "cache": "l2" },
        { "name": "cpu1", "cache": "l2" }
    ]
}"#;

/// Two private L1s over a shared last-level L2.
pub const TWO_LEVEL: &str = r#"{
    "caches": [
        { "name": "l1_0", "params": { "lines": 8, "associativity": 2 }, "down": [ { "target": "l2" } ] },
        { "name": "l1_1", "params": { "lines": 8, "associativity": 2 }, "down": [ { "target": "l2" } ] },
        { "name": "l2",
          "params": { "lines": 32, "associativity": 4, "last_level": true, "access_latency": 4 },
          "down": [ { "target": "mem" } ] }
    ],
    "memories": [ { "name": "mem", "params": { "size": 1048576, "latency": 20 } } ],
    "requesters": [
        { "name": "cpu0", "cache": "l1_0" },
        { "name": "cpu1", "cache": "l1_1" }
    ]
}"#;

/// Builds a hierarchy from JSON with tracing enabled.
pub fn build_system(json: &str) -> System {
    init_tracing();
    System::from_json(json).expect("hierarchy builds")
}

/// Issues `cmd` from `requester` and runs the hierarchy until it is idle.
///
/// # Returns
///
/// The response command the requester received.
pub fn issue_and_run(system: &mut System, requester: &str, cmd: Command, addr: Addr) -> Command {
    let id = system
        .simulator
        .requester_mut(requester)
        .expect("requester exists")
        .issue(cmd, addr);
    let _ = system.run().expect("hierarchy goes idle");
    system
        .simulator
        .requester(requester)
        .and_then(|r| r.completion(id))
        .map(|c| c.response)
        .expect("request completed")
}
