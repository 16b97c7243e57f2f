//! MESI/MSI inclusive coherence engine.
//!
//! One `CoherenceEngine` runs the protocol for one cache. It provides:
//! 1. **Dispatch:** One handler per inbound command, each a transition over the line state.
//! 2. **Ownership:** Exclusive ownership of the line store, MSHR and responses-awaited map.
//! 3. **Delivery:** Timed outgoing queues toward memory and toward the processors.
//! 4. **Replay:** A retry buffer of events to reprocess once a blocking condition clears.
//! 5. **Flush-all:** The hierarchy-wide flush state machine for this cache.
//!
//! Handlers return `Ok(true)` when the event was consumed, `Ok(false)` for a locally
//! generated prefetch that could not be accepted, and `Err` for a protocol violation.

/// Responses-awaited map for invalidations and fetches.
pub mod awaited;
/// Eviction path and the internal eviction replay.
mod eviction;
/// Hierarchy-wide flush coordination.
pub mod flush;
/// Invalidation and fetch requests from the lower level.
mod invalidations;
/// Request latency tracking.
pub mod latency;
/// Timed outgoing queues.
pub mod outgoing;
/// Demand requests and line flushes from the upper level.
mod requests;
/// Responses, acknowledgments and NACKs.
mod responses;
/// Cleanup after resolved transactions and replay scheduling.
mod retry;
/// Message construction and timing.
mod send;
/// Writebacks from the upper level.
mod writebacks;

use std::fmt;

use tracing::{debug, trace};

use self::awaited::AwaitedResponses;
use self::flush::{FlushControl, FlushState};
use self::latency::LatencyTracker;
use self::outgoing::{OutgoingQueue, Route};
use crate::cache::CacheArray;
use crate::common::{Addr, ConfigError, ProtocolViolation, SimError};
use crate::config::{CacheConfig, Protocol};
use crate::mshr::Mshr;
use crate::protocol::{Command, EndpointKind, EventId, IdGenerator, InitCoherence, MemEvent, State};
use crate::soc::traits::Transport;
use crate::stats::Statistics;

pub use self::flush::FlushState as EngineFlushState;
pub use self::outgoing::Outgoing;

/// Commands accepted by the inclusive engine.
const VALID_RECEIVE_EVENTS: [Command; 28] = [
    Command::GetS,
    Command::GetX,
    Command::GetSX,
    Command::FlushLine,
    Command::FlushLineInv,
    Command::FlushAll,
    Command::ForwardFlush,
    Command::PutS,
    Command::PutE,
    Command::PutM,
    Command::PutX,
    Command::Inv,
    Command::ForceInv,
    Command::Fetch,
    Command::FetchInv,
    Command::FetchInvX,
    Command::GetSResp,
    Command::GetXResp,
    Command::FlushLineResp,
    Command::FlushAllResp,
    Command::FetchResp,
    Command::FetchXResp,
    Command::AckInv,
    Command::AckPut,
    Command::AckFlush,
    Command::UnblockFlush,
    Command::Nack,
    Command::NullCmd,
];

/// Latencies charged by the engine, in cycles.
#[derive(Clone, Copy, Debug)]
struct Timing {
    access: u64,
    tag: u64,
    mshr: u64,
    packet_header: u64,
}

/// The coherence protocol engine of one inclusive cache.
#[derive(Debug)]
pub struct CoherenceEngine {
    name: String,
    protocol: Protocol,
    array: CacheArray,
    mshr: Mshr,
    awaited: AwaitedResponses,
    flush: FlushControl,
    outgoing_down: OutgoingQueue,
    outgoing_up: OutgoingQueue,
    retry_buffer: Vec<MemEvent>,
    stats: Statistics,
    latency: LatencyTracker,
    ids: IdGenerator,
    timestamp: u64,
    line_size: u64,
    timing: Timing,
    last_level: bool,
    silent_evict_clean: bool,
    writeback_clean_blocks: bool,
    send_writeback_ack: bool,
    expect_writeback_ack: bool,
    flush_manager: bool,
    flush_dest: Option<String>,
    flush_peers: Vec<String>,
    max_outstanding_prefetch: usize,
    drop_prefetch_level: usize,
}

impl CoherenceEngine {
    /// Creates an engine with an empty line store.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique cache name; used as the source of every event this cache sends.
    /// * `origin` - Numeric component id used to make event ids unique.
    /// * `config` - Cache parameters.
    ///
    /// # Returns
    ///
    /// The engine, or the first invalid configuration field.
    pub fn new(name: &str, origin: u32, config: &CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: name.to_owned(),
            protocol: config.protocol,
            array: CacheArray::new(config),
            mshr: Mshr::new(config.mshr_entries, config.mshr_forward_reserve),
            awaited: AwaitedResponses::default(),
            flush: FlushControl::default(),
            outgoing_down: OutgoingQueue::new(config.request_link_width),
            outgoing_up: OutgoingQueue::new(config.response_link_width),
            retry_buffer: Vec::new(),
            stats: Statistics::new(),
            latency: LatencyTracker::default(),
            ids: IdGenerator::new(origin),
            timestamp: 0,
            line_size: config.line_size,
            timing: Timing {
                access: config.access_latency,
                tag: config.tag_latency(),
                mshr: config.mshr_latency,
                packet_header: config.min_packet_size,
            },
            last_level: config.last_level,
            silent_evict_clean: config.silent_evict_clean,
            writeback_clean_blocks: config.writeback_clean_blocks,
            send_writeback_ack: config.send_writeback_ack,
            expect_writeback_ack: config.expect_writeback_ack,
            flush_manager: config.flush_manager,
            flush_dest: config.flush_dest.clone(),
            flush_peers: config.flush_peers.clone(),
            max_outstanding_prefetch: config.max_outstanding_prefetch(),
            drop_prefetch_level: config.drop_prefetch_level(),
        })
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Line size in bytes.
    pub const fn line_size(&self) -> u64 {
        self.line_size
    }

    /// Current simulated time.
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Advances the engine clock; called once per cycle before any handler runs.
    pub const fn set_timestamp(&mut self, time: u64) {
        self.timestamp = time;
    }

    /// The line store.
    pub const fn array(&self) -> &CacheArray {
        &self.array
    }

    /// The MSHR.
    pub const fn mshr(&self) -> &Mshr {
        &self.mshr
    }

    /// Collected statistics.
    pub const fn stats(&self) -> &Statistics {
        &self.stats
    }

    /// Responses still awaited from upper-level peers.
    pub const fn awaited(&self) -> &AwaitedResponses {
        &self.awaited
    }

    /// State of the hierarchy-wide flush at this cache.
    pub const fn flush_state(&self) -> FlushState {
        self.flush.state
    }

    /// Returns `true` while new upper-level requests must be held back for a flush.
    pub fn flush_blocks_requests(&self) -> bool {
        self.flush.state != FlushState::Ready || self.flush.awaiting_unblock
    }

    /// State of the line holding `addr`; `I` if no line holds it.
    pub fn line_state(&self, addr: Addr) -> State {
        self.array
            .peek(addr)
            .map_or(State::I, |idx| self.array.line(idx).state())
    }

    /// Events queued toward memory.
    pub fn outgoing_down(&self) -> impl Iterator<Item = &Outgoing> {
        self.outgoing_down.iter()
    }

    /// Events queued toward the processors.
    pub fn outgoing_up(&self) -> impl Iterator<Item = &Outgoing> {
        self.outgoing_up.iter()
    }

    /// Removes and returns every event scheduled for replay.
    pub fn take_retry_buffer(&mut self) -> Vec<MemEvent> {
        std::mem::take(&mut self.retry_buffer)
    }

    /// Returns `true` if replays are waiting.
    pub fn has_retries(&self) -> bool {
        !self.retry_buffer.is_empty()
    }

    /// Returns `true` if no transaction, replay or outgoing message is pending.
    pub fn is_idle(&self) -> bool {
        self.mshr.is_empty()
            && self.retry_buffer.is_empty()
            && self.outgoing_down.is_empty()
            && self.outgoing_up.is_empty()
    }

    /// The command kinds this engine accepts.
    pub fn valid_receive_events() -> &'static [Command] {
        &VALID_RECEIVE_EVENTS
    }

    /// Coherence parameters announced to neighbours.
    pub fn init_coherence_event(&self) -> InitCoherence {
        InitCoherence {
            name: self.name.clone(),
            kind: EndpointKind::Cache,
            inclusive: true,
            sends_writeback_ack: self.send_writeback_ack,
            expects_writeback_ack: self.expect_writeback_ack,
            line_size: self.line_size,
            tracks_presence: true,
        }
    }

    /// Learns from the memory-side neighbour whether writebacks will be acknowledged.
    pub fn apply_lower_init(&mut self, lower: &InitCoherence) {
        if lower.kind != EndpointKind::Requester {
            self.expect_writeback_ack = lower.sends_writeback_ack;
        }
    }

    /// Handles one inbound event.
    ///
    /// # Arguments
    ///
    /// * `event` - The event; for replays, a copy of the MSHR entry.
    /// * `in_mshr` - The event is a replay of an entry already held in the MSHR.
    ///
    /// # Returns
    ///
    /// Whether the event was consumed, or the protocol violation it exposed.
    pub fn handle_event(&mut self, event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        if !VALID_RECEIVE_EVENTS.contains(&event.cmd) {
            return Err(ProtocolViolation::UnexpectedCommand {
                cache: self.name.clone(),
                cmd: event.cmd,
                addr: event.base_addr,
                time: self.timestamp,
            });
        }
        if cfg!(any(debug_assertions, feature = "always-trace")) {
            trace!(
                cache = %self.name,
                cmd = %event.cmd,
                addr = format_args!("{:#x}", event.base_addr),
                state = %self.line_state(event.base_addr),
                time = self.timestamp,
                replay = in_mshr,
                "handle"
            );
        }
        if !in_mshr
            && matches!(
                event.cmd,
                Command::GetS | Command::GetX | Command::GetSX | Command::FlushLine | Command::FlushLineInv
            )
            && !event.is_local_prefetch(&self.name)
        {
            self.latency.start(event.id, self.timestamp);
        }

        match event.cmd {
            Command::GetS => self.handle_get_s(event, in_mshr),
            Command::GetX | Command::GetSX => self.handle_get_x(event, in_mshr),
            Command::FlushLine => self.handle_flush_line(event, in_mshr),
            Command::FlushLineInv => self.handle_flush_line_inv(event, in_mshr),
            Command::FlushAll => self.handle_flush_all(event, in_mshr),
            Command::ForwardFlush => self.handle_forward_flush(event, in_mshr),
            Command::PutS => self.handle_put_s(event, in_mshr),
            Command::PutE | Command::PutM => self.handle_put_e_m(event, in_mshr),
            Command::PutX => self.handle_put_x(event, in_mshr),
            Command::Fetch => self.handle_fetch(event, in_mshr),
            Command::Inv => self.handle_inv(event, in_mshr),
            Command::ForceInv => self.handle_force_inv(event, in_mshr),
            Command::FetchInv => self.handle_fetch_inv(event, in_mshr),
            Command::FetchInvX => self.handle_fetch_inv_x(event, in_mshr),
            Command::GetSResp => self.handle_get_s_resp(event),
            Command::GetXResp => self.handle_get_x_resp(event),
            Command::FlushLineResp => self.handle_flush_line_resp(event),
            Command::FlushAllResp => self.handle_flush_all_resp(event),
            Command::FetchResp => self.handle_fetch_resp(event),
            Command::FetchXResp => self.handle_fetch_x_resp(event),
            Command::AckInv => self.handle_ack_inv(event),
            Command::AckPut => self.handle_ack_put(event),
            Command::AckFlush => self.handle_ack_flush(event),
            Command::UnblockFlush => self.handle_unblock_flush(event),
            Command::Nack => self.handle_nack(event),
            Command::NullCmd => self.handle_null_cmd(event),
            _ => Err(ProtocolViolation::UnexpectedCommand {
                cache: self.name.clone(),
                cmd: event.cmd,
                addr: event.base_addr,
                time: self.timestamp,
            }),
        }
    }

    /// Reprocesses an event taken from the retry buffer.
    ///
    /// Replays of events that have since left the MSHR are dropped. Internal eviction
    /// replays and flush requests are not MSHR events and always run.
    pub fn replay(&mut self, event: MemEvent) -> Result<bool, ProtocolViolation> {
        let exempt = matches!(
            event.cmd,
            Command::NullCmd | Command::FlushAll | Command::ForwardFlush
        );
        if !exempt && !self.mshr.contains_event(event.base_addr, event.id) {
            debug!(cache = %self.name, id = %event.id, cmd = %event.cmd, "dropping stale replay");
            let addr = event.base_addr;
            self.mshr.remove_pending_retry(addr);
            if self.mshr.acks_needed(addr) == 0
                && self.mshr.front_type(addr) == Some(crate::mshr::MshrEntryType::Evict)
            {
                self.schedule_evictions(addr);
            }
            return Ok(true);
        }
        self.handle_event(event, true)
    }

    /// Forwards a non-cacheable request toward memory.
    pub fn forward_towards_mem(&mut self, mut event: MemEvent) {
        event.src.clone_from(&self.name);
        event.dst.clear();
        self.push_down(event, self.timestamp + 1, Route::ByAddress);
    }

    /// Forwards a non-cacheable response back to the component `dst` that requested it.
    pub fn forward_towards_cpu(&mut self, mut event: MemEvent, dst: &str) {
        event.src.clone_from(&self.name);
        dst.clone_into(&mut event.dst);
        self.push_up(event, self.timestamp + 1, Route::ByDestination);
    }

    /// Hands every outgoing event whose delivery time has arrived to `transport`.
    ///
    /// # Returns
    ///
    /// `true` if both outgoing queues are now empty.
    pub fn send_outgoing(&mut self, transport: &mut dyn Transport) -> Result<bool, SimError> {
        let now = self.timestamp;
        for entry in self
            .outgoing_down
            .drain_ready(now)
            .into_iter()
            .chain(self.outgoing_up.drain_ready(now))
        {
            trace!(cache = %self.name, time = now, event = %entry.event, "send");
            match entry.route {
                Route::ByAddress => transport.forward_by_address(entry.event, entry.delivery_time)?,
                Route::ByDestination => {
                    transport.forward_by_destination(entry.event, entry.delivery_time)?;
                }
            }
        }
        Ok(self.outgoing_down.is_empty() && self.outgoing_up.is_empty())
    }

    /// Writes the line store, MSHR, outgoing queues and flush state to `out`.
    pub fn print_status(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "cache {} @ {}", self.name, self.timestamp)?;
        self.array.print_status(out)?;
        self.mshr.print_status(out)?;
        self.outgoing_down.print_status("down", out)?;
        self.outgoing_up.print_status("up", out)?;
        if self.flush.state != FlushState::Ready || !self.flush.pending.is_empty() {
            writeln!(
                out,
                "  flush: {:?}, {} lines pending{}",
                self.flush.state,
                self.flush.pending.len(),
                if self.flush.awaiting_unblock { ", awaiting unblock" } else { "" }
            )?;
        }
        Ok(())
    }

    // ══════════════════════════════════════════════════════════
    // Shared helpers
    // ══════════════════════════════════════════════════════════

    /// State a line enters when the lower level grants an exclusive copy.
    const fn protocol_state(&self) -> State {
        match self.protocol {
            Protocol::Mesi => State::E,
            Protocol::Msi => State::S,
        }
    }

    /// Returns `true` if clean exclusive copies are handed to the upper level.
    const fn grants_exclusive(&self) -> bool {
        matches!(self.protocol, Protocol::Mesi)
    }

    fn state_of(&self, line: Option<usize>) -> State {
        line.map_or(State::I, |idx| self.array.line(idx).state())
    }

    fn set_state(&mut self, idx: usize, state: State) {
        self.array.line_mut(idx).set_state(state);
    }

    fn unhandled(&self, event: &MemEvent, state: State) -> ProtocolViolation {
        ProtocolViolation::UnhandledState {
            cache: self.name.clone(),
            cmd: event.cmd,
            state,
            addr: event.base_addr,
            id: event.id,
            time: self.timestamp,
        }
    }

    /// Returns the line index, or the violation for a command that needs a line in `state`.
    fn require_line(&self, line: Option<usize>, event: &MemEvent, state: State) -> Result<usize, ProtocolViolation> {
        line.ok_or_else(|| self.unhandled(event, state))
    }

    /// A copy of the request at the front of the MSHR for `event`'s address.
    fn front_request(&self, event: &MemEvent) -> Result<MemEvent, ProtocolViolation> {
        self.mshr
            .front_event(event.base_addr)
            .cloned()
            .ok_or_else(|| ProtocolViolation::MissingRequest {
                cache: self.name.clone(),
                cmd: event.cmd,
                addr: event.base_addr,
                time: self.timestamp,
            })
    }

    /// Returns `true` if the front MSHR entry for `addr` is a demand request.
    fn front_is_data_request(&self, addr: Addr) -> bool {
        self.mshr
            .front_event(addr)
            .is_some_and(|e| e.cmd.is_data_request())
    }

    fn next_id(&mut self) -> EventId {
        self.ids.next_id()
    }

    fn count_state_event(&mut self, cmd: Command, state: State) {
        self.stats
            .incr(&format!("stateEvent_{cmd}_{}", state.stat_name()));
    }

    fn count_access(&mut self, cmd: Command, hit: bool, in_mshr: bool) {
        let outcome = if hit { "Hit" } else { "Miss" };
        let when = if in_mshr { "Blocked" } else { "Arrival" };
        self.stats.incr(&format!("{cmd}{outcome}_{when}"));
        self.stats.incr(if hit { "CacheHits" } else { "CacheMisses" });
    }

    /// Counts `stat` if the line was prefetched and not yet used, then clears the mark.
    fn record_prefetch_result(&mut self, idx: usize, stat: &str) {
        let line = self.array.line_mut(idx);
        if line.prefetch() {
            line.set_prefetch(false);
            self.stats.incr(stat);
        }
    }
}
