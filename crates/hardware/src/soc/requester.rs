//! Processor-side traffic source.
//!
//! A `Requester` stands in for an upper-level cache: it issues demand requests and line
//! flushes, keeps the copies the hierarchy grants it, answers invalidations and fetches,
//! and resends NACKed requests with exponential backoff. Completed requests are recorded
//! so tests and the CLI can inspect latency and outcome.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use tracing::{debug, trace};

use crate::common::{Addr, MAX_BACKOFF_SHIFT, ProtocolViolation, SimError, line_base, line_offset};
use crate::config::RequesterNodeConfig;
use crate::protocol::{Command, EndpointKind, EventId, IdGenerator, InitCoherence, MemEvent, State, flags};
use crate::soc::traits::{Endpoint, Transport};
use crate::stats::Statistics;

/// A copy of a line held by the requester.
#[derive(Clone, Debug, PartialEq, Eq)]
struct HeldLine {
    state: State,
    data: Vec<u8>,
}

#[derive(Clone, Debug)]
struct Outstanding {
    cmd: Command,
    addr: Addr,
    issued: u64,
}

/// A request the hierarchy has answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completed {
    /// Id of the request.
    pub id: EventId,
    /// Request command.
    pub cmd: Command,
    /// Target address.
    pub addr: Addr,
    /// Response command.
    pub response: Command,
    /// Cycle the request was issued.
    pub issued: u64,
    /// Cycle the response was handled.
    pub completed: u64,
    /// Outcome flag of flush responses.
    pub success: bool,
    /// Data carried by the response.
    pub payload: Vec<u8>,
}

impl Completed {
    /// Cycles between issue and completion.
    pub const fn latency(&self) -> u64 {
        self.completed - self.issued
    }
}

/// An upper-level agent attached to one cache.
#[derive(Debug)]
pub struct Requester {
    name: String,
    cache: String,
    line_size: u64,
    ids: IdGenerator,
    cycle: u64,
    inbox: VecDeque<MemEvent>,
    to_send: VecDeque<(MemEvent, u64)>,
    outstanding: HashMap<EventId, Outstanding>,
    lines: BTreeMap<Addr, HeldLine>,
    completed: Vec<Completed>,
    stats: Statistics,
}

impl Requester {
    /// Creates a requester attached to `config.cache`.
    pub fn new(origin: u32, config: &RequesterNodeConfig) -> Self {
        Self {
            name: config.name.clone(),
            cache: config.cache.clone(),
            line_size: config.line_size,
            ids: IdGenerator::new(origin),
            cycle: 0,
            inbox: VecDeque::new(),
            to_send: VecDeque::new(),
            outstanding: HashMap::new(),
            lines: BTreeMap::new(),
            completed: Vec::new(),
            stats: Statistics::new(),
        }
    }

    /// Name of the cache this requester sends to.
    pub fn cache(&self) -> &str {
        &self.cache
    }

    fn new_event(&mut self, cmd: Command, addr: Addr, size: u64) -> MemEvent {
        let id = self.ids.next_id();
        let mut event = MemEvent::new(id, &self.name, addr, line_base(addr, self.line_size), cmd, size);
        event.dst.clone_from(&self.cache);
        event
    }

    fn enqueue(&mut self, event: MemEvent) -> EventId {
        let id = event.id;
        let _ = self.outstanding.insert(
            id,
            Outstanding {
                cmd: event.cmd,
                addr: event.addr,
                issued: self.cycle,
            },
        );
        self.stats.incr(&format!("issued_{}", event.cmd));
        self.to_send.push_back((event, self.cycle));
        id
    }

    /// Issues a demand request (`GetS`, `GetX` or `GetSX`) for the line holding `addr`.
    ///
    /// # Returns
    ///
    /// The request id; its completion appears in [`Requester::completed`].
    pub fn issue(&mut self, cmd: Command, addr: Addr) -> EventId {
        let event = self.new_event(cmd, addr, self.line_size);
        self.enqueue(event)
    }

    /// Issues a prefetch-flagged `GetS` for the line holding `addr`.
    pub fn prefetch(&mut self, addr: Addr) -> EventId {
        let mut event = self.new_event(Command::GetS, addr, self.line_size);
        event.prefetch = true;
        self.enqueue(event)
    }

    /// Issues a non-cacheable read (`GetS`) or write (`GetX` carrying `data`).
    pub fn issue_noncacheable(&mut self, cmd: Command, addr: Addr, size: u64, data: &[u8]) -> EventId {
        let mut event = self.new_event(cmd, addr, size);
        event.set_flag(flags::NONCACHEABLE);
        event.payload = data.to_vec();
        self.enqueue(event)
    }

    /// Flushes the line holding `addr` to memory.
    ///
    /// A held exclusive copy is downgraded to shared (or dropped when `invalidate` is set)
    /// and its data travels with the flush.
    pub fn flush_line(&mut self, addr: Addr, invalidate: bool) -> EventId {
        let base = line_base(addr, self.line_size);
        let cmd = if invalidate { Command::FlushLineInv } else { Command::FlushLine };
        let mut event = self.new_event(cmd, addr, self.line_size);
        let held = if invalidate {
            self.lines.remove(&base)
        } else {
            self.lines
                .get_mut(&base)
                .filter(|l| matches!(l.state, State::E | State::M))
                .map(|l| {
                    let copy = l.clone();
                    l.state = State::S;
                    copy
                })
        };
        if let Some(line) = held {
            event.evict = true;
            event.dirty = line.state == State::M;
            event.payload = line.data;
        }
        self.enqueue(event)
    }

    /// Flushes every cache in the hierarchy.
    pub fn flush_all(&mut self) -> EventId {
        let event = self.new_event(Command::FlushAll, 0, 0);
        self.enqueue(event)
    }

    /// Writes `value` at `addr` into a held exclusive copy.
    ///
    /// # Returns
    ///
    /// `false` if the requester holds no exclusive copy of the line.
    pub fn write(&mut self, addr: Addr, value: u8) -> bool {
        let offset = line_offset(addr, self.line_size) as usize;
        match self.lines.get_mut(&line_base(addr, self.line_size)) {
            Some(line) if matches!(line.state, State::E | State::M) => {
                line.state = State::M;
                if let Some(byte) = line.data.get_mut(offset) {
                    *byte = value;
                }
                true
            }
            _ => false,
        }
    }

    /// Evicts the held copy of the line holding `addr`, writing it back.
    ///
    /// # Returns
    ///
    /// `false` if no copy is held.
    pub fn evict(&mut self, addr: Addr) -> bool {
        let base = line_base(addr, self.line_size);
        let Some(line) = self.lines.remove(&base) else {
            return false;
        };
        let cmd = match line.state {
            State::M => Command::PutM,
            State::E => Command::PutE,
            _ => Command::PutS,
        };
        let mut event = self.new_event(cmd, base, self.line_size);
        if cmd == Command::PutM {
            event.dirty = true;
            event.payload = line.data;
        }
        self.stats.incr(&format!("issued_{cmd}"));
        self.to_send.push_back((event, self.cycle));
        true
    }

    /// State of the held copy of the line holding `addr`.
    pub fn line_state(&self, addr: Addr) -> State {
        self.lines
            .get(&line_base(addr, self.line_size))
            .map_or(State::I, |l| l.state)
    }

    /// Data of the held copy of the line holding `addr`.
    pub fn line_data(&self, addr: Addr) -> Option<&[u8]> {
        self.lines
            .get(&line_base(addr, self.line_size))
            .map(|l| l.data.as_slice())
    }

    /// Answered requests in completion order.
    pub fn completed(&self) -> &[Completed] {
        &self.completed
    }

    /// The completion of request `id`, if answered.
    pub fn completion(&self, id: EventId) -> Option<&Completed> {
        self.completed.iter().find(|c| c.id == id)
    }

    /// Requests not yet answered.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Collected statistics.
    pub const fn stats(&self) -> &Statistics {
        &self.stats
    }

    fn reply(&mut self, event: &MemEvent, cmd: Command) -> MemEvent {
        let mut response = event.make_response_with(self.ids.next_id(), cmd);
        response.src.clone_from(&self.name);
        response.dst.clone_from(&event.src);
        response
    }

    fn complete(&mut self, event: MemEvent) -> Result<(), ProtocolViolation> {
        let request = event
            .response_to
            .and_then(|id| self.outstanding.remove(&id).map(|r| (id, r)));
        let Some((id, request)) = request else {
            return Err(ProtocolViolation::MissingRequest {
                cache: self.name.clone(),
                cmd: event.cmd,
                addr: event.base_addr,
                time: self.cycle,
            });
        };
        if !event.is_noncacheable() {
            let state = match (event.cmd, request.cmd) {
                (Command::GetSResp, _) => Some(State::S),
                (Command::GetXResp, Command::GetS) => Some(State::E),
                (Command::GetXResp, _) => Some(State::M),
                _ => None,
            };
            if let Some(state) = state {
                let _ = self.lines.insert(
                    event.base_addr,
                    HeldLine {
                        state,
                        data: event.payload.clone(),
                    },
                );
            }
        }
        self.stats.incr(&format!("completed_{}", request.cmd));
        self.completed.push(Completed {
            id,
            cmd: request.cmd,
            addr: request.addr,
            response: event.cmd,
            issued: request.issued,
            completed: self.cycle,
            success: event.success,
            payload: event.payload,
        });
        Ok(())
    }

    /// Answers an invalidation-class request; requests for lines no longer held are dropped
    /// because the writeback already sent answers them.
    fn answer(&mut self, event: &MemEvent) {
        let Some(line) = self.lines.get(&event.base_addr).cloned() else {
            debug!(requester = %self.name, event = %event, "dropping request for a line not held");
            return;
        };
        let mut response = match event.cmd {
            Command::Inv | Command::ForceInv => {
                let _ = self.lines.remove(&event.base_addr);
                self.reply(event, Command::AckInv)
            }
            Command::Fetch | Command::FetchInv => {
                if event.cmd == Command::FetchInv {
                    let _ = self.lines.remove(&event.base_addr);
                }
                let mut response = self.reply(event, Command::FetchResp);
                response.payload = line.data;
                response.dirty = line.state == State::M;
                response
            }
            _ => {
                if let Some(held) = self.lines.get_mut(&event.base_addr) {
                    held.state = State::S;
                }
                let mut response = self.reply(event, Command::FetchXResp);
                response.payload = line.data;
                response.dirty = line.state == State::M;
                response
            }
        };
        response.size = self.line_size;
        self.to_send.push_back((response, self.cycle));
    }

    fn handle(&mut self, event: MemEvent) -> Result<(), ProtocolViolation> {
        match event.cmd {
            Command::GetSResp
            | Command::GetXResp
            | Command::FlushLineResp
            | Command::FlushAllResp
            | Command::WriteResp => self.complete(event),
            Command::Inv | Command::ForceInv | Command::Fetch | Command::FetchInv | Command::FetchInvX => {
                self.answer(&event);
                Ok(())
            }
            Command::AckPut => Ok(()),
            Command::Nack => {
                let Some(mut nacked) = event.nacked.map(|b| *b) else {
                    return Err(ProtocolViolation::UnhandledNack {
                        cache: self.name.clone(),
                        cmd: event.cmd,
                        addr: event.base_addr,
                        time: self.cycle,
                    });
                };
                let backoff = 1_u64 << nacked.retries.min(MAX_BACKOFF_SHIFT);
                nacked.retries += 1;
                nacked.dst.clone_from(&self.cache);
                self.stats.incr("nacks_received");
                self.to_send.push_back((nacked, self.cycle + backoff));
                Ok(())
            }
            _ => Err(ProtocolViolation::UnexpectedCommand {
                cache: self.name.clone(),
                cmd: event.cmd,
                addr: event.base_addr,
                time: self.cycle,
            }),
        }
    }
}

impl Endpoint for Requester {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&mut self, event: MemEvent) {
        self.inbox.push_back(event);
    }

    fn tick(&mut self, cycle: u64, port: &mut dyn Transport) -> Result<(), SimError> {
        self.cycle = cycle;
        while let Some(event) = self.inbox.pop_front() {
            trace!(requester = %self.name, time = cycle, event = %event, "handle");
            self.handle(event)?;
        }
        while let Some((event, deliver_at)) = self.to_send.pop_front() {
            port.forward_by_destination(event, deliver_at.max(cycle))?;
        }
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.inbox.is_empty() && self.to_send.is_empty() && self.outstanding.is_empty()
    }

    fn init_coherence(&self) -> InitCoherence {
        InitCoherence {
            name: self.name.clone(),
            kind: EndpointKind::Requester,
            inclusive: false,
            sends_writeback_ack: false,
            expects_writeback_ack: false,
            line_size: self.line_size,
            tracks_presence: false,
        }
    }

    fn print_status(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "requester {} -> {}: {} outstanding, {} lines held",
            self.name,
            self.cache,
            self.outstanding.len(),
            self.lines.len()
        )?;
        for (addr, line) in &self.lines {
            writeln!(out, "    {addr:#014x} {}", line.state)?;
        }
        Ok(())
    }

    fn as_requester(&self) -> Option<&Requester> {
        Some(self)
    }

    fn as_requester_mut(&mut self) -> Option<&mut Requester> {
        Some(self)
    }
}
