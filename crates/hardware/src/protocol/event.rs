//! Memory events.
//!
//! A `MemEvent` is one message between hierarchy levels. This module provides:
//! 1. **Identity:** `EventId` and a per-component `IdGenerator`.
//! 2. **Messages:** `MemEvent` with routing, payload and protocol flags.
//! 3. **Construction:** Responses, NACKs and internal eviction replays derived from an event.
//! 4. **Setup:** `InitCoherence`, exchanged between neighbours before simulation starts.

use std::fmt;

use super::command::Command;
use crate::common::Addr;

/// Memory-request flags carried in [`MemEvent::flags`].
pub mod flags {
    /// The access bypasses every cache.
    pub const NONCACHEABLE: u32 = 1 << 1;
    /// The access is part of a locked read-modify-write.
    pub const LOCKED: u32 = 1 << 2;
    /// The access is a load-linked / store-conditional.
    pub const LLSC: u32 = 1 << 3;
    /// The requester does not expect a response.
    pub const NO_RESPONSE: u32 = 1 << 4;
}

/// Unique identifier of an event: the numeric id of the component that created it plus a
/// per-component sequence number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId {
    /// Component that created the event.
    pub origin: u32,
    /// Sequence number within that component.
    pub seq: u64,
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.seq)
    }
}

/// Hands out event ids for one component.
#[derive(Clone, Debug, Default)]
pub struct IdGenerator {
    origin: u32,
    next: u64,
}

impl IdGenerator {
    /// Creates a generator for component `origin`.
    pub const fn new(origin: u32) -> Self {
        Self { origin, next: 0 }
    }

    /// Returns a fresh id.
    pub const fn next_id(&mut self) -> EventId {
        let id = EventId {
            origin: self.origin,
            seq: self.next,
        };
        self.next += 1;
        id
    }
}

/// A message between hierarchy levels.
///
/// Fields are public: the protocol engine builds and rewrites events freely while they are
/// owned by one of its queues. Once handed to a transport an event is only read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemEvent {
    /// Unique id. Forwarded copies keep the id of the event they copy.
    pub id: EventId,
    /// Id of the request this event responds to.
    pub response_to: Option<EventId>,
    /// Command kind.
    pub cmd: Command,
    /// Component that sent this copy.
    pub src: String,
    /// Component this copy is addressed to (filled in by address routing when empty).
    pub dst: String,
    /// Component that originated the transaction.
    pub rqstr: String,
    /// Target byte address.
    pub addr: Addr,
    /// Line-aligned base address; used for routing and MSHR lookup.
    pub base_addr: Addr,
    /// Request size in bytes.
    pub size: u64,
    /// Data carried by the event.
    pub payload: Vec<u8>,
    /// Request flags (see [`flags`]).
    pub flags: u32,
    /// The payload is newer than memory.
    pub dirty: bool,
    /// The sender evicted its copy while sending this event.
    pub evict: bool,
    /// Outcome of a flush.
    pub success: bool,
    /// The event was generated by a prefetcher.
    pub prefetch: bool,
    /// Number of times this event has been NACKed and resent.
    pub retries: u32,
    /// The rejected event carried by a NACK.
    pub nacked: Option<Box<Self>>,
}

impl MemEvent {
    /// Creates a request originated by `src`.
    ///
    /// # Arguments
    ///
    /// * `id` - Fresh id from the sender's generator.
    /// * `src` - Sending (and requesting) component.
    /// * `addr` - Target byte address.
    /// * `base_addr` - Line-aligned base of `addr`.
    /// * `cmd` - Command kind.
    /// * `size` - Request size in bytes.
    pub fn new(id: EventId, src: &str, addr: Addr, base_addr: Addr, cmd: Command, size: u64) -> Self {
        Self {
            id,
            response_to: None,
            cmd,
            src: src.to_owned(),
            dst: String::new(),
            rqstr: src.to_owned(),
            addr,
            base_addr,
            size,
            payload: Vec::new(),
            flags: 0,
            dirty: false,
            evict: false,
            success: false,
            prefetch: false,
            retries: 0,
            nacked: None,
        }
    }

    /// Creates the internal event that replays a completed eviction.
    ///
    /// `addr` holds the address being evicted and `base_addr` the address waiting for the
    /// freed line.
    pub fn eviction_replay(id: EventId, cache: &str, old_addr: Addr, new_addr: Addr) -> Self {
        Self::new(id, cache, old_addr, new_addr, Command::NullCmd, 0)
    }

    /// Builds the default response to this event.
    ///
    /// The response is addressed back to this event's source and inherits its addresses,
    /// size, requestor and flags.
    pub fn make_response(&self, id: EventId) -> Self {
        self.make_response_with(id, self.cmd.response().unwrap_or(self.cmd))
    }

    /// Builds a response to this event with an explicit command.
    pub fn make_response_with(&self, id: EventId, cmd: Command) -> Self {
        Self {
            id,
            response_to: Some(self.id),
            cmd,
            src: self.dst.clone(),
            dst: self.src.clone(),
            rqstr: self.rqstr.clone(),
            addr: self.addr,
            base_addr: self.base_addr,
            size: self.size,
            payload: Vec::new(),
            flags: self.flags,
            dirty: false,
            evict: false,
            success: false,
            prefetch: self.prefetch,
            retries: 0,
            nacked: None,
        }
    }

    /// Builds a NACK rejecting this event; the event travels back inside it.
    pub fn make_nack(&self, id: EventId) -> Self {
        let mut nack = self.make_response_with(id, Command::Nack);
        nack.nacked = Some(Box::new(self.clone()));
        nack
    }

    /// Returns `true` if the given flag bits are all set.
    pub const fn query_flag(&self, flag: u32) -> bool {
        self.flags & flag == flag
    }

    /// Sets the given flag bits.
    pub const fn set_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    /// Returns `true` if the access bypasses the caches.
    pub const fn is_noncacheable(&self) -> bool {
        self.query_flag(flags::NONCACHEABLE)
    }

    /// Returns `true` if this is a prefetch generated by `cache` itself.
    pub fn is_local_prefetch(&self, cache: &str) -> bool {
        self.prefetch && self.rqstr == cache
    }

    /// Number of payload bytes.
    pub fn payload_size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Address used for routing and per-address ordering.
    pub const fn routing_address(&self) -> Addr {
        self.base_addr
    }
}

impl fmt::Display for MemEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} id={} addr={:#x} base={:#x} src={} dst={} rqstr={} size={}",
            self.cmd, self.id, self.addr, self.base_addr, self.src, self.dst, self.rqstr, self.size
        )?;
        if self.dirty {
            f.write_str(" dirty")?;
        }
        if self.evict {
            f.write_str(" evict")?;
        }
        Ok(())
    }
}

/// Kind of component announcing itself during initialisation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    /// A coherent cache.
    Cache,
    /// The root memory.
    Memory,
    /// A processor-side traffic source.
    Requester,
}

/// Coherence parameters a component announces to its neighbours before simulation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitCoherence {
    /// Announcing component.
    pub name: String,
    /// Kind of component.
    pub kind: EndpointKind,
    /// The component keeps copies of every line held above it.
    pub inclusive: bool,
    /// The component acknowledges writebacks it receives.
    pub sends_writeback_ack: bool,
    /// The component waits for acknowledgments of the writebacks it sends.
    pub expects_writeback_ack: bool,
    /// Line size in bytes.
    pub line_size: u64,
    /// The component tracks which upper-level caches hold each line.
    pub tracks_presence: bool,
}
