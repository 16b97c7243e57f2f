//! Root memory endpoint.
//!
//! The memory sits below the last-level cache and answers every request with a fixed
//! latency. It provides:
//! 1. **Buffer:** Backing storage (`BackingStore`) for memory contents.
//! 2. **Endpoint:** Data responses, writeback and flush absorption, and non-cacheable
//!    reads and writes.

/// Backing storage (mmap or `Vec`) for raw byte storage.
pub mod buffer;

use std::collections::VecDeque;
use std::fmt;

use tracing::trace;

use self::buffer::BackingStore;
use crate::common::{Addr, ConfigError, ProtocolViolation, SimError};
use crate::config::MemoryConfig;
use crate::protocol::{Command, EndpointKind, IdGenerator, InitCoherence, MemEvent};
use crate::soc::traits::{Endpoint, Transport};
use crate::stats::Statistics;

/// Non-coherent root memory.
#[derive(Debug)]
pub struct MemoryEndpoint {
    name: String,
    store: BackingStore,
    latency: u64,
    grant_exclusive: bool,
    send_writeback_ack: bool,
    inbox: VecDeque<MemEvent>,
    ids: IdGenerator,
    stats: Statistics,
    cycle: u64,
}

impl MemoryEndpoint {
    /// Creates a memory with a zero-filled store.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique component name.
    /// * `origin` - Numeric component id used to make event ids unique.
    /// * `config` - Memory parameters.
    ///
    /// # Returns
    ///
    /// The memory, or an error if the store size does not fit the host address space.
    pub fn new(name: &str, origin: u32, config: &MemoryConfig) -> Result<Self, ConfigError> {
        let size = usize::try_from(config.size)
            .map_err(|_| ConfigError::invalid("memory.size", "does not fit in host memory"))?;
        Ok(Self {
            name: name.to_owned(),
            store: BackingStore::new(size),
            latency: config.latency,
            grant_exclusive: config.grant_exclusive,
            send_writeback_ack: config.send_writeback_ack,
            inbox: VecDeque::new(),
            ids: IdGenerator::new(origin),
            stats: Statistics::new(),
            cycle: 0,
        })
    }

    /// Reads `size` bytes at `addr`.
    pub fn read(&self, addr: Addr, size: u64) -> Vec<u8> {
        self.store.get(addr, size)
    }

    /// Writes `data` at `addr`, bypassing the protocol.
    pub fn write(&mut self, addr: Addr, data: &[u8]) {
        self.store.set(addr, data);
    }

    /// Collected statistics.
    pub const fn stats(&self) -> &Statistics {
        &self.stats
    }

    fn respond(&mut self, event: &MemEvent, cmd: Command, data: Option<Vec<u8>>) -> MemEvent {
        let mut response = event.make_response_with(self.ids.next_id(), cmd);
        response.src.clone_from(&self.name);
        response.dst.clone_from(&event.src);
        if let Some(data) = data {
            response.payload = data;
        }
        response
    }

    /// Builds the response to `event`, applying any data it carries.
    fn handle(&mut self, event: &MemEvent) -> Result<Option<MemEvent>, ProtocolViolation> {
        let noncacheable = event.is_noncacheable();
        let response = match event.cmd {
            Command::GetS => {
                let addr = if noncacheable { event.addr } else { event.base_addr };
                let data = self.store.get(addr, event.size);
                let cmd = if self.grant_exclusive && !noncacheable {
                    Command::GetXResp
                } else {
                    Command::GetSResp
                };
                Some(self.respond(event, cmd, Some(data)))
            }
            Command::GetX | Command::GetSX => {
                if noncacheable {
                    self.store.set(event.addr, &event.payload);
                    Some(self.respond(event, Command::GetXResp, None))
                } else {
                    let data = self.store.get(event.base_addr, event.size);
                    Some(self.respond(event, Command::GetXResp, Some(data)))
                }
            }
            Command::Write => {
                self.store.set(event.addr, &event.payload);
                Some(self.respond(event, Command::WriteResp, None))
            }
            Command::PutS | Command::PutE | Command::PutM | Command::PutX => {
                if !event.payload.is_empty() {
                    self.store.set(event.base_addr, &event.payload);
                }
                self.send_writeback_ack
                    .then(|| self.respond(event, Command::AckPut, None))
            }
            Command::FlushLine | Command::FlushLineInv => {
                if event.dirty && !event.payload.is_empty() {
                    self.store.set(event.base_addr, &event.payload);
                }
                let mut response = self.respond(event, Command::FlushLineResp, None);
                response.success = true;
                Some(response)
            }
            Command::FlushAll => {
                let mut response = self.respond(event, Command::FlushAllResp, None);
                response.success = true;
                Some(response)
            }
            _ => {
                return Err(ProtocolViolation::UnexpectedCommand {
                    cache: self.name.clone(),
                    cmd: event.cmd,
                    addr: event.base_addr,
                    time: self.cycle,
                });
            }
        };
        Ok(response)
    }
}

impl Endpoint for MemoryEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&mut self, event: MemEvent) {
        self.inbox.push_back(event);
    }

    fn tick(&mut self, cycle: u64, port: &mut dyn Transport) -> Result<(), SimError> {
        self.cycle = cycle;
        while let Some(event) = self.inbox.pop_front() {
            trace!(memory = %self.name, time = cycle, event = %event, "handle");
            self.stats.incr(&format!("received_{}", event.cmd));
            let response = self.handle(&event)?;
            if let Some(response) = response {
                self.stats.incr(&format!("eventSent_{}", response.cmd));
                port.forward_by_destination(response, cycle + self.latency)?;
            }
        }
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.inbox.is_empty()
    }

    fn init_coherence(&self) -> InitCoherence {
        InitCoherence {
            name: self.name.clone(),
            kind: EndpointKind::Memory,
            inclusive: false,
            sends_writeback_ack: self.send_writeback_ack,
            expects_writeback_ack: false,
            line_size: 0,
            tracks_presence: false,
        }
    }

    fn print_status(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "memory {}: {} bytes{}, {} queued",
            self.name,
            self.store.len(),
            if self.store.is_mapped() { " (mapped)" } else { "" },
            self.inbox.len()
        )
    }

    fn as_memory(&self) -> Option<&MemoryEndpoint> {
        Some(self)
    }
}
