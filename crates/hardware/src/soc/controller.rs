//! Cache controller.
//!
//! Wraps one `CoherenceEngine` and clocks it. Each cycle it:
//! 1. **Replays:** Reprocesses the engine's retry buffer.
//! 2. **Accepts:** Hands new messages to the engine, at most `max_requests_per_cycle`, one
//!    per bank, holding upper-level requests back while a flush is in progress.
//! 3. **Sends:** Drains the engine's outgoing queues into the transport.
//!
//! Non-cacheable requests bypass the engine: they are forwarded toward memory and their
//! responses returned to the component that asked.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

use tracing::{debug, error};

use crate::coherence::CoherenceEngine;
use crate::common::{ConfigError, ProtocolViolation, SimError};
use crate::config::CacheConfig;
use crate::protocol::{EventId, InitCoherence, MemEvent};
use crate::soc::traits::{Endpoint, Transport};
use crate::stats::Statistics;

/// A clocked inclusive cache.
#[derive(Debug)]
pub struct CacheController {
    engine: CoherenceEngine,
    inbox: VecDeque<MemEvent>,
    banks: u64,
    max_requests_per_cycle: usize,
    noncacheable: HashMap<EventId, String>,
}

impl CacheController {
    /// Creates a controller around a fresh engine.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique cache name.
    /// * `origin` - Numeric component id used to make event ids unique.
    /// * `config` - Cache parameters.
    pub fn new(name: &str, origin: u32, config: &CacheConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            engine: CoherenceEngine::new(name, origin, config)?,
            inbox: VecDeque::new(),
            banks: config.banks as u64,
            max_requests_per_cycle: config.max_requests_per_cycle,
            noncacheable: HashMap::new(),
        })
    }

    /// The coherence engine.
    pub const fn engine(&self) -> &CoherenceEngine {
        &self.engine
    }

    /// Mutable access to the coherence engine.
    pub const fn engine_mut(&mut self) -> &mut CoherenceEngine {
        &mut self.engine
    }

    /// Collected statistics.
    pub const fn stats(&self) -> &Statistics {
        self.engine.stats()
    }

    /// Messages received but not yet handed to the engine.
    pub fn queued(&self) -> usize {
        self.inbox.len()
    }

    /// Logs `violation` with the cache's full status and converts it for the driver.
    fn abort(&self, violation: ProtocolViolation) -> SimError {
        let mut status = String::new();
        let _ = self.engine.print_status(&mut status);
        error!(cache = %self.engine.name(), %violation, "protocol violation\n{status}");
        SimError::Protocol(violation)
    }

    fn bank_of(&self, event: &MemEvent) -> u64 {
        (event.base_addr / self.engine.line_size()) % self.banks
    }

    fn pass_through(&mut self, event: MemEvent) -> Result<(), SimError> {
        if event.cmd.travels_down() {
            let _ = self.noncacheable.insert(event.id, event.src.clone());
            self.engine.forward_towards_mem(event);
            return Ok(());
        }
        let requester = event.response_to.and_then(|id| self.noncacheable.remove(&id));
        match requester {
            Some(dst) => {
                self.engine.forward_towards_cpu(event, &dst);
                Ok(())
            }
            None => Err(self.abort(ProtocolViolation::MissingRequest {
                cache: self.engine.name().to_owned(),
                cmd: event.cmd,
                addr: event.base_addr,
                time: self.engine.timestamp(),
            })),
        }
    }
}

impl Endpoint for CacheController {
    fn name(&self) -> &str {
        self.engine.name()
    }

    fn receive(&mut self, event: MemEvent) {
        self.inbox.push_back(event);
    }

    fn tick(&mut self, cycle: u64, port: &mut dyn Transport) -> Result<(), SimError> {
        self.engine.set_timestamp(cycle);

        for event in self.engine.take_retry_buffer() {
            if let Err(violation) = self.engine.replay(event) {
                return Err(self.abort(violation));
            }
        }

        let mut accepted = 0;
        let mut busy_banks = BTreeSet::new();
        let mut held = VecDeque::new();
        while let Some(event) = self.inbox.pop_front() {
            if self.max_requests_per_cycle != 0 && accepted >= self.max_requests_per_cycle {
                held.push_back(event);
                continue;
            }
            if event.is_noncacheable() {
                accepted += 1;
                self.pass_through(event)?;
                continue;
            }
            if event.cmd.is_flush_blockable() && self.engine.flush_blocks_requests() {
                held.push_back(event);
                continue;
            }
            if self.banks > 1 && !busy_banks.insert(self.bank_of(&event)) {
                held.push_back(event);
                continue;
            }
            accepted += 1;
            if let Err(violation) = self.engine.handle_event(event, false) {
                return Err(self.abort(violation));
            }
        }
        self.inbox = held;

        if accepted > 0 || !self.inbox.is_empty() {
            debug!(cache = %self.engine.name(), time = cycle, accepted, held = self.inbox.len(), "cycle");
        }
        let _ = self.engine.send_outgoing(port)?;
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.inbox.is_empty() && self.noncacheable.is_empty() && self.engine.is_idle()
    }

    fn init_coherence(&self) -> InitCoherence {
        self.engine.init_coherence_event()
    }

    fn apply_init(&mut self, lower: &InitCoherence) {
        self.engine.apply_lower_init(lower);
    }

    fn print_status(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.engine.print_status(out)?;
        if !self.inbox.is_empty() {
            writeln!(out, "  {} messages waiting", self.inbox.len())?;
        }
        Ok(())
    }

    fn as_cache(&self) -> Option<&CacheController> {
        Some(self)
    }

    fn as_cache_mut(&mut self) -> Option<&mut CacheController> {
        Some(self)
    }
}
