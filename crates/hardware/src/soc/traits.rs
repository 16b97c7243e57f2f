//! Component traits for message passing between hierarchy levels.
//!
//! This module defines the seams between the coherence logic and the simulation glue. It
//! provides:
//! 1. **Transport:** Delivery of events by target address or by destination name.
//! 2. **Endpoints:** Caches, memories and requesters that receive events and are clocked.
//! 3. **Downcasting:** Optional casts to concrete endpoint types for inspection.

use std::fmt;

use crate::common::SimError;
use crate::protocol::{InitCoherence, MemEvent};
use crate::soc::controller::CacheController;
use crate::soc::memory::MemoryEndpoint;
use crate::soc::requester::Requester;

/// Moves events from one component to another.
///
/// Both methods guarantee in-order delivery per destination. `deliver_at` is the earliest
/// simulated time the event may be handled by its receiver.
pub trait Transport {
    /// Routes `event` to whichever component owns its routing address.
    fn forward_by_address(&mut self, event: MemEvent, deliver_at: u64) -> Result<(), SimError>;

    /// Routes `event` to the component named in `event.dst`.
    fn forward_by_destination(&mut self, event: MemEvent, deliver_at: u64) -> Result<(), SimError>;
}

/// A clocked component attached to the hierarchy.
pub trait Endpoint: Send {
    /// Returns the unique component name.
    fn name(&self) -> &str;

    /// Accepts an event delivered by the transport.
    fn receive(&mut self, event: MemEvent);

    /// Advances the component by one cycle, sending through `port`.
    fn tick(&mut self, cycle: u64, port: &mut dyn Transport) -> Result<(), SimError>;

    /// Returns `true` if the component holds no queued or outstanding work.
    fn is_idle(&self) -> bool;

    /// Coherence parameters announced to neighbours during setup.
    fn init_coherence(&self) -> InitCoherence;

    /// Applies the parameters announced by a neighbour on the memory side.
    fn apply_init(&mut self, _lower: &InitCoherence) {}

    /// Writes the component's internal state to `out`.
    fn print_status(&self, out: &mut dyn fmt::Write) -> fmt::Result;

    /// Returns a reference as `CacheController` if this endpoint is a cache; otherwise `None`.
    fn as_cache(&self) -> Option<&CacheController> {
        None
    }
    /// Returns a mutable reference as `CacheController` if this endpoint is a cache.
    fn as_cache_mut(&mut self) -> Option<&mut CacheController> {
        None
    }
    /// Returns a reference as `MemoryEndpoint` if this endpoint is a memory.
    fn as_memory(&self) -> Option<&MemoryEndpoint> {
        None
    }
    /// Returns a reference as `Requester` if this endpoint is a traffic source.
    fn as_requester(&self) -> Option<&Requester> {
        None
    }
    /// Returns a mutable reference as `Requester` if this endpoint is a traffic source.
    fn as_requester_mut(&mut self) -> Option<&mut Requester> {
        None
    }
}
