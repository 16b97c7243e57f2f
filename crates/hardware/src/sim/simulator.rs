//! Simulator: owns every component and the events in flight between them.
//!
//! Each cycle the simulator delivers the events due at that cycle, then clocks every
//! component in construction order. Components send through a `Port`, which resolves the
//! receiver and schedules delivery one link latency after the requested time.

use std::collections::HashMap;
use std::fmt;

use tracing::{error, info};

use super::queue::EventQueue;
use crate::common::constants::{DEFAULT_LINK_LATENCY, DEFAULT_MAX_CYCLES};
use crate::common::SimError;
use crate::protocol::MemEvent;
use crate::soc::controller::CacheController;
use crate::soc::interconnect::AddressRouter;
use crate::soc::memory::MemoryEndpoint;
use crate::soc::requester::Requester;
use crate::soc::traits::{Endpoint, Transport};

/// The sending side of one component.
struct Port<'a> {
    from: &'a str,
    cycle: u64,
    router: &'a AddressRouter,
    index: &'a HashMap<String, usize>,
    queue: &'a mut EventQueue,
}

impl Port<'_> {
    fn schedule(&mut self, event: MemEvent, deliver_at: u64) -> Result<(), SimError> {
        let dst = *self
            .index
            .get(&event.dst)
            .ok_or_else(|| SimError::UnknownEndpoint(event.dst.clone()))?;
        let arrival = deliver_at.max(self.cycle) + DEFAULT_LINK_LATENCY;
        self.queue.push(arrival, dst, event);
        Ok(())
    }
}

impl Transport for Port<'_> {
    fn forward_by_address(&mut self, mut event: MemEvent, deliver_at: u64) -> Result<(), SimError> {
        let target = self
            .router
            .resolve(event.routing_address())
            .ok_or_else(|| SimError::NoRoute {
                from: self.from.to_owned(),
                addr: event.routing_address(),
            })?;
        target.clone_into(&mut event.dst);
        self.schedule(event, deliver_at)
    }

    fn forward_by_destination(&mut self, event: MemEvent, deliver_at: u64) -> Result<(), SimError> {
        self.schedule(event, deliver_at)
    }
}

/// Top-level driver of a memory hierarchy.
pub struct Simulator {
    components: Vec<Box<dyn Endpoint>>,
    routers: Vec<AddressRouter>,
    index: HashMap<String, usize>,
    queue: EventQueue,
    cycle: u64,
}

impl Simulator {
    /// Creates a simulator over `components`, each paired with its route table.
    ///
    /// # Arguments
    ///
    /// * `components` - Every endpoint with the router it uses for address routing.
    ///
    /// # Returns
    ///
    /// The simulator, or `UnknownEndpoint` if a route names a component that was not
    /// supplied.
    pub fn new(components: Vec<(Box<dyn Endpoint>, AddressRouter)>) -> Result<Self, SimError> {
        let (components, routers): (Vec<_>, Vec<_>) = components.into_iter().unzip();
        let index: HashMap<String, usize> = components
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name().to_owned(), i))
            .collect();
        for router in &routers {
            if let Some(missing) = router.targets().into_iter().find(|t| !index.contains_key(*t)) {
                return Err(SimError::UnknownEndpoint(missing.to_owned()));
            }
        }
        Ok(Self {
            components,
            routers,
            index,
            queue: EventQueue::new(),
            cycle: 0,
        })
    }

    /// Current cycle.
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Events in flight between components.
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    /// The component named `name`.
    pub fn component(&self, name: &str) -> Option<&dyn Endpoint> {
        self.index.get(name).map(|&i| self.components[i].as_ref())
    }

    fn component_mut(&mut self, name: &str) -> Option<&mut Box<dyn Endpoint>> {
        let i = *self.index.get(name)?;
        self.components.get_mut(i)
    }

    /// The cache named `name`.
    pub fn cache(&self, name: &str) -> Option<&CacheController> {
        self.component(name)?.as_cache()
    }

    /// Mutable access to the cache named `name`.
    pub fn cache_mut(&mut self, name: &str) -> Option<&mut CacheController> {
        self.component_mut(name)?.as_cache_mut()
    }

    /// The memory named `name`.
    pub fn memory(&self, name: &str) -> Option<&MemoryEndpoint> {
        self.component(name)?.as_memory()
    }

    /// The requester named `name`.
    pub fn requester(&self, name: &str) -> Option<&Requester> {
        self.component(name)?.as_requester()
    }

    /// Mutable access to the requester named `name`.
    pub fn requester_mut(&mut self, name: &str) -> Option<&mut Requester> {
        self.component_mut(name)?.as_requester_mut()
    }

    /// Every component in construction order.
    pub fn components(&self) -> impl Iterator<Item = &dyn Endpoint> {
        self.components.iter().map(|c| &**c)
    }

    /// Delivers an event to `dst` at the current cycle, bypassing the transport.
    pub fn inject(&mut self, dst: &str, event: MemEvent) -> Result<(), SimError> {
        let i = *self
            .index
            .get(dst)
            .ok_or_else(|| SimError::UnknownEndpoint(dst.to_owned()))?;
        self.queue.push(self.cycle, i, event);
        Ok(())
    }

    /// Returns `true` if no event is in flight and every component is idle.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.components.iter().all(|c| c.is_idle())
    }

    /// Advances the hierarchy by one cycle.
    pub fn step(&mut self) -> Result<(), SimError> {
        let cycle = self.cycle;
        while let Some((dst, event)) = self.queue.pop_ready(cycle) {
            self.components[dst].receive(event);
        }
        for (component, router) in self.components.iter_mut().zip(&self.routers) {
            let name = component.name().to_owned();
            let mut port = Port {
                from: &name,
                cycle,
                router,
                index: &self.index,
                queue: &mut self.queue,
            };
            component.tick(cycle, &mut port)?;
        }
        self.cycle += 1;
        Ok(())
    }

    /// Advances the hierarchy by `cycles` cycles.
    pub fn run_for(&mut self, cycles: u64) -> Result<(), SimError> {
        for _ in 0..cycles {
            self.step()?;
        }
        Ok(())
    }

    /// Runs until every component is idle.
    ///
    /// # Arguments
    ///
    /// * `max_cycles` - Watchdog limit counted from the current cycle (0 = the default).
    ///
    /// # Returns
    ///
    /// The cycle at which the hierarchy went idle, or `Deadlock` if work remains when the
    /// limit is reached.
    pub fn run_until_idle(&mut self, max_cycles: u64) -> Result<u64, SimError> {
        let limit = if max_cycles == 0 { DEFAULT_MAX_CYCLES } else { max_cycles };
        let start = self.cycle;
        while !self.is_idle() {
            if self.cycle - start >= limit {
                let mut status = String::new();
                let _ = self.print_status(&mut status);
                error!(cycle = self.cycle, "no forward progress\n{status}");
                return Err(SimError::Deadlock { cycle: self.cycle });
            }
            self.step()?;
        }
        info!(cycle = self.cycle, "hierarchy idle");
        Ok(self.cycle)
    }

    /// Writes the status of every component to `out`.
    pub fn print_status(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "cycle {}, {} events in flight", self.cycle, self.queue.len())?;
        for component in &self.components {
            component.print_status(out)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("components", &self.index.len())
            .field("in_flight", &self.queue.len())
            .field("cycle", &self.cycle)
            .finish()
    }
}
