//! Hierarchy construction and the top-level `System` type.
//!
//! This module builds a complete memory hierarchy from configuration. It performs:
//! 1. **Component setup:** Creates one controller per cache, one endpoint per memory and one
//!    requester per traffic source, each with a unique event-id origin.
//! 2. **Routing:** Gives every cache the address routes of its `down` list and every
//!    requester a single route to its cache.
//! 3. **Init exchange:** Hands each cache the coherence parameters of the components below
//!    it, so it knows whether writebacks will be acknowledged.
//! 4. **Simulation:** Wraps the components in a `Simulator` and exposes run helpers.

use std::collections::HashMap;
use std::fmt;

use tracing::info;

use crate::common::{ConfigError, SimError};
use crate::config::{HierarchyConfig, RouteConfig};
use crate::protocol::InitCoherence;
use crate::sim::Simulator;
use crate::soc::controller::CacheController;
use crate::soc::interconnect::AddressRouter;
use crate::soc::memory::MemoryEndpoint;
use crate::soc::requester::Requester;
use crate::soc::traits::Endpoint;

/// A constructed hierarchy ready to run.
#[derive(Debug)]
pub struct System {
    /// Cycle driver owning every component.
    pub simulator: Simulator,
    max_cycles: u64,
}

impl System {
    /// Builds a system from a validated hierarchy description.
    ///
    /// # Arguments
    ///
    /// * `config` - Caches, memories, requesters and their connections.
    ///
    /// # Returns
    ///
    /// The system, or the configuration error that prevented building it.
    pub fn new(config: &HierarchyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut components: Vec<(Box<dyn Endpoint>, AddressRouter)> = Vec::new();
        let mut origin = 0u32;
        let mut next_origin = || {
            origin += 1;
            origin
        };

        for cache in &config.caches {
            let controller = CacheController::new(&cache.name, next_origin(), &cache.params)?;
            components.push((Box::new(controller), AddressRouter::from_config(&cache.down)));
        }
        for memory in &config.memories {
            let endpoint = MemoryEndpoint::new(&memory.name, next_origin(), &memory.params)?;
            components.push((Box::new(endpoint), AddressRouter::new()));
        }
        for requester in &config.requesters {
            let router = AddressRouter::from_config(&[RouteConfig::to(&requester.cache)]);
            components.push((Box::new(Requester::new(next_origin(), requester)), router));
        }

        exchange_init(&mut components);

        let simulator = Simulator::new(components).map_err(|e| match e {
            SimError::Config(e) => e,
            other => ConfigError::invalid("routes", other.to_string()),
        })?;
        info!(
            caches = config.caches.len(),
            memories = config.memories.len(),
            requesters = config.requesters.len(),
            "hierarchy built"
        );
        Ok(Self {
            simulator,
            max_cycles: config.max_cycles,
        })
    }

    /// Parses a JSON hierarchy description and builds it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Self::new(&HierarchyConfig::from_json(json)?)
    }

    /// Cycle limit applied by [`System::run`].
    pub const fn max_cycles(&self) -> u64 {
        self.max_cycles
    }

    /// Runs until the hierarchy is idle or the configured cycle limit is reached.
    ///
    /// # Returns
    ///
    /// The cycle at which the hierarchy went idle.
    pub fn run(&mut self) -> Result<u64, SimError> {
        self.simulator.run_until_idle(self.max_cycles)
    }

    /// Advances the hierarchy by `cycles` cycles.
    pub fn run_for(&mut self, cycles: u64) -> Result<(), SimError> {
        self.simulator.run_for(cycles)
    }

    /// Writes the statistics of every component, restricted to `sections` when non-empty.
    pub fn write_stats(&self, sections: &[String], out: &mut dyn fmt::Write) -> fmt::Result {
        for component in self.simulator.components() {
            let stats = if let Some(cache) = component.as_cache() {
                cache.stats()
            } else if let Some(memory) = component.as_memory() {
                memory.stats()
            } else if let Some(requester) = component.as_requester() {
                requester.stats()
            } else {
                continue;
            };
            stats.write_sections(component.name(), sections, out)?;
        }
        Ok(())
    }
}

/// Gives every component the parameters announced by the targets of its routes.
fn exchange_init(components: &mut [(Box<dyn Endpoint>, AddressRouter)]) {
    let announced: HashMap<String, InitCoherence> = components
        .iter()
        .map(|(c, _)| (c.name().to_owned(), c.init_coherence()))
        .collect();
    for (component, router) in components.iter_mut() {
        for target in router.targets() {
            if let Some(lower) = announced.get(target) {
                component.apply_init(lower);
            }
        }
    }
}
