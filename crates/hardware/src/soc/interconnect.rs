//! Address routing between hierarchy levels.
//!
//! Each component that sends toward memory owns an `AddressRouter`. It provides:
//! 1. **Route table:** Address ranges, each owned by one lower-level component.
//! 2. **Interleaving:** Optional striping of a range across several targets.
//! 3. **Lookup:** Resolution of a routing address to the owning target, with a hint for the
//!    last route that matched.

use std::cell::Cell;

use crate::common::Addr;
use crate::config::RouteConfig;

/// One address range and the component that owns it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressRoute {
    /// Name of the owning component.
    pub target: String,
    /// First address of the range.
    pub start: Addr,
    /// Last address of the range (inclusive).
    pub end: Addr,
    /// Interleave chunk size in bytes (0 = the whole range).
    pub interleave_size: u64,
    /// Distance between consecutive chunks in bytes.
    pub interleave_step: u64,
}

impl AddressRoute {
    /// Returns `true` if `addr` belongs to this route.
    ///
    /// # Arguments
    ///
    /// * `addr` - Routing address (line base).
    ///
    /// # Returns
    ///
    /// `true` if `addr` lies in `[start, end]` and, when interleaved, inside one of this
    /// route's chunks.
    pub const fn contains(&self, addr: Addr) -> bool {
        if addr < self.start || addr > self.end {
            return false;
        }
        if self.interleave_size == 0 || self.interleave_step == 0 {
            return true;
        }
        (addr - self.start) % self.interleave_step < self.interleave_size
    }
}

impl From<&RouteConfig> for AddressRoute {
    fn from(route: &RouteConfig) -> Self {
        Self {
            target: route.target.clone(),
            start: route.start,
            end: route.end,
            interleave_size: route.interleave_size,
            interleave_step: route.interleave_step,
        }
    }
}

/// Resolves routing addresses to lower-level components.
///
/// Routes are checked in insertion order, starting from the one that matched last.
#[derive(Debug, Default)]
pub struct AddressRouter {
    routes: Vec<AddressRoute>,
    last_hit: Cell<usize>,
}

impl AddressRouter {
    /// Creates a router with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a router from configured routes.
    pub fn from_config(routes: &[RouteConfig]) -> Self {
        Self {
            routes: routes.iter().map(AddressRoute::from).collect(),
            last_hit: Cell::new(0),
        }
    }

    /// Appends a route.
    pub fn add_route(&mut self, route: AddressRoute) {
        self.routes.push(route);
        self.last_hit.set(0);
    }

    /// Configured routes in lookup order.
    pub fn routes(&self) -> &[AddressRoute] {
        &self.routes
    }

    /// Names of every distinct target, in route order.
    pub fn targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        for route in &self.routes {
            if !targets.contains(&route.target.as_str()) {
                targets.push(&route.target);
            }
        }
        targets
    }

    /// Finds the component that owns `addr`.
    ///
    /// # Returns
    ///
    /// The target name, or `None` if no route covers `addr`.
    pub fn resolve(&self, addr: Addr) -> Option<&str> {
        let hint = self.last_hit.get();
        if let Some(route) = self.routes.get(hint)
            && route.contains(addr)
        {
            return Some(&route.target);
        }
        let (idx, route) = self
            .routes
            .iter()
            .enumerate()
            .find(|(_, route)| route.contains(addr))?;
        self.last_hit.set(idx);
        Some(&route.target)
    }
}
