//! Responses-awaited map.
//!
//! For every line address, records which peer each outstanding invalidation or fetch was sent
//! to and under which event id. Acknowledgments clear entries; NACKs consult them to decide
//! whether a rejected invalidation is still relevant.

use std::collections::{BTreeMap, HashMap};

use crate::common::Addr;
use crate::protocol::EventId;

/// Outstanding invalidations and fetches, keyed by address then peer.
#[derive(Clone, Debug, Default)]
pub struct AwaitedResponses {
    map: HashMap<Addr, BTreeMap<String, EventId>>,
}

impl AwaitedResponses {
    /// Records that `peer` owes a response to event `id` for `addr`.
    pub fn record(&mut self, addr: Addr, peer: &str, id: EventId) {
        let _ = self.map.entry(addr).or_default().insert(peer.to_owned(), id);
    }

    /// Clears the entry for `peer` at `addr`.
    ///
    /// # Returns
    ///
    /// `true` if a response from `peer` was awaited.
    pub fn remove(&mut self, addr: Addr, peer: &str) -> bool {
        let Some(peers) = self.map.get_mut(&addr) else {
            return false;
        };
        let found = peers.remove(peer).is_some();
        if peers.is_empty() {
            let _ = self.map.remove(&addr);
        }
        found
    }

    /// Returns `true` if `peer` still owes a response to exactly event `id` at `addr`.
    pub fn is_awaiting(&self, addr: Addr, peer: &str, id: EventId) -> bool {
        self.map
            .get(&addr)
            .and_then(|peers| peers.get(peer))
            .is_some_and(|&awaited| awaited == id)
    }

    /// Number of peers with outstanding responses at `addr`.
    pub fn pending(&self, addr: Addr) -> usize {
        self.map.get(&addr).map_or(0, BTreeMap::len)
    }

    /// Returns `true` if no response is awaited anywhere.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
