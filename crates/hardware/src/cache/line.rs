//! Cache line metadata.
//!
//! A `CacheLine` is one way of the data array. It provides:
//! 1. **Identity:** Array index and the base address currently mapped to it.
//! 2. **Coherence:** Line state plus the sharer set or owner of the upper-level copies.
//! 3. **Data:** The line's bytes and the simulated time it was last touched.
//! 4. **Prefetch tracking:** Whether the line was filled speculatively and not yet used.

use std::collections::BTreeSet;

use crate::common::Addr;
use crate::protocol::State;

/// Metadata and data for one line of the array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheLine {
    index: usize,
    base_addr: Addr,
    state: State,
    sharers: BTreeSet<String>,
    owner: Option<String>,
    data: Vec<u8>,
    timestamp: u64,
    prefetch: bool,
}

impl CacheLine {
    /// Creates an invalid line with zeroed data.
    ///
    /// # Arguments
    ///
    /// * `index` - Position in the array.
    /// * `line_size` - Bytes of data held by the line.
    pub fn new(index: usize, line_size: u64) -> Self {
        Self {
            index,
            base_addr: 0,
            state: State::I,
            sharers: BTreeSet::new(),
            owner: None,
            data: vec![0; line_size as usize],
            timestamp: 0,
            prefetch: false,
        }
    }

    /// Position in the array.
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Base address currently mapped to this line.
    pub const fn base_addr(&self) -> Addr {
        self.base_addr
    }

    pub(crate) const fn set_base_addr(&mut self, addr: Addr) {
        self.base_addr = addr;
    }

    /// Coherence state.
    pub const fn state(&self) -> State {
        self.state
    }

    /// Sets the coherence state; entering `I` drops every sharer and the owner.
    pub fn set_state(&mut self, state: State) {
        self.state = state;
        if state == State::I {
            self.sharers.clear();
            self.owner = None;
        }
    }

    /// Names of the upper-level caches holding shared copies.
    pub const fn sharers(&self) -> &BTreeSet<String> {
        &self.sharers
    }

    /// Returns `true` if any upper-level cache holds a shared copy.
    pub fn has_sharers(&self) -> bool {
        !self.sharers.is_empty()
    }

    /// Returns `true` if a cache other than `name` holds a shared copy.
    pub fn has_other_sharers(&self, name: &str) -> bool {
        self.sharers.iter().any(|s| s != name)
    }

    /// Returns `true` if `name` holds a shared copy.
    pub fn is_sharer(&self, name: &str) -> bool {
        self.sharers.contains(name)
    }

    /// Records `name` as a sharer.
    pub fn add_sharer(&mut self, name: &str) {
        let _ = self.sharers.insert(name.to_owned());
    }

    /// Forgets `name` as a sharer.
    pub fn remove_sharer(&mut self, name: &str) {
        let _ = self.sharers.remove(name);
    }

    /// Name of the upper-level cache holding an exclusive copy.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Returns `true` if an upper-level cache holds an exclusive copy.
    pub const fn has_owner(&self) -> bool {
        self.owner.is_some()
    }

    /// Returns `true` if `name` holds the exclusive copy.
    pub fn is_owner(&self, name: &str) -> bool {
        self.owner.as_deref() == Some(name)
    }

    /// Records `name` as the owner.
    pub fn set_owner(&mut self, name: &str) {
        self.owner = Some(name.to_owned());
    }

    /// Forgets the owner.
    pub fn remove_owner(&mut self) {
        self.owner = None;
    }

    /// The line's bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Overwrites the line's bytes with `data` (truncated to the line size).
    pub fn set_data(&mut self, data: &[u8]) {
        let len = data.len().min(self.data.len());
        self.data[..len].copy_from_slice(&data[..len]);
    }

    /// Simulated time the line was last touched.
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Records the simulated time of the latest access.
    pub const fn set_timestamp(&mut self, time: u64) {
        self.timestamp = time;
    }

    /// Returns `true` if the line was prefetched and not yet demanded.
    pub const fn prefetch(&self) -> bool {
        self.prefetch
    }

    /// Marks or clears the prefetch flag.
    pub const fn set_prefetch(&mut self, prefetch: bool) {
        self.prefetch = prefetch;
    }

    /// Returns the line to its initial invalid state, keeping its index.
    pub fn reset(&mut self) {
        self.set_state(State::I);
        self.timestamp = 0;
        self.prefetch = false;
        self.data.fill(0);
    }
}
