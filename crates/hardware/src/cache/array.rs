//! Set-associative cache line store.
//!
//! This module implements the array of lines owned by one coherence engine. It provides:
//! 1. **Lookup:** Base address → line index, optionally touching replacement state.
//! 2. **Replacement:** Victim selection that prefers invalid ways, then the policy.
//! 3. **Reuse:** Retagging a vacated line and deallocating evicted ones.
//! 4. **Introspection:** Valid-line snapshots and a status dump.
//!
//! Lines are referred to by index; callers never hold references across protocol steps.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::hash::SetHash;
use super::line::CacheLine;
use super::policies::{self, ReplacementPolicy};
use crate::common::addr::line_number;
use crate::common::Addr;
use crate::config::CacheConfig;

/// The line store of one cache.
pub struct CacheArray {
    lines: Vec<CacheLine>,
    tags: HashMap<Addr, usize>,
    sets: usize,
    ways: usize,
    line_size: u64,
    hash: SetHash,
    policy: Box<dyn ReplacementPolicy>,
}

impl CacheArray {
    /// Creates an array with every line invalid.
    ///
    /// # Arguments
    ///
    /// * `config` - A validated cache configuration (geometry, policy, hash).
    pub fn new(config: &CacheConfig) -> Self {
        let sets = config.sets();
        let ways = config.associativity;
        Self {
            lines: (0..config.lines).map(|i| CacheLine::new(i, config.line_size)).collect(),
            tags: HashMap::with_capacity(config.lines),
            sets,
            ways,
            line_size: config.line_size,
            hash: SetHash::new(config.hash, sets),
            policy: policies::build(config.replacement, sets, ways),
        }
    }

    /// Line size in bytes.
    pub const fn line_size(&self) -> u64 {
        self.line_size
    }

    /// Number of sets.
    pub const fn sets(&self) -> usize {
        self.sets
    }

    /// Ways per set.
    pub const fn ways(&self) -> usize {
        self.ways
    }

    /// Returns the set that `addr` maps to.
    pub const fn set_of(&self, addr: Addr) -> usize {
        self.hash.set_index(line_number(addr, self.line_size))
    }

    /// Finds the line mapped to base address `addr`.
    ///
    /// # Arguments
    ///
    /// * `addr` - Line base address.
    /// * `update_replacement` - Count the lookup as a use for the replacement policy.
    ///
    /// # Returns
    ///
    /// The line index, or `None` if no line holds `addr`. Never allocates.
    pub fn lookup(&mut self, addr: Addr, update_replacement: bool) -> Option<usize> {
        let idx = self.tags.get(&addr).copied()?;
        if update_replacement {
            self.policy.update(idx / self.ways, idx % self.ways);
        }
        Some(idx)
    }

    /// Finds the line mapped to `addr` without touching replacement state.
    pub fn peek(&self, addr: Addr) -> Option<usize> {
        self.tags.get(&addr).copied()
    }

    /// Picks the line that `addr` would replace.
    ///
    /// An invalid way of the target set is preferred; otherwise the replacement policy
    /// chooses. The returned line may still be valid or in transition; the caller decides
    /// whether it can be evicted.
    pub fn find_replacement_candidate(&mut self, addr: Addr) -> usize {
        let set = self.set_of(addr);
        let base = set * self.ways;
        if let Some(way) = (0..self.ways).find(|&w| !self.lines[base + w].state().is_valid()) {
            return base + way;
        }
        base + self.policy.get_victim(set)
    }

    /// Retags line `idx` to hold `addr`.
    ///
    /// The previous contents must already have been evicted; the line starts out invalid
    /// with zeroed data.
    pub fn replace(&mut self, addr: Addr, idx: usize) {
        let old = self.lines[idx].base_addr();
        if self.tags.get(&old) == Some(&idx) {
            let _ = self.tags.remove(&old);
        }
        let line = &mut self.lines[idx];
        line.reset();
        line.set_base_addr(addr);
        let _ = self.tags.insert(addr, idx);
        self.policy.update(idx / self.ways, idx % self.ways);
    }

    /// Invalidates line `idx` and unmaps its address.
    pub fn deallocate(&mut self, idx: usize) {
        let addr = self.lines[idx].base_addr();
        if self.tags.get(&addr) == Some(&idx) {
            let _ = self.tags.remove(&addr);
        }
        self.lines[idx].reset();
        self.policy.invalidate(idx / self.ways, idx % self.ways);
    }

    /// Line at `idx`.
    pub fn line(&self, idx: usize) -> &CacheLine {
        &self.lines[idx]
    }

    /// Mutable line at `idx`.
    pub fn line_mut(&mut self, idx: usize) -> &mut CacheLine {
        &mut self.lines[idx]
    }

    /// Iterates over every line in index order.
    pub fn lines(&self) -> impl Iterator<Item = &CacheLine> {
        self.lines.iter()
    }

    /// Base addresses of every mapped line not in `I`.
    pub fn valid_addresses(&self) -> BTreeSet<Addr> {
        self.tags
            .iter()
            .filter(|&(_, &idx)| self.lines[idx].state().is_valid())
            .map(|(&addr, _)| addr)
            .collect()
    }

    /// Writes every valid line to `out`.
    pub fn print_status(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "  cache array: {} sets x {} ways, {}B lines", self.sets, self.ways, self.line_size)?;
        for line in self.lines.iter().filter(|l| l.state().is_valid()) {
            let sharers: Vec<&str> = line.sharers().iter().map(String::as_str).collect();
            writeln!(
                out,
                "    [{:>5}] {:#014x} {:<7} owner={} sharers=[{}] ts={}{}",
                line.index(),
                line.base_addr(),
                line.state(),
                line.owner().unwrap_or("-"),
                sharers.join(","),
                line.timestamp(),
                if line.prefetch() { " prefetch" } else { "" }
            )?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheArray")
            .field("sets", &self.sets)
            .field("ways", &self.ways)
            .field("line_size", &self.line_size)
            .field("mapped", &self.tags.len())
            .finish_non_exhaustive()
    }
}
