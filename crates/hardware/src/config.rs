//! Configuration system for the memory hierarchy.
//!
//! This module defines all configuration structures and enums used to parameterize
//! caches, memories and the topology that connects them. It provides:
//! 1. **Defaults:** Baseline geometry, latency and MSHR constants.
//! 2. **Structures:** Per-cache, per-memory and whole-hierarchy configuration.
//! 3. **Enums:** Coherence protocol, replacement policy and set-index hash selection.
//! 4. **Validation:** Checks that reject configurations the hierarchy cannot be built with.
//!
//! Configuration is supplied as JSON (see [`HierarchyConfig::from_json`]) or built in code
//! starting from `Default::default()`.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::common::{Addr, ConfigError};
use crate::common::constants::{DEFAULT_FORWARD_RESERVE, DEFAULT_MAX_CYCLES, DEFAULT_PACKET_HEADER_BYTES};

/// Default configuration constants for the hierarchy.
///
/// These values define the baseline hardware configuration when not
/// explicitly overridden in JSON configuration files.
mod defaults {
    /// Default number of lines in a cache (32 KiB with 64-byte lines).
    pub const LINES: usize = 512;

    /// Default cache associativity.
    pub const ASSOCIATIVITY: usize = 8;

    /// Default cache line size in bytes (64 bytes).
    ///
    /// Matches typical modern processor cache line sizes and DRAM burst length.
    pub const LINE_SIZE: u64 = 64;

    /// Default number of banks (unbanked).
    pub const BANKS: usize = 1;

    /// Default data-array access latency in cycles.
    pub const ACCESS_LATENCY: u64 = 2;

    /// Default MSHR lookup latency in cycles.
    ///
    /// Charged instead of the access latency when a request is replayed from the MSHR.
    pub const MSHR_LATENCY: u64 = 1;

    /// Default number of MSHR entries.
    pub const MSHR_ENTRIES: usize = 16;

    /// Default latency of the root memory in cycles.
    pub const MEMORY_LATENCY: u64 = 100;

    /// Default size of the root memory backing store (64 MiB).
    pub const MEMORY_SIZE: u64 = 64 * 1024 * 1024;
}

/// Coherence protocol variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// Modified / Exclusive / Shared / Invalid.
    ///
    /// A read miss that finds no other copy is granted exclusively.
    #[default]
    #[serde(alias = "Mesi", alias = "mesi")]
    Mesi,
    /// Modified / Shared / Invalid.
    #[serde(alias = "Msi", alias = "msi")]
    Msi,
}

/// Cache replacement policy algorithms.
///
/// Specifies the algorithm used to select which cache line to evict
/// when a new line must be installed in a full cache set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplacementPolicy {
    /// Least Recently Used replacement policy.
    ///
    /// Evicts the cache line that was accessed least recently.
    #[default]
    #[serde(alias = "Lru")]
    Lru,
    /// Pseudo-LRU replacement policy.
    ///
    /// Approximates LRU with one bit per way.
    #[serde(alias = "Plru")]
    Plru,
    /// First In First Out replacement policy.
    ///
    /// Evicts the oldest cache line in the set (round-robin).
    #[serde(alias = "Fifo")]
    Fifo,
    /// Random replacement policy.
    ///
    /// Evicts a randomly selected cache line from the set.
    #[serde(alias = "Random")]
    Random,
    /// Most Recently Used replacement policy.
    ///
    /// Evicts the cache line that was accessed most recently.
    /// Effective for cyclic access patterns larger than the cache.
    #[serde(alias = "Mru")]
    Mru,
}

/// Set-index hash functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum HashFunction {
    /// Set index is the line number modulo the set count.
    #[default]
    None,
    /// Line number passed through a multiplicative hash before the modulo.
    Linear,
    /// Line number xor-folded with its upper bits before the modulo.
    Xor,
}

/// Configuration of one coherent cache.
///
/// # Examples
///
/// ```
/// use memhier_core::config::{CacheConfig, Protocol};
///
/// let json = r#"{ "protocol": "MSI", "lines": 64, "associativity": 4, "last_level": true }"#;
/// let config: CacheConfig = serde_json::from_str(json).unwrap();
/// assert_eq!(config.protocol, Protocol::Msi);
/// assert_eq!(config.sets(), 16);
/// assert_eq!(config.tag_latency(), config.access_latency);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Coherence protocol.
    #[serde(default)]
    pub protocol: Protocol,
    /// Number of lines.
    #[serde(default = "CacheConfig::default_lines")]
    pub lines: usize,
    /// Ways per set.
    #[serde(default = "CacheConfig::default_associativity")]
    pub associativity: usize,
    /// Line size in bytes (power of two).
    #[serde(default = "CacheConfig::default_line_size")]
    pub line_size: u64,
    /// Number of independently accessible banks.
    #[serde(default = "CacheConfig::default_banks")]
    pub banks: usize,
    /// Replacement policy.
    #[serde(default)]
    pub replacement: ReplacementPolicy,
    /// Set-index hash.
    #[serde(default)]
    pub hash: HashFunction,
    /// Latency of a data-array access in cycles.
    #[serde(default = "CacheConfig::default_access_latency")]
    pub access_latency: u64,
    /// Latency of a tag-only access in cycles; defaults to the access latency.
    #[serde(default)]
    pub tag_latency: Option<u64>,
    /// Latency of an MSHR lookup in cycles.
    #[serde(default = "CacheConfig::default_mshr_latency")]
    pub mshr_latency: u64,
    /// Number of MSHR entries.
    #[serde(default = "CacheConfig::default_mshr_entries")]
    pub mshr_entries: usize,
    /// MSHR entries usable only by requests from the lower level.
    #[serde(default = "CacheConfig::default_forward_reserve")]
    pub mshr_forward_reserve: usize,
    /// Header bytes charged to every packet.
    #[serde(default = "CacheConfig::default_min_packet_size")]
    pub min_packet_size: u64,
    /// Bytes per cycle toward memory (0 = unlimited).
    #[serde(default)]
    pub request_link_width: u64,
    /// Bytes per cycle toward the processor (0 = unlimited).
    #[serde(default)]
    pub response_link_width: u64,
    /// New messages handled per cycle (0 = unlimited).
    #[serde(default)]
    pub max_requests_per_cycle: usize,
    /// Acknowledge writebacks received from above.
    #[serde(default)]
    pub send_writeback_ack: bool,
    /// Wait for acknowledgments of writebacks sent below.
    #[serde(default)]
    pub expect_writeback_ack: bool,
    /// Drop clean lines on eviction instead of sending PutS/PutE.
    #[serde(default)]
    pub silent_evict_clean: bool,
    /// Attach data to clean writebacks.
    #[serde(default)]
    pub writeback_clean_blocks: bool,
    /// This cache is the last before memory; S→M upgrades are granted locally.
    #[serde(default)]
    pub last_level: bool,
    /// This cache coordinates hierarchy-wide flushes.
    #[serde(default)]
    pub flush_manager: bool,
    /// This cache relays flush requests to its own peers.
    #[serde(default)]
    pub flush_helper: bool,
    /// Name of the flush manager, for caches that are not the manager.
    #[serde(default)]
    pub flush_dest: Option<String>,
    /// Caches contacted by this cache during a flush (manager and helpers).
    #[serde(default)]
    pub flush_peers: Vec<String>,
    /// Upper bound on locally generated prefetches held in the MSHR.
    #[serde(default)]
    pub max_outstanding_prefetch: Option<usize>,
    /// MSHR occupancy at which locally generated prefetches are dropped.
    #[serde(default)]
    pub drop_prefetch_level: Option<usize>,
}

impl CacheConfig {
    /// Returns the default line count.
    const fn default_lines() -> usize {
        defaults::LINES
    }

    /// Returns the default associativity.
    const fn default_associativity() -> usize {
        defaults::ASSOCIATIVITY
    }

    /// Returns the default line size.
    const fn default_line_size() -> u64 {
        defaults::LINE_SIZE
    }

    /// Returns the default bank count.
    const fn default_banks() -> usize {
        defaults::BANKS
    }

    /// Returns the default data-array latency.
    const fn default_access_latency() -> u64 {
        defaults::ACCESS_LATENCY
    }

    /// Returns the default MSHR latency.
    const fn default_mshr_latency() -> u64 {
        defaults::MSHR_LATENCY
    }

    /// Returns the default MSHR size.
    const fn default_mshr_entries() -> usize {
        defaults::MSHR_ENTRIES
    }

    /// Returns the default forward reserve.
    const fn default_forward_reserve() -> usize {
        DEFAULT_FORWARD_RESERVE
    }

    /// Returns the default packet header size.
    const fn default_min_packet_size() -> u64 {
        DEFAULT_PACKET_HEADER_BYTES
    }

    /// Number of sets.
    pub const fn sets(&self) -> usize {
        self.lines / self.associativity
    }

    /// Tag-only latency, falling back to the access latency.
    pub fn tag_latency(&self) -> u64 {
        self.tag_latency.unwrap_or(self.access_latency)
    }

    /// Prefetch limit, defaulting to the MSHR size.
    pub fn max_outstanding_prefetch(&self) -> usize {
        self.max_outstanding_prefetch.unwrap_or(self.mshr_entries)
    }

    /// Prefetch drop threshold, defaulting to the MSHR size.
    pub fn drop_prefetch_level(&self) -> usize {
        self.drop_prefetch_level.unwrap_or(self.mshr_entries)
    }

    /// Checks that the cache can be built from this configuration.
    ///
    /// # Returns
    ///
    /// `Ok(())`, or the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.line_size == 0 || !self.line_size.is_power_of_two() {
            return Err(ConfigError::invalid("line_size", "must be a non-zero power of two"));
        }
        if self.lines == 0 {
            return Err(ConfigError::invalid("lines", "must be non-zero"));
        }
        if self.associativity == 0 || self.associativity > self.lines {
            return Err(ConfigError::invalid(
                "associativity",
                "must be between 1 and the number of lines",
            ));
        }
        if self.lines % self.associativity != 0 {
            return Err(ConfigError::invalid(
                "associativity",
                format!("{} lines do not divide into {}-way sets", self.lines, self.associativity),
            ));
        }
        if self.associativity > 64 && self.replacement == ReplacementPolicy::Plru {
            return Err(ConfigError::invalid("replacement", "PLRU supports at most 64 ways"));
        }
        if self.banks == 0 {
            return Err(ConfigError::invalid("banks", "must be non-zero"));
        }
        if self.mshr_entries <= self.mshr_forward_reserve {
            return Err(ConfigError::invalid(
                "mshr_entries",
                "must exceed mshr_forward_reserve",
            ));
        }
        if !self.flush_manager && self.flush_helper && self.flush_peers.is_empty() {
            return Err(ConfigError::invalid("flush_peers", "a flush helper needs peers"));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            lines: defaults::LINES,
            associativity: defaults::ASSOCIATIVITY,
            line_size: defaults::LINE_SIZE,
            banks: defaults::BANKS,
            replacement: ReplacementPolicy::default(),
            hash: HashFunction::default(),
            access_latency: defaults::ACCESS_LATENCY,
            tag_latency: None,
            mshr_latency: defaults::MSHR_LATENCY,
            mshr_entries: defaults::MSHR_ENTRIES,
            mshr_forward_reserve: DEFAULT_FORWARD_RESERVE,
            min_packet_size: DEFAULT_PACKET_HEADER_BYTES,
            request_link_width: 0,
            response_link_width: 0,
            max_requests_per_cycle: 0,
            send_writeback_ack: false,
            expect_writeback_ack: false,
            silent_evict_clean: false,
            writeback_clean_blocks: false,
            last_level: false,
            flush_manager: false,
            flush_helper: false,
            flush_dest: None,
            flush_peers: Vec::new(),
            max_outstanding_prefetch: None,
            drop_prefetch_level: None,
        }
    }
}

/// Configuration of the root memory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemoryConfig {
    /// Size of the backing store in bytes.
    #[serde(default = "MemoryConfig::default_size")]
    pub size: u64,
    /// Fixed access latency in cycles.
    #[serde(default = "MemoryConfig::default_latency")]
    pub latency: u64,
    /// Answer GetS with an exclusive GetXResp.
    ///
    /// Only meaningful when a single last-level cache sits above the memory.
    #[serde(default = "MemoryConfig::default_grant_exclusive")]
    pub grant_exclusive: bool,
    /// Acknowledge writebacks.
    #[serde(default)]
    pub send_writeback_ack: bool,
}

impl MemoryConfig {
    /// Returns the default memory size.
    const fn default_size() -> u64 {
        defaults::MEMORY_SIZE
    }

    /// Returns the default memory latency.
    const fn default_latency() -> u64 {
        defaults::MEMORY_LATENCY
    }

    /// Exclusive grants are on by default.
    const fn default_grant_exclusive() -> bool {
        true
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            size: defaults::MEMORY_SIZE,
            latency: defaults::MEMORY_LATENCY,
            grant_exclusive: true,
            send_writeback_ack: false,
        }
    }
}

/// An address range routed to one lower-level target.
///
/// With `interleave_size` non-zero, only the first `interleave_size` bytes of every
/// `interleave_step` bytes (counted from `start`) belong to the route.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteConfig {
    /// Name of the target component.
    pub target: String,
    /// First address of the range.
    #[serde(default)]
    pub start: Addr,
    /// Last address of the range (inclusive).
    #[serde(default = "RouteConfig::default_end")]
    pub end: Addr,
    /// Interleave chunk size in bytes (0 = no interleaving).
    #[serde(default)]
    pub interleave_size: u64,
    /// Distance between consecutive chunks in bytes.
    #[serde(default)]
    pub interleave_step: u64,
}

impl RouteConfig {
    /// Routes have no upper bound by default.
    const fn default_end() -> Addr {
        Addr::MAX
    }

    /// A route covering the whole address space.
    pub fn to(target: &str) -> Self {
        Self {
            target: target.to_owned(),
            start: 0,
            end: Addr::MAX,
            interleave_size: 0,
            interleave_step: 0,
        }
    }
}

/// A cache in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheNodeConfig {
    /// Unique component name.
    pub name: String,
    /// Cache parameters.
    #[serde(default)]
    pub params: CacheConfig,
    /// Routes toward memory.
    pub down: Vec<RouteConfig>,
}

/// A root memory in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemoryNodeConfig {
    /// Unique component name.
    pub name: String,
    /// Memory parameters.
    #[serde(default)]
    pub params: MemoryConfig,
}

/// A processor-side traffic source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RequesterNodeConfig {
    /// Unique component name.
    pub name: String,
    /// Cache (or memory) the requester is attached to.
    pub cache: String,
    /// Line size used to align request addresses.
    #[serde(default = "RequesterNodeConfig::default_line_size")]
    pub line_size: u64,
}

impl RequesterNodeConfig {
    /// Returns the default line size.
    const fn default_line_size() -> u64 {
        defaults::LINE_SIZE
    }
}

/// Root configuration: every component of a hierarchy and how they connect.
///
/// # Examples
///
/// ```
/// use memhier_core::config::HierarchyConfig;
///
/// let json = r#"{
///     "caches": [
///         { "name": "l2", "params": { "lines": 64, "associativity": 4, "last_level": true },
///           "down": [ { "target": "mem" } ] }
///     ],
///     "memories": [ { "name": "mem", "params": { "latency": 50 } } ],
///     "requesters": [ { "name": "cpu0", "cache": "l2" } ]
/// }"#;
///
/// let config = HierarchyConfig::from_json(json).unwrap();
/// assert_eq!(config.caches[0].params.lines, 64);
/// assert_eq!(config.memories[0].params.latency, 50);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HierarchyConfig {
    /// Coherent caches.
    #[serde(default)]
    pub caches: Vec<CacheNodeConfig>,
    /// Root memories.
    #[serde(default)]
    pub memories: Vec<MemoryNodeConfig>,
    /// Traffic sources.
    #[serde(default)]
    pub requesters: Vec<RequesterNodeConfig>,
    /// Cycle limit for `run_until_idle`.
    #[serde(default = "HierarchyConfig::default_max_cycles")]
    pub max_cycles: u64,
}

impl HierarchyConfig {
    /// Returns the default cycle limit.
    const fn default_max_cycles() -> u64 {
        DEFAULT_MAX_CYCLES
    }

    /// Parses and validates a hierarchy description.
    ///
    /// # Arguments
    ///
    /// * `json` - JSON text.
    ///
    /// # Returns
    ///
    /// The configuration, or a parse/validation error.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a hierarchy description file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Checks every component and every reference between components.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names: Vec<&str> = Vec::new();
        let all = self
            .caches
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.memories.iter().map(|m| m.name.as_str()))
            .chain(self.requesters.iter().map(|r| r.name.as_str()));
        for name in all {
            if names.contains(&name) {
                return Err(ConfigError::invalid("name", format!("duplicate component '{name}'")));
            }
            names.push(name);
        }
        for cache in &self.caches {
            cache.params.validate().map_err(|e| match e {
                ConfigError::Invalid { field, reason } => {
                    ConfigError::invalid(format!("caches.{}.{field}", cache.name), reason)
                }
                other => other,
            })?;
            if cache.down.is_empty() {
                return Err(ConfigError::invalid(
                    format!("caches.{}.down", cache.name),
                    "a cache needs at least one route toward memory",
                ));
            }
            for route in &cache.down {
                if !names.contains(&route.target.as_str()) {
                    return Err(ConfigError::invalid(
                        format!("caches.{}.down", cache.name),
                        format!("unknown target '{}'", route.target),
                    ));
                }
            }
            for peer in cache.params.flush_peers.iter().chain(cache.params.flush_dest.iter()) {
                if !names.contains(&peer.as_str()) {
                    return Err(ConfigError::invalid(
                        format!("caches.{}.flush", cache.name),
                        format!("unknown flush partner '{peer}'"),
                    ));
                }
            }
        }
        for requester in &self.requesters {
            if !names.contains(&requester.cache.as_str()) {
                return Err(ConfigError::invalid(
                    format!("requesters.{}.cache", requester.name),
                    format!("unknown cache '{}'", requester.cache),
                ));
            }
            if !requester.line_size.is_power_of_two() {
                return Err(ConfigError::invalid(
                    format!("requesters.{}.line_size", requester.name),
                    "must be a power of two",
                ));
            }
        }
        Ok(())
    }
}
