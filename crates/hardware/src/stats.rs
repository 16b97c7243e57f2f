//! Coherence statistics collection and reporting.
//!
//! Each cache engine owns one `Statistics` registry. It provides:
//! 1. **Registration:** Named statistics created on first use; registering twice returns the
//!    same handle.
//! 2. **Accumulation:** Every statistic keeps a running sum and a sample count, so counters
//!    (add 1) and latencies (add the sample) share one representation.
//! 3. **Reporting:** Sectioned output of events, state transitions, hits, evictions,
//!    latencies and prefetch usefulness.

use std::collections::BTreeMap;
use std::fmt;

/// Section names for selective stats output.
///
/// Valid section identifiers: `"events"`, `"states"`, `"hits"`, `"evictions"`, `"latency"`,
/// `"prefetch"`. Pass an empty slice to `write_sections` to write all sections.
pub const STATS_SECTIONS: &[&str] = &["events", "states", "hits", "evictions", "latency", "prefetch"];

/// Handle to a registered statistic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StatHandle(usize);

#[derive(Clone, Copy, Debug, Default)]
struct Stat {
    sum: u64,
    samples: u64,
}

/// Registry of named statistics for one component.
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    names: BTreeMap<String, StatHandle>,
    values: Vec<Stat>,
}

impl Statistics {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, returning its handle.
    pub fn register(&mut self, name: &str) -> StatHandle {
        if let Some(&handle) = self.names.get(name) {
            return handle;
        }
        let handle = StatHandle(self.values.len());
        self.values.push(Stat::default());
        let _ = self.names.insert(name.to_owned(), handle);
        handle
    }

    /// Adds one sample to the statistic behind `handle`.
    pub fn add_data(&mut self, handle: StatHandle, value: u64) {
        if let Some(stat) = self.values.get_mut(handle.0) {
            stat.sum += value;
            stat.samples += 1;
        }
    }

    /// Adds one sample of `value` to `name`, registering it if needed.
    pub fn add(&mut self, name: &str, value: u64) {
        let handle = self.register(name);
        self.add_data(handle, value);
    }

    /// Increments the counter `name`.
    pub fn incr(&mut self, name: &str) {
        self.add(name, 1);
    }

    /// Sum of all samples of `name` (0 if never registered).
    pub fn get(&self, name: &str) -> u64 {
        self.names.get(name).map_or(0, |h| self.values[h.0].sum)
    }

    /// Number of samples recorded for `name`.
    pub fn samples(&self, name: &str) -> u64 {
        self.names.get(name).map_or(0, |h| self.values[h.0].samples)
    }

    /// Mean of the samples of `name`, or 0.0 without samples.
    pub fn mean(&self, name: &str) -> f64 {
        let samples = self.samples(name);
        if samples == 0 {
            0.0
        } else {
            self.get(name) as f64 / samples as f64
        }
    }

    /// Iterates `(name, sum, samples)` over every registered statistic in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64, u64)> {
        self.names.iter().map(|(name, h)| {
            let stat = self.values[h.0];
            (name.as_str(), stat.sum, stat.samples)
        })
    }

    /// Writes the requested sections to `out`.
    ///
    /// # Arguments
    ///
    /// * `name` - Component name printed in the banner.
    /// * `sections` - Section names from [`STATS_SECTIONS`], or empty for all.
    /// * `out` - Destination.
    pub fn write_sections(&self, name: &str, sections: &[String], out: &mut dyn fmt::Write) -> fmt::Result {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);
        let nonzero = |prefix: &str| {
            self.iter()
                .filter(move |(n, sum, _)| n.starts_with(prefix) && *sum > 0)
                .collect::<Vec<_>>()
        };

        writeln!(out, "==========================================================")?;
        writeln!(out, "CACHE {name}")?;
        writeln!(out, "==========================================================")?;
        if want("hits") {
            let hits = self.get("CacheHits");
            let misses = self.get("CacheMisses");
            let total = hits + misses;
            let rate = if total > 0 {
                (misses as f64 / total as f64) * 100.0
            } else {
                0.0
            };
            writeln!(out, "HITS")?;
            writeln!(out, "  accesses               {total}")?;
            writeln!(out, "  hits                   {hits}")?;
            writeln!(out, "  misses                 {misses}")?;
            writeln!(out, "  miss_rate              {rate:.2}%")?;
            for kind in ["GetS", "GetX", "GetSX"] {
                for outcome in ["Hit", "Miss"] {
                    let arrival = self.get(&format!("{kind}{outcome}_Arrival"));
                    let blocked = self.get(&format!("{kind}{outcome}_Blocked"));
                    if arrival + blocked > 0 {
                        writeln!(
                            out,
                            "  {:<22} arrival: {arrival:<8} blocked: {blocked}",
                            format!("{kind}{outcome}")
                        )?;
                    }
                }
            }
            writeln!(out, "----------------------------------------------------------")?;
        }
        if want("events") {
            writeln!(out, "EVENTS SENT")?;
            for (n, sum, _) in nonzero("eventSent_") {
                writeln!(out, "  {:<22} {sum}", &n["eventSent_".len()..])?;
            }
            writeln!(out, "----------------------------------------------------------")?;
        }
        if want("states") {
            writeln!(out, "STATE/EVENT PAIRS")?;
            for (n, sum, _) in nonzero("stateEvent_") {
                writeln!(out, "  {:<22} {sum}", &n["stateEvent_".len()..])?;
            }
            writeln!(out, "----------------------------------------------------------")?;
        }
        if want("evictions") {
            writeln!(out, "EVICTIONS")?;
            for (n, sum, _) in nonzero("evict_") {
                writeln!(out, "  {:<22} {sum}", &n["evict_".len()..])?;
            }
            writeln!(out, "----------------------------------------------------------")?;
        }
        if want("latency") {
            writeln!(out, "LATENCY")?;
            for (n, sum, samples) in nonzero("latency_") {
                let mean = sum as f64 / samples.max(1) as f64;
                writeln!(
                    out,
                    "  {:<22} samples: {samples:<8} mean: {mean:.2}",
                    &n["latency_".len()..]
                )?;
            }
            writeln!(out, "----------------------------------------------------------")?;
        }
        if want("prefetch") {
            writeln!(out, "PREFETCH")?;
            for (n, sum, _) in nonzero("prefetch_") {
                writeln!(out, "  {:<22} {sum}", &n["prefetch_".len()..])?;
            }
        }
        writeln!(out, "==========================================================")
    }
}
