//! Request latency tracking.
//!
//! Arrival times are recorded when a demand request is first seen; the sample is taken when
//! the response to it leaves the cache. Each request is classified as it is handled so the
//! sample lands in the right statistic.

use std::collections::HashMap;

use crate::protocol::{Command, EventId};

/// How a request was satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LatencyType {
    /// Served from this cache.
    Hit,
    /// Fetched from below.
    Miss,
    /// Served after invalidating or downgrading upper copies.
    Inv,
    /// Shared copy upgraded to exclusive.
    Upgrade,
}

impl LatencyType {
    const fn suffix(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Inv => "inv",
            Self::Upgrade => "upgrade",
        }
    }
}

/// Start times and classifications of in-flight requests.
#[derive(Clone, Debug, Default)]
pub struct LatencyTracker {
    start: HashMap<EventId, u64>,
    kind: HashMap<EventId, LatencyType>,
}

impl LatencyTracker {
    /// Records the arrival of request `id`; later calls for the same id are ignored.
    pub fn start(&mut self, id: EventId, time: u64) {
        let _ = self.start.entry(id).or_insert(time);
    }

    /// Classifies request `id`, replacing any earlier classification.
    pub fn set_type(&mut self, id: EventId, kind: LatencyType) {
        let _ = self.kind.insert(id, kind);
    }

    /// Completes request `id` answered at `time`.
    ///
    /// # Returns
    ///
    /// The statistic name and the latency sample, or `None` if the request was never started
    /// or its command is not tracked.
    pub fn finish(&mut self, id: EventId, cmd: Command, time: u64) -> Option<(String, u64)> {
        let start = self.start.remove(&id)?;
        let kind = self.kind.remove(&id);
        let latency = time.saturating_sub(start);
        let name = match cmd {
            Command::GetS => {
                let kind = match kind? {
                    LatencyType::Upgrade => LatencyType::Miss,
                    k => k,
                };
                format!("latency_GetS_{}", kind.suffix())
            }
            Command::GetX | Command::GetSX => format!("latency_{cmd}_{}", kind?.suffix()),
            Command::FlushLine | Command::FlushLineInv => format!("latency_{cmd}"),
            _ => return None,
        };
        Some((name, latency))
    }

    /// Forgets request `id` without sampling it.
    pub fn discard(&mut self, id: EventId) {
        let _ = self.start.remove(&id);
        let _ = self.kind.remove(&id);
    }

    /// Number of requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.start.len()
    }
}
