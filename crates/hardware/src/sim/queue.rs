//! Timed delivery queue.
//!
//! Events in flight between components wait here until their arrival cycle. Events with
//! the same arrival cycle leave in the order they were scheduled, which preserves per-link
//! ordering.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::protocol::MemEvent;

#[derive(Debug)]
struct Scheduled {
    time: u64,
    seq: u64,
    dst: usize,
    event: MemEvent,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.seq) == (other.time, other.seq)
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

/// Min-heap of events keyed by (arrival cycle, scheduling order).
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
}

impl EventQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `event` for component `dst` at cycle `time`.
    pub fn push(&mut self, time: u64, dst: usize, event: MemEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Scheduled { time, seq, dst, event }));
    }

    /// Removes the earliest event due at or before `now`.
    ///
    /// # Returns
    ///
    /// The destination component index and the event.
    pub fn pop_ready(&mut self, now: u64) -> Option<(usize, MemEvent)> {
        if self.heap.peek()?.0.time > now {
            return None;
        }
        self.heap.pop().map(|Reverse(s)| (s.dst, s.event))
    }

    /// Arrival cycle of the earliest event.
    pub fn next_time(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(s)| s.time)
    }

    /// Events in flight.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
