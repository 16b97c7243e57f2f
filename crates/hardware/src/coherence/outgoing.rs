//! Timed outgoing message queues.
//!
//! Each engine keeps one queue toward memory and one toward the processors. Entries are
//! ordered by delivery time, except that an entry never overtakes an earlier entry with the
//! same routing address. Draining honours a per-cycle link width in bytes.

use std::collections::VecDeque;
use std::fmt;

use crate::protocol::MemEvent;

/// How the transport should find the receiver of an outgoing event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// By the address range that owns the event's routing address.
    ByAddress,
    /// By the name in the event's `dst` field.
    ByDestination,
}

/// One queued event.
#[derive(Clone, Debug)]
pub struct Outgoing {
    /// The event to send.
    pub event: MemEvent,
    /// Earliest cycle the event may leave.
    pub delivery_time: u64,
    /// Bytes still to be put on the link (header plus payload).
    pub size: u64,
    /// Routing mode.
    pub route: Route,
}

/// A delivery-time ordered queue with an optional link width.
#[derive(Debug, Default)]
pub struct OutgoingQueue {
    entries: VecDeque<Outgoing>,
    max_bytes: u64,
}

impl OutgoingQueue {
    /// Creates an empty queue sending at most `max_bytes` per cycle (0 = unlimited).
    pub const fn new(max_bytes: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            max_bytes,
        }
    }

    /// Inserts `entry` in delivery order without reordering same-address events.
    pub fn push(&mut self, entry: Outgoing) {
        let mut pos = self.entries.len();
        while pos > 0 {
            let prev = &self.entries[pos - 1];
            if entry.delivery_time >= prev.delivery_time
                || entry.event.routing_address() == prev.event.routing_address()
            {
                break;
            }
            pos -= 1;
        }
        self.entries.insert(pos, entry);
    }

    /// Removes every entry ready at `now` that fits in this cycle's link budget.
    ///
    /// A message larger than the remaining budget consumes it and stays at the head with its
    /// size reduced.
    pub fn drain_ready(&mut self, now: u64) -> Vec<Outgoing> {
        let mut ready = Vec::new();
        let mut bytes_left = self.max_bytes;
        while let Some(front) = self.entries.front_mut() {
            if front.delivery_time > now {
                break;
            }
            if self.max_bytes != 0 {
                if bytes_left == 0 {
                    break;
                }
                if bytes_left >= front.size {
                    bytes_left -= front.size;
                } else {
                    front.size -= bytes_left;
                    break;
                }
            }
            if let Some(entry) = self.entries.pop_front() {
                ready.push(entry);
            }
        }
        ready
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over queued entries in send order.
    pub fn iter(&self) -> impl Iterator<Item = &Outgoing> {
        self.entries.iter()
    }

    /// Writes every queued entry to `out`.
    pub fn print_status(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        if self.entries.is_empty() {
            return Ok(());
        }
        writeln!(out, "  outgoing {label}:")?;
        for entry in &self.entries {
            writeln!(out, "    @{} ({}B) {}", entry.delivery_time, entry.size, entry.event)?;
        }
        Ok(())
    }
}
