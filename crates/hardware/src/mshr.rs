//! Miss-Status Holding Registers.
//!
//! The MSHR serialises all work on one line address. It provides:
//! 1. **Per-address queues:** Pending events, eviction pointers and awaited writebacks; only
//!    the front entry is active.
//! 2. **Counters:** Outstanding acknowledgments and scheduled replays per address.
//! 3. **Capacity:** A bounded entry count with a reserve that only lower-level requests may
//!    use, plus prefetch accounting.
//! 4. **Flush bookkeeping:** A separate queue of hierarchy-wide flush requests and the
//!    count of flush acknowledgments still awaited.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::common::Addr;
use crate::protocol::{EventId, MemEvent};

/// Outcome of trying to allocate an MSHR entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemEventStatus {
    /// The event is at the front of its queue and may proceed.
    Ok,
    /// The event is queued behind other work and will be replayed.
    Stall,
    /// The MSHR is full; the sender must be NACKed.
    Reject,
}

/// Where a new event is placed in its address queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertAt {
    /// Behind every queued entry.
    Back,
    /// At the given position (clamped to the queue length); 0 is the front.
    Index(usize),
}

/// Kind of entry at the front of an address queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MshrEntryType {
    /// A protocol event.
    Event,
    /// Addresses waiting for this line to be vacated.
    Evict,
    /// A writeback waiting for its acknowledgment.
    Writeback,
}

/// One entry of an address queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MshrEntry {
    /// A protocol event.
    Event {
        /// The queued event.
        event: MemEvent,
        /// The event has been forwarded and must not be replayed.
        in_progress: bool,
        /// Statistics for the event have been recorded.
        profiled: bool,
    },
    /// New line addresses waiting for this line to be evicted.
    Evict {
        /// Waiting addresses, oldest first.
        pointers: Vec<Addr>,
    },
    /// A writeback waiting for `AckPut`.
    Writeback {
        /// The writeback was a downgrade rather than an eviction.
        downgrade: bool,
    },
}

impl MshrEntry {
    const fn kind(&self) -> MshrEntryType {
        match self {
            Self::Event { .. } => MshrEntryType::Event,
            Self::Evict { .. } => MshrEntryType::Evict,
            Self::Writeback { .. } => MshrEntryType::Writeback,
        }
    }
}

/// Bookkeeping for one address.
#[derive(Clone, Debug, Default)]
struct MshrRegister {
    entries: VecDeque<MshrEntry>,
    acks_needed: u32,
    pending_retries: u32,
}

/// A queued hierarchy-wide flush request.
#[derive(Clone, Debug)]
struct FlushEntry {
    event: MemEvent,
    forward: bool,
    in_progress: bool,
}

/// The MSHR of one cache.
#[derive(Debug)]
pub struct Mshr {
    registers: HashMap<Addr, MshrRegister>,
    flushes: VecDeque<FlushEntry>,
    flush_acks: u32,
    size: usize,
    max_size: usize,
    forward_reserve: usize,
    prefetches: usize,
}

impl Mshr {
    /// Creates an empty MSHR.
    ///
    /// # Arguments
    ///
    /// * `max_size` - Total number of entries.
    /// * `forward_reserve` - Entries usable only by requests from the lower level.
    pub fn new(max_size: usize, forward_reserve: usize) -> Self {
        Self {
            registers: HashMap::new(),
            flushes: VecDeque::new(),
            flush_acks: 0,
            size: 0,
            max_size,
            forward_reserve,
            prefetches: 0,
        }
    }

    /// Entries currently allocated.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Capacity.
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns `true` if no entry of any kind is allocated.
    pub fn is_empty(&self) -> bool {
        self.size == 0 && self.registers.is_empty() && self.flushes.is_empty()
    }

    /// Locally generated prefetches currently queued.
    pub const fn prefetch_count(&self) -> usize {
        self.prefetches
    }

    /// Returns `true` if `addr` has at least one queued entry.
    pub fn exists(&self, addr: Addr) -> bool {
        self.registers.get(&addr).is_some_and(|r| !r.entries.is_empty())
    }

    /// Number of entries queued for `addr`.
    pub fn size_of(&self, addr: Addr) -> usize {
        self.registers.get(&addr).map_or(0, |r| r.entries.len())
    }

    /// Addresses with queued entries or outstanding acknowledgments.
    pub fn addresses(&self) -> impl Iterator<Item = Addr> + '_ {
        self.registers.keys().copied()
    }

    /// Queues `event` for `addr`.
    ///
    /// # Arguments
    ///
    /// * `addr` - Line base address.
    /// * `event` - The event to queue.
    /// * `at` - Queue position.
    /// * `forward` - The event was initiated by the lower level and may use the reserve.
    ///
    /// # Returns
    ///
    /// The position the event landed at, or `None` if the MSHR is full.
    pub fn insert_event(&mut self, addr: Addr, event: MemEvent, at: InsertAt, forward: bool) -> Option<usize> {
        let limit = if forward {
            self.max_size
        } else {
            self.max_size.saturating_sub(self.forward_reserve)
        };
        if self.size >= limit {
            return None;
        }
        if event.prefetch && event.rqstr == event.src {
            self.prefetches += 1;
        }
        let entries = &mut self.registers.entry(addr).or_default().entries;
        let pos = match at {
            InsertAt::Back => entries.len(),
            InsertAt::Index(i) => i.min(entries.len()),
        };
        entries.insert(
            pos,
            MshrEntry::Event {
                event,
                in_progress: false,
                profiled: false,
            },
        );
        self.size += 1;
        Some(pos)
    }

    /// Records that `new_addr` waits for the line holding `old_addr` to be evicted.
    ///
    /// Pointers are appended to a trailing eviction entry when one exists.
    pub fn insert_eviction(&mut self, old_addr: Addr, new_addr: Addr) {
        let entries = &mut self.registers.entry(old_addr).or_default().entries;
        if let Some(MshrEntry::Evict { pointers }) = entries.back_mut() {
            if !pointers.contains(&new_addr) {
                pointers.push(new_addr);
            }
            return;
        }
        entries.push_back(MshrEntry::Evict {
            pointers: vec![new_addr],
        });
        self.size += 1;
    }

    /// Records a writeback of `addr` that waits for its acknowledgment.
    pub fn insert_writeback(&mut self, addr: Addr, downgrade: bool) {
        self.registers
            .entry(addr)
            .or_default()
            .entries
            .push_front(MshrEntry::Writeback { downgrade });
        self.size += 1;
    }

    /// Queues a hierarchy-wide flush.
    ///
    /// Forwarded flushes go to the front of the flush queue and are never rejected. Flush
    /// requests from above are appended; they are rejected when the MSHR is full unless this
    /// cache is the flush manager, which must accept every flush it coordinates.
    ///
    /// # Returns
    ///
    /// `Ok` if the flush landed at the front, `Stall` if it queued behind another flush,
    /// `Reject` if the MSHR is full.
    pub fn insert_flush(&mut self, event: MemEvent, forward: bool, flush_manager: bool) -> MemEventStatus {
        let entry = FlushEntry {
            event,
            forward,
            in_progress: false,
        };
        if forward {
            self.flushes.push_front(entry);
            self.size += 1;
            return MemEventStatus::Ok;
        }
        if !flush_manager && self.size >= self.max_size.saturating_sub(self.forward_reserve) {
            return MemEventStatus::Reject;
        }
        self.flushes.push_back(entry);
        self.size += 1;
        if self.flushes.len() == 1 {
            MemEventStatus::Ok
        } else {
            MemEventStatus::Stall
        }
    }

    /// The flush at the front of the flush queue.
    pub fn front_flush(&self) -> Option<&MemEvent> {
        self.flushes.front().map(|f| &f.event)
    }

    /// Returns `true` if the front flush was forwarded by a flush manager or helper.
    pub fn front_flush_is_forward(&self) -> bool {
        self.flushes.front().is_some_and(|f| f.forward)
    }

    /// The oldest queued flush request from above (not a forwarded flush).
    pub fn pending_flush_request(&self) -> Option<&MemEvent> {
        self.flushes.iter().find(|f| !f.forward).map(|f| &f.event)
    }

    /// Marks the front flush as forwarded onward.
    pub fn set_flush_in_progress(&mut self) {
        if let Some(front) = self.flushes.front_mut() {
            front.in_progress = true;
        }
    }

    /// Returns `true` if the front flush has been forwarded onward.
    pub fn flush_in_progress(&self) -> bool {
        self.flushes.front().is_some_and(|f| f.in_progress)
    }

    /// Number of queued flushes.
    pub fn flush_count(&self) -> usize {
        self.flushes.len()
    }

    /// Removes the flush with id `id`.
    pub fn remove_flush(&mut self, id: EventId) -> Option<MemEvent> {
        let pos = self.flushes.iter().position(|f| f.event.id == id)?;
        let entry = self.flushes.remove(pos)?;
        self.size -= 1;
        Some(entry.event)
    }

    /// Adds `count` to the flush acknowledgments still awaited.
    pub const fn increment_flush_acks(&mut self, count: u32) {
        self.flush_acks += count;
    }

    /// Records one flush acknowledgment.
    ///
    /// # Returns
    ///
    /// `true` when no flush acknowledgment remains outstanding.
    pub const fn decrement_flush_acks(&mut self) -> bool {
        self.flush_acks = self.flush_acks.saturating_sub(1);
        self.flush_acks == 0
    }

    /// Flush acknowledgments still awaited.
    pub const fn flush_acks(&self) -> u32 {
        self.flush_acks
    }

    /// Kind of the front entry for `addr`.
    pub fn front_type(&self, addr: Addr) -> Option<MshrEntryType> {
        self.registers.get(&addr)?.entries.front().map(MshrEntry::kind)
    }

    /// The front entry for `addr` if it is an event.
    pub fn front_event(&self, addr: Addr) -> Option<&MemEvent> {
        match self.registers.get(&addr)?.entries.front()? {
            MshrEntry::Event { event, .. } => Some(event),
            _ => None,
        }
    }

    /// Returns `true` if the event with id `id` is queued for `addr`.
    pub fn contains_event(&self, addr: Addr, id: EventId) -> bool {
        self.registers.get(&addr).is_some_and(|r| {
            r.entries
                .iter()
                .any(|e| matches!(e, MshrEntry::Event { event, .. } if event.id == id))
        })
    }

    /// Clears the eviction flag on the queued copy of event `id`.
    pub fn clear_evict(&mut self, addr: Addr, id: EventId) {
        if let Some(reg) = self.registers.get_mut(&addr) {
            for entry in &mut reg.entries {
                if let MshrEntry::Event { event, .. } = entry
                    && event.id == id
                {
                    event.evict = false;
                }
            }
        }
    }

    /// Pointers of the first eviction entry for `addr`.
    pub fn evict_pointers(&self, addr: Addr) -> Vec<Addr> {
        self.registers
            .get(&addr)
            .and_then(|r| {
                r.entries.iter().find_map(|e| match e {
                    MshrEntry::Evict { pointers } => Some(pointers.clone()),
                    _ => None,
                })
            })
            .unwrap_or_default()
    }

    /// Removes `new_addr` from the eviction entry of `old_addr`.
    ///
    /// # Returns
    ///
    /// `true` if that emptied (and removed) the eviction entry.
    pub fn remove_evict_pointer(&mut self, old_addr: Addr, new_addr: Addr) -> bool {
        let Some(reg) = self.registers.get_mut(&old_addr) else {
            return false;
        };
        let Some(pos) = reg.entries.iter().position(|e| matches!(e, MshrEntry::Evict { .. })) else {
            return false;
        };
        let emptied = match &mut reg.entries[pos] {
            MshrEntry::Evict { pointers } => {
                pointers.retain(|&p| p != new_addr);
                pointers.is_empty()
            }
            _ => false,
        };
        if emptied {
            let _ = reg.entries.remove(pos);
            self.size -= 1;
            self.erase_if_idle(old_addr);
        }
        emptied
    }

    /// Returns `true` if the front entry for `addr` is a writeback awaiting its ack.
    pub fn pending_writeback(&self, addr: Addr) -> bool {
        self.front_type(addr) == Some(MshrEntryType::Writeback)
    }

    /// Pops the front entry for `addr`; the register is erased once it has no entries and
    /// no outstanding acknowledgments.
    pub fn remove_front(&mut self, addr: Addr) -> Option<MshrEntry> {
        let entry = self.registers.get_mut(&addr)?.entries.pop_front()?;
        self.release(&entry);
        self.erase_if_idle(addr);
        Some(entry)
    }

    /// Removes the oldest writeback entry for `addr`.
    ///
    /// # Returns
    ///
    /// `true` if a writeback entry was found.
    pub fn remove_writeback(&mut self, addr: Addr) -> bool {
        let Some(reg) = self.registers.get_mut(&addr) else {
            return false;
        };
        let Some(pos) = reg
            .entries
            .iter()
            .position(|e| matches!(e, MshrEntry::Writeback { .. }))
        else {
            return false;
        };
        let _ = reg.entries.remove(pos);
        self.size -= 1;
        self.erase_if_idle(addr);
        true
    }

    /// Removes event `id` from the queue for `addr`, wherever it sits.
    pub fn remove_event(&mut self, addr: Addr, id: EventId) -> Option<MemEvent> {
        let reg = self.registers.get_mut(&addr)?;
        let pos = reg
            .entries
            .iter()
            .position(|e| matches!(e, MshrEntry::Event { event, .. } if event.id == id))?;
        let entry = reg.entries.remove(pos)?;
        self.release(&entry);
        self.erase_if_idle(addr);
        match entry {
            MshrEntry::Event { event, .. } => Some(event),
            _ => None,
        }
    }

    fn release(&mut self, entry: &MshrEntry) {
        self.size -= 1;
        if let MshrEntry::Event { event, .. } = entry
            && event.prefetch
            && event.rqstr == event.src
        {
            self.prefetches = self.prefetches.saturating_sub(1);
        }
    }

    fn erase_if_idle(&mut self, addr: Addr) {
        if self
            .registers
            .get(&addr)
            .is_some_and(|r| r.entries.is_empty() && r.acks_needed == 0)
        {
            let _ = self.registers.remove(&addr);
        }
    }

    /// Acknowledgments still awaited for `addr`.
    pub fn acks_needed(&self, addr: Addr) -> u32 {
        self.registers.get(&addr).map_or(0, |r| r.acks_needed)
    }

    /// Expects one more acknowledgment for `addr`.
    pub fn increment_acks_needed(&mut self, addr: Addr) {
        self.registers.entry(addr).or_default().acks_needed += 1;
    }

    /// Records one acknowledgment for `addr`.
    ///
    /// # Returns
    ///
    /// `true` when no acknowledgment remains outstanding.
    pub fn decrement_acks_needed(&mut self, addr: Addr) -> bool {
        let Some(reg) = self.registers.get_mut(&addr) else {
            return true;
        };
        reg.acks_needed = reg.acks_needed.saturating_sub(1);
        let done = reg.acks_needed == 0;
        if done {
            self.erase_if_idle(addr);
        }
        done
    }

    fn front_flags(&mut self, addr: Addr) -> Option<(&mut bool, &mut bool)> {
        match self.registers.get_mut(&addr)?.entries.front_mut()? {
            MshrEntry::Event {
                in_progress,
                profiled,
                ..
            } => Some((in_progress, profiled)),
            _ => None,
        }
    }

    /// Marks the front event for `addr` as forwarded.
    pub fn set_in_progress(&mut self, addr: Addr) {
        if let Some((in_progress, _)) = self.front_flags(addr) {
            *in_progress = true;
        }
    }

    /// Returns `true` if the front event for `addr` has been forwarded.
    pub fn in_progress(&self, addr: Addr) -> bool {
        matches!(
            self.registers.get(&addr).and_then(|r| r.entries.front()),
            Some(MshrEntry::Event { in_progress: true, .. })
        )
    }

    /// Marks the front event for `addr` as counted in the statistics.
    pub fn set_profiled(&mut self, addr: Addr) {
        if let Some((_, profiled)) = self.front_flags(addr) {
            *profiled = true;
        }
    }

    /// Returns `true` if the front event for `addr` has been counted.
    pub fn profiled(&self, addr: Addr) -> bool {
        matches!(
            self.registers.get(&addr).and_then(|r| r.entries.front()),
            Some(MshrEntry::Event { profiled: true, .. })
        )
    }

    /// Records that a replay of the front event for `addr` has been scheduled.
    pub fn add_pending_retry(&mut self, addr: Addr) {
        if let Some(reg) = self.registers.get_mut(&addr) {
            reg.pending_retries += 1;
        }
    }

    /// Records that a scheduled replay for `addr` has started.
    pub fn remove_pending_retry(&mut self, addr: Addr) {
        if let Some(reg) = self.registers.get_mut(&addr) {
            reg.pending_retries = reg.pending_retries.saturating_sub(1);
        }
    }

    /// Replays scheduled but not yet started for `addr`.
    pub fn pending_retries(&self, addr: Addr) -> u32 {
        self.registers.get(&addr).map_or(0, |r| r.pending_retries)
    }

    /// Number of events marked in progress for `addr` (at most one when the protocol
    /// behaves).
    pub fn in_progress_count(&self, addr: Addr) -> usize {
        self.registers.get(&addr).map_or(0, |r| {
            r.entries
                .iter()
                .filter(|e| matches!(e, MshrEntry::Event { in_progress: true, .. }))
                .count()
        })
    }

    /// Writes every register and the flush queue to `out`.
    pub fn print_status(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "  mshr: {}/{} entries, {} prefetches", self.size, self.max_size, self.prefetches)?;
        let mut addrs: Vec<&Addr> = self.registers.keys().collect();
        addrs.sort_unstable();
        for addr in addrs {
            let reg = &self.registers[addr];
            writeln!(
                out,
                "    {addr:#014x} acks={} retries={}",
                reg.acks_needed, reg.pending_retries
            )?;
            for entry in &reg.entries {
                match entry {
                    MshrEntry::Event {
                        event,
                        in_progress,
                        profiled,
                    } => writeln!(
                        out,
                        "      event {event}{}{}",
                        if *in_progress { " [in progress]" } else { "" },
                        if *profiled { " [profiled]" } else { "" }
                    )?,
                    MshrEntry::Evict { pointers } => {
                        let list: Vec<String> = pointers.iter().map(|p| format!("{p:#x}")).collect();
                        writeln!(out, "      evict -> [{}]", list.join(","))?;
                    }
                    MshrEntry::Writeback { downgrade } => {
                        writeln!(out, "      writeback{}", if *downgrade { " (downgrade)" } else { "" })?;
                    }
                }
            }
        }
        if !self.flushes.is_empty() {
            writeln!(out, "    flushes (acks={}):", self.flush_acks)?;
            for flush in &self.flushes {
                writeln!(
                    out,
                    "      {}{}{}",
                    flush.event,
                    if flush.forward { " [forward]" } else { "" },
                    if flush.in_progress { " [in progress]" } else { "" }
                )?;
            }
        }
        Ok(())
    }
}
