//! Line allocation, eviction and the internal eviction replay.

use tracing::debug;

use super::CoherenceEngine;
use crate::common::{Addr, ProtocolViolation};
use crate::mshr::{InsertAt, MemEventStatus};
use crate::protocol::{Command, MemEvent, State};

impl CoherenceEngine {
    /// Queues `event` in the MSHR, screening prefetches generated by this cache.
    ///
    /// # Arguments
    ///
    /// * `event` - Event to queue.
    /// * `forward` - The event comes from the lower level and may use the reserved entries.
    /// * `at` - Queue position.
    ///
    /// # Returns
    ///
    /// `Ok` if the event is now at the front, `Stall` if it waits behind other entries,
    /// `Reject` if there is no room.
    pub(super) fn allocate_mshr(&mut self, event: &MemEvent, forward: bool, at: InsertAt) -> MemEventStatus {
        if event.is_local_prefetch(&self.name)
            && (self.mshr.size() >= self.drop_prefetch_level
                || self.mshr.prefetch_count() >= self.max_outstanding_prefetch)
        {
            return MemEventStatus::Reject;
        }
        match self.mshr.insert_event(event.base_addr, event.clone(), at, forward) {
            None => MemEventStatus::Reject,
            Some(0) => MemEventStatus::Ok,
            Some(_) => MemEventStatus::Stall,
        }
    }

    /// Reserves the MSHR entry and the line a miss needs.
    ///
    /// # Returns
    ///
    /// The allocation status and the line now mapped to the event's address, if any.
    pub(super) fn process_cache_miss(
        &mut self,
        event: &MemEvent,
        line: Option<usize>,
        in_mshr: bool,
    ) -> (MemEventStatus, Option<usize>) {
        let status = if in_mshr {
            if self.mshr.front_event(event.base_addr).map(|e| e.id) != Some(event.id) {
                return (MemEventStatus::Stall, line);
            }
            MemEventStatus::Ok
        } else {
            self.allocate_mshr(event, false, InsertAt::Back)
        };
        if status != MemEventStatus::Ok || line.is_some() {
            return (status, line);
        }
        match self.allocate_line(event.base_addr) {
            Some(idx) => (MemEventStatus::Ok, Some(idx)),
            None => (MemEventStatus::Stall, None),
        }
    }

    /// Maps a line to `addr`, evicting the replacement candidate.
    ///
    /// When the candidate cannot be evicted yet, `addr` is recorded as waiting for it.
    fn allocate_line(&mut self, addr: Addr) -> Option<usize> {
        let idx = self.array.find_replacement_candidate(addr);
        if self.handle_eviction(idx) {
            self.array.replace(addr, idx);
            return Some(idx);
        }
        let victim = self.array.line(idx).base_addr();
        debug!(cache = %self.name, addr = format_args!("{addr:#x}"), victim = format_args!("{victim:#x}"), "waiting for eviction");
        self.mshr.insert_eviction(victim, addr);
        None
    }

    /// Tries to vacate line `idx`.
    ///
    /// Upper-level copies are invalidated first; with none left the line is written back
    /// (or dropped silently when clean and silent eviction is enabled).
    ///
    /// # Returns
    ///
    /// `true` if the line is now invalid and may be reused.
    pub(super) fn handle_eviction(&mut self, idx: usize) -> bool {
        let line = self.array.line(idx);
        let state = line.state();
        let addr = line.base_addr();
        self.stats.incr(&format!("evict_{}", state.stat_name()));

        if state == State::I {
            return true;
        }
        if !state.is_stable() || self.mshr.pending_retries(addr) != 0 {
            return false;
        }

        let (inv_state, writeback) = match state {
            State::S => (State::SInv, (!self.silent_evict_clean).then_some(Command::PutS)),
            State::E => (State::EInv, (!self.silent_evict_clean).then_some(Command::PutE)),
            _ => (State::MInv, Some(Command::PutM)),
        };
        let evicted = if self.invalidate_all(None, idx, false, None) {
            self.set_state(idx, inv_state);
            false
        } else {
            if let Some(cmd) = writeback {
                self.send_writeback(cmd, idx, cmd == Command::PutM);
                if self.expect_writeback_ack {
                    self.mshr.insert_writeback(addr, false);
                }
            }
            self.set_state(idx, State::I);
            true
        };
        self.record_prefetch_result(idx, "prefetch_evict");
        evicted
    }

    /// Applies a writeback or eviction carried by `event` to line `idx`.
    ///
    /// Dirty data is stored and moves a clean state to its dirty counterpart; the source
    /// stops being recorded as owner or sharer.
    ///
    /// # Returns
    ///
    /// The line's new state.
    pub(super) fn do_eviction(&mut self, event: &mut MemEvent, idx: usize, state: State) -> State {
        self.record_prefetch_result(idx, "prefetch_evict");
        let line = self.array.line_mut(idx);
        let mut next = state;
        if event.dirty {
            line.set_data(&event.payload);
            next = match state {
                State::E => State::M,
                State::EInv => State::MInv,
                State::EInvX => State::MInvX,
                other => other,
            };
        }
        if line.is_owner(&event.src) {
            line.remove_owner();
        } else {
            line.remove_sharer(&event.src);
        }
        event.evict = false;
        line.set_state(next);
        next
    }

    /// Retries an eviction that an allocation was waiting for.
    ///
    /// `event.addr` holds the address being evicted and `event.base_addr` the address
    /// waiting for the line.
    pub(super) fn handle_null_cmd(&mut self, event: MemEvent) -> Result<bool, ProtocolViolation> {
        let old_addr = event.addr;
        let new_addr = event.base_addr;
        if !self.mshr.evict_pointers(old_addr).contains(&new_addr) {
            debug!(cache = %self.name, old = format_args!("{old_addr:#x}"), new = format_args!("{new_addr:#x}"), "dropping stale eviction replay");
            return Ok(true);
        }

        let idx = self
            .array
            .peek(old_addr)
            .unwrap_or_else(|| self.array.find_replacement_candidate(new_addr));

        if self.handle_eviction(idx) {
            self.array.deallocate(idx);
            if let Some(front) = self.mshr.front_event(new_addr).cloned() {
                self.retry_buffer.push(front);
                self.mshr.add_pending_retry(new_addr);
            }
            if self.mshr.remove_evict_pointer(old_addr, new_addr) {
                self.retry(old_addr);
            }
        } else {
            let victim = self.array.line(idx).base_addr();
            if victim != old_addr {
                self.mshr.insert_eviction(victim, new_addr);
                if self.mshr.remove_evict_pointer(old_addr, new_addr) {
                    self.retry(old_addr);
                }
            }
        }
        Ok(true)
    }
}
