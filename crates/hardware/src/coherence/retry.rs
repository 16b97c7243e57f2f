//! Cleanup after resolved transactions and replay scheduling.

use tracing::trace;

use super::CoherenceEngine;
use crate::common::Addr;
use crate::mshr::MshrEntryType;
use crate::protocol::MemEvent;

impl CoherenceEngine {
    /// Removes `event` from the MSHR if it was queued there.
    pub(super) fn clean_up_event(&mut self, event: &MemEvent, in_mshr: bool) {
        if in_mshr {
            let _ = self.mshr.remove_event(event.base_addr, event.id);
        }
    }

    /// Retires a request that completed locally and schedules whatever waits behind it.
    pub(super) fn clean_up_after_request(&mut self, event: &MemEvent, in_mshr: bool) {
        self.clean_up_event(event, in_mshr);
        self.replay_front(event.base_addr);
    }

    /// Retires the request a response completed and schedules whatever waits behind it.
    pub(super) fn clean_up_after_response(&mut self, addr: Addr) {
        let _ = self.mshr.remove_front(addr);
        self.replay_front(addr);
    }

    /// Schedules the new front entry for `addr` if nothing blocks it.
    pub(super) fn replay_front(&mut self, addr: Addr) {
        if self.mshr.acks_needed(addr) == 0 {
            match self.mshr.front_type(addr) {
                Some(MshrEntryType::Event) if !self.mshr.in_progress(addr) => self.schedule_front(addr),
                Some(MshrEntryType::Evict) => self.schedule_evictions(addr),
                _ => {}
            }
        }
        self.poke_flush(addr);
    }

    /// Schedules the front entry for `addr` unconditionally.
    pub(super) fn retry(&mut self, addr: Addr) {
        match self.mshr.front_type(addr) {
            Some(MshrEntryType::Event) => self.schedule_front(addr),
            Some(_) if !self.mshr.pending_writeback(addr) => self.schedule_evictions(addr),
            _ => {}
        }
        self.poke_flush(addr);
    }

    fn schedule_front(&mut self, addr: Addr) {
        if let Some(front) = self.mshr.front_event(addr).cloned() {
            trace!(cache = %self.name, event = %front, "schedule replay");
            self.retry_buffer.push(front);
            self.mshr.add_pending_retry(addr);
        }
    }

    /// Queues one eviction replay per address waiting for the line at `addr`.
    pub(super) fn schedule_evictions(&mut self, addr: Addr) {
        for waiting in self.mshr.evict_pointers(addr) {
            let id = self.next_id();
            self.retry_buffer
                .push(MemEvent::eviction_replay(id, &self.name, addr, waiting));
        }
    }
}
