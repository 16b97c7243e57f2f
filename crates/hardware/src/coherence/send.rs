//! Message construction and timing.
//!
//! Every message leaving the engine is built here, stamped with its delivery time and
//! queued toward memory (`down`) or toward the processors (`up`). Sending a message that
//! touches a line advances the line's timestamp so later accesses serialize behind it.

use super::CoherenceEngine;
use super::outgoing::{Outgoing, Route};
use crate::common::MAX_BACKOFF_SHIFT;
use crate::protocol::{Command, MemEvent, State};

impl CoherenceEngine {
    pub(super) fn push_down(&mut self, event: MemEvent, delivery_time: u64, route: Route) {
        self.stats.incr(&format!("eventSent_{}", event.cmd));
        let size = self.timing.packet_header + event.payload_size();
        self.outgoing_down.push(Outgoing {
            event,
            delivery_time,
            size,
            route,
        });
    }

    pub(super) fn push_up(&mut self, event: MemEvent, delivery_time: u64, route: Route) {
        self.stats.incr(&format!("eventSent_{}", event.cmd));
        let size = self.timing.packet_header + event.payload_size();
        self.outgoing_up.push(Outgoing {
            event,
            delivery_time,
            size,
            route,
        });
    }

    /// Forwards a copy of `event` toward memory.
    ///
    /// The copy keeps the event id so the response can be matched to the queued request.
    ///
    /// # Returns
    ///
    /// The delivery time.
    pub(super) fn forward_message(&mut self, event: &MemEvent, size: u64, base_time: u64, data: Option<&[u8]>) -> u64 {
        let mut forward = event.clone();
        forward.src.clone_from(&self.name);
        forward.dst.clear();
        forward.size = size;
        forward.payload = data.map(<[u8]>::to_vec).unwrap_or_default();

        let delivery = if event.is_noncacheable() {
            self.timestamp + self.timing.mshr
        } else {
            base_time.max(self.timestamp) + self.timing.tag
        };
        self.push_down(forward, delivery, Route::ByAddress);
        delivery
    }

    /// Sends the response to `event` back to its source.
    ///
    /// # Arguments
    ///
    /// * `event` - The request being answered.
    /// * `line` - Line whose data the response carries, if any.
    /// * `in_mshr` - The request waited in the MSHR (MSHR latency instead of access latency).
    /// * `time` - Earliest time the line is free.
    /// * `cmd` - Response command; the request's default response when `None`.
    /// * `success` - Outcome flag for flush responses.
    ///
    /// # Returns
    ///
    /// The delivery time.
    pub(super) fn send_response_up(
        &mut self,
        event: &MemEvent,
        line: Option<usize>,
        in_mshr: bool,
        time: u64,
        cmd: Option<Command>,
        success: bool,
    ) -> u64 {
        let id = self.next_id();
        let mut response = match cmd {
            Some(cmd) => event.make_response_with(id, cmd),
            None => event.make_response(id),
        };
        response.src.clone_from(&self.name);
        response.dst.clone_from(&event.src);
        if let Some(idx) = line {
            response.payload = self.array.line(idx).data().to_vec();
            response.size = response.payload_size();
        }
        response.success = success;

        let latency = if in_mshr { self.timing.mshr } else { self.timing.access };
        let delivery = time.max(self.timestamp) + latency;
        if let Some((stat, sample)) = self.latency.finish(event.id, event.cmd, delivery) {
            self.stats.add(&stat, sample);
        }
        self.push_up(response, delivery, Route::ByDestination);
        delivery
    }

    /// Answers a request from the lower level, optionally with the line's data.
    ///
    /// Data read from a modified line is marked dirty.
    pub(super) fn send_response_down(&mut self, event: &MemEvent, idx: usize, data: bool, evict: bool) {
        let id = self.next_id();
        let mut response = event.make_response(id);
        response.src.clone_from(&self.name);
        response.dst.clone_from(&event.src);
        let line = self.array.line(idx);
        if data {
            response.payload = line.data().to_vec();
            response.dirty = matches!(line.state(), State::M | State::MInv | State::MInvX);
        }
        response.evict = evict;
        response.size = self.line_size;

        let latency = if data { self.timing.access } else { self.timing.tag };
        let delivery = self.timestamp + latency;
        self.push_down(response, delivery, Route::ByDestination);
    }

    /// Forwards a line flush toward memory, carrying the line's data when `evict` is set.
    pub(super) fn forward_flush(&mut self, event: &MemEvent, line: Option<usize>, evict: bool) {
        let mut flush = event.clone();
        flush.src.clone_from(&self.name);
        flush.dst.clear();

        let mut base = self.timestamp;
        let latency = match line {
            Some(idx) if evict => {
                let l = self.array.line(idx);
                flush.evict = true;
                flush.payload = l.data().to_vec();
                flush.dirty = l.state() == State::M;
                self.timing.access
            }
            _ => {
                flush.evict = false;
                flush.dirty = false;
                flush.payload.clear();
                self.timing.tag
            }
        };
        if let Some(idx) = line {
            base = base.max(self.array.line(idx).timestamp());
        }
        let delivery = base + latency;
        self.push_down(flush, delivery, Route::ByAddress);
        if let Some(idx) = line {
            self.array.line_mut(idx).set_timestamp(delivery.saturating_sub(1));
        }
    }

    /// Writes line `idx` back toward memory.
    pub(super) fn send_writeback(&mut self, cmd: Command, idx: usize, dirty: bool) {
        let id = self.next_id();
        let line = self.array.line(idx);
        let addr = line.base_addr();
        let mut writeback = MemEvent::new(id, &self.name, addr, addr, cmd, self.line_size);

        let mut latency = self.timing.tag;
        if dirty || self.writeback_clean_blocks {
            writeback.payload = line.data().to_vec();
            writeback.dirty = dirty;
            latency = self.timing.access;
        }
        let delivery = self.timestamp.max(line.timestamp()) + latency;
        self.push_down(writeback, delivery, Route::ByAddress);
        self.array.line_mut(idx).set_timestamp(delivery.saturating_sub(1));
    }

    pub(super) fn send_ack_put(&mut self, event: &MemEvent) {
        let id = self.next_id();
        let mut ack = event.make_response(id);
        ack.src.clone_from(&self.name);
        ack.dst.clone_from(&event.src);
        ack.rqstr.clone_from(&event.src);
        let delivery = self.timestamp + self.timing.tag;
        self.push_up(ack, delivery, Route::ByDestination);
    }

    /// Builds an invalidation-class request for line `idx` addressed to `dst`.
    fn build_invalidation(&mut self, cmd: Command, idx: usize, dst: &str, event: Option<&MemEvent>) -> MemEvent {
        let id = self.next_id();
        let addr = self.array.line(idx).base_addr();
        let mut inv = MemEvent::new(id, &self.name, addr, addr, cmd, self.line_size);
        match event {
            Some(e) => {
                inv.flags = e.flags;
                inv.rqstr.clone_from(&e.rqstr);
            }
            None => inv.rqstr.clone_from(&self.name),
        }
        dst.clone_into(&mut inv.dst);
        inv
    }

    fn invalidation_time(&self, idx: usize, in_mshr: bool) -> u64 {
        let base = self.timestamp.max(self.array.line(idx).timestamp());
        base + if in_mshr { self.timing.mshr } else { self.timing.tag }
    }

    /// Asks the owner of line `idx` to downgrade to shared (`FetchInvX`).
    pub(super) fn downgrade_owner(&mut self, event: &MemEvent, idx: usize, in_mshr: bool) {
        let Some(owner) = self.array.line(idx).owner().map(str::to_owned) else {
            return;
        };
        let fetch = self.build_invalidation(Command::FetchInvX, idx, &owner, Some(event));
        let addr = fetch.base_addr;
        self.mshr.increment_acks_needed(addr);
        self.awaited.record(addr, &owner, fetch.id);

        let delivery = self.invalidation_time(idx, in_mshr);
        self.push_up(fetch, delivery, Route::ByDestination);
        self.array.line_mut(idx).set_timestamp(delivery);
    }

    /// Invalidates the copy held by sharer `sharer`.
    ///
    /// # Returns
    ///
    /// The delivery time, or 0 if `sharer` holds no copy.
    pub(super) fn invalidate_sharer(
        &mut self,
        sharer: &str,
        event: Option<&MemEvent>,
        idx: usize,
        in_mshr: bool,
        cmd: Command,
    ) -> u64 {
        if !self.array.line(idx).is_sharer(sharer) {
            return 0;
        }
        let inv = self.build_invalidation(cmd, idx, sharer, event);
        let addr = inv.base_addr;
        self.awaited.record(addr, sharer, inv.id);

        let delivery = self.invalidation_time(idx, in_mshr);
        self.push_up(inv, delivery, Route::ByDestination);
        self.mshr.increment_acks_needed(addr);
        delivery
    }

    /// Invalidates the exclusive copy of line `idx` with `cmd`.
    ///
    /// # Returns
    ///
    /// `false` if the line has no owner.
    pub(super) fn invalidate_owner(&mut self, event: Option<&MemEvent>, idx: usize, in_mshr: bool, cmd: Command) -> bool {
        let Some(owner) = self.array.line(idx).owner().map(str::to_owned) else {
            return false;
        };
        let inv = self.build_invalidation(cmd, idx, &owner, event);
        let addr = inv.base_addr;
        self.mshr.increment_acks_needed(addr);
        self.awaited.record(addr, &owner, inv.id);

        let delivery = self.invalidation_time(idx, in_mshr);
        self.push_up(inv, delivery, Route::ByDestination);
        self.array.line_mut(idx).set_timestamp(delivery);
        true
    }

    /// Invalidates every upper-level copy of line `idx`.
    ///
    /// The owner, if any, receives `cmd` (default `FetchInv`); otherwise every sharer receives
    /// `cmd` (default `Inv`).
    ///
    /// # Returns
    ///
    /// `true` if at least one invalidation was sent.
    pub(super) fn invalidate_all(&mut self, event: Option<&MemEvent>, idx: usize, in_mshr: bool, cmd: Option<Command>) -> bool {
        if self.invalidate_owner(event, idx, in_mshr, cmd.unwrap_or(Command::FetchInv)) {
            return true;
        }
        let cmd = cmd.unwrap_or(Command::Inv);
        let sharers: Vec<String> = self.array.line(idx).sharers().iter().cloned().collect();
        let mut delivery = 0;
        for sharer in &sharers {
            delivery = self.invalidate_sharer(sharer, event, idx, in_mshr, cmd);
        }
        if delivery == 0 {
            return false;
        }
        self.array.line_mut(idx).set_timestamp(delivery);
        true
    }

    /// Invalidates every sharer of line `idx` except the source of `event`.
    ///
    /// # Returns
    ///
    /// `true` if at least one invalidation was sent.
    pub(super) fn invalidate_except_requestor(&mut self, event: &MemEvent, idx: usize, in_mshr: bool) -> bool {
        let sharers: Vec<String> = self
            .array
            .line(idx)
            .sharers()
            .iter()
            .filter(|s| **s != event.src)
            .cloned()
            .collect();
        let mut delivery = 0;
        for sharer in &sharers {
            delivery = self.invalidate_sharer(sharer, Some(event), idx, in_mshr, Command::Inv);
        }
        if delivery == 0 {
            return false;
        }
        self.array.line_mut(idx).set_timestamp(delivery);
        true
    }

    /// Rejects `event` back to its source.
    pub(super) fn send_nack(&mut self, event: &MemEvent) {
        let id = self.next_id();
        let mut nack = event.make_nack(id);
        nack.src.clone_from(&self.name);
        nack.dst.clone_from(&event.src);
        let delivery = self.timestamp + self.timing.tag;
        if event.cmd.travels_down() {
            self.push_up(nack, delivery, Route::ByDestination);
        } else {
            self.push_down(nack, delivery, Route::ByDestination);
        }
    }

    /// Sends a NACKed event again after an exponential backoff.
    pub(super) fn resend(&mut self, mut event: MemEvent, towards_cpu: bool) {
        let backoff = 1_u64 << event.retries.min(MAX_BACKOFF_SHIFT);
        event.retries += 1;
        event.src.clone_from(&self.name);
        let delivery = self.timestamp + self.timing.mshr + backoff;
        if towards_cpu {
            self.push_up(event, delivery, Route::ByDestination);
        } else if event.cmd == Command::FlushAll {
            self.push_down(event, delivery, Route::ByDestination);
        } else {
            event.dst.clear();
            self.push_down(event, delivery, Route::ByAddress);
        }
    }
}
