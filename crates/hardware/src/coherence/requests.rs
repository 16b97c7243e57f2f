//! Demand requests and line flushes from the upper level.

use super::CoherenceEngine;
use super::latency::LatencyType;
use crate::common::ProtocolViolation;
use crate::mshr::{InsertAt, MemEventStatus};
use crate::protocol::{Command, MemEvent, State};

impl CoherenceEngine {
    pub(super) fn handle_get_s(&mut self, event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let mut line = self.array.lookup(addr, true);
        let state = self.state_of(line);
        let local_prefetch = event.is_local_prefetch(&self.name);
        let mut status = MemEventStatus::Ok;

        if in_mshr {
            self.mshr.remove_pending_retry(addr);
        }

        match state {
            State::I => {
                (status, line) = self.process_cache_miss(&event, line, in_mshr);
                if status == MemEventStatus::Ok {
                    let idx = self.require_line(line, &event, state)?;
                    if !self.mshr.profiled(addr) {
                        self.count_state_event(Command::GetS, state);
                        self.count_access(Command::GetS, false, in_mshr);
                        self.latency.set_type(event.id, LatencyType::Miss);
                        self.mshr.set_profiled(addr);
                    }
                    let send_time = self.forward_message(&event, event.size, 0, None);
                    let l = self.array.line_mut(idx);
                    l.set_state(State::IS);
                    l.set_timestamp(send_time);
                    self.mshr.set_in_progress(addr);
                }
            }
            State::S => {
                let idx = self.require_line(line, &event, state)?;
                if !in_mshr || !self.mshr.profiled(addr) {
                    self.count_state_event(Command::GetS, state);
                    self.count_access(Command::GetS, true, in_mshr);
                    if local_prefetch {
                        self.stats.incr("prefetch_redundant");
                    } else {
                        self.latency.set_type(event.id, LatencyType::Hit);
                    }
                }
                if !local_prefetch {
                    self.record_prefetch_result(idx, "prefetch_useful");
                    self.array.line_mut(idx).add_sharer(&event.src);
                    let time = self.array.line(idx).timestamp();
                    let send_time = self.send_response_up(&event, Some(idx), in_mshr, time, None, false);
                    self.array.line_mut(idx).set_timestamp(send_time.saturating_sub(1));
                }
                self.clean_up_after_request(&event, in_mshr);
            }
            State::E | State::M => {
                let idx = self.require_line(line, &event, state)?;
                if local_prefetch {
                    if !in_mshr || !self.mshr.profiled(addr) {
                        self.count_state_event(Command::GetS, state);
                        self.count_access(Command::GetS, true, in_mshr);
                        self.stats.incr("prefetch_redundant");
                    }
                    self.clean_up_after_request(&event, in_mshr);
                    return Ok(true);
                }
                self.record_prefetch_result(idx, "prefetch_useful");

                if self.array.line(idx).has_owner() {
                    if !in_mshr {
                        status = self.allocate_mshr(&event, false, InsertAt::Back);
                    }
                    if status == MemEventStatus::Ok {
                        if !self.mshr.profiled(addr) {
                            self.count_state_event(Command::GetS, state);
                            self.count_access(Command::GetS, true, in_mshr);
                            self.latency.set_type(event.id, LatencyType::Inv);
                            self.mshr.set_profiled(addr);
                        }
                        self.downgrade_owner(&event, idx, in_mshr);
                        let next = if state == State::E { State::EInvX } else { State::MInvX };
                        self.set_state(idx, next);
                        self.mshr.set_in_progress(addr);
                    }
                } else {
                    if !in_mshr || !self.mshr.profiled(addr) {
                        self.count_state_event(Command::GetS, state);
                        self.count_access(Command::GetS, true, in_mshr);
                        self.latency.set_type(event.id, LatencyType::Hit);
                        if in_mshr {
                            self.mshr.set_profiled(addr);
                        }
                    }
                    let exclusive = self.grants_exclusive();
                    let l = self.array.line_mut(idx);
                    let cmd = if !l.has_sharers() && exclusive {
                        l.set_owner(&event.src);
                        Command::GetXResp
                    } else {
                        l.add_sharer(&event.src);
                        Command::GetSResp
                    };
                    let time = l.timestamp();
                    let send_time = self.send_response_up(&event, Some(idx), in_mshr, time, Some(cmd), false);
                    self.array.line_mut(idx).set_timestamp(send_time);
                    self.clean_up_after_request(&event, in_mshr);
                }
            }
            _ => {
                if !in_mshr {
                    status = self.allocate_mshr(&event, false, InsertAt::Back);
                }
            }
        }

        if status == MemEventStatus::Reject {
            if local_prefetch {
                return Ok(false);
            }
            self.send_nack(&event);
        }
        Ok(true)
    }

    /// Handles `GetX` and `GetSX`.
    pub(super) fn handle_get_x(&mut self, event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let mut line = self.array.lookup(addr, true);
        let state = self.state_of(line);
        let cmd = event.cmd;
        let mut status = MemEventStatus::Ok;

        if in_mshr {
            self.mshr.remove_pending_retry(addr);
        }

        match state {
            State::I => {
                (status, line) = self.process_cache_miss(&event, line, in_mshr);
                if status == MemEventStatus::Ok {
                    let idx = self.require_line(line, &event, state)?;
                    if !self.mshr.profiled(addr) {
                        self.latency.set_type(event.id, LatencyType::Miss);
                        self.count_state_event(cmd, state);
                        self.count_access(cmd, false, in_mshr);
                        self.mshr.set_profiled(addr);
                    }
                    let send_time = self.forward_message(&event, self.line_size, 0, None);
                    let l = self.array.line_mut(idx);
                    l.set_state(State::IM);
                    l.set_timestamp(send_time);
                    self.mshr.set_in_progress(addr);
                }
            }
            State::S if !self.last_level => {
                let idx = self.require_line(line, &event, state)?;
                if !in_mshr {
                    status = self.allocate_mshr(&event, false, InsertAt::Back);
                }
                if status == MemEventStatus::Ok {
                    if !self.mshr.profiled(addr) {
                        self.count_state_event(cmd, state);
                        self.count_access(cmd, false, in_mshr);
                        self.mshr.set_profiled(addr);
                    }
                    self.record_prefetch_result(idx, "prefetch_coherence_miss");
                    self.latency.set_type(event.id, LatencyType::Upgrade);

                    let send_time = self.forward_message(&event, self.line_size, 0, None);
                    if self.invalidate_except_requestor(&event, idx, in_mshr) {
                        self.set_state(idx, State::SMInv);
                    } else {
                        let l = self.array.line_mut(idx);
                        l.set_state(State::SM);
                        l.set_timestamp(send_time);
                    }
                    self.mshr.set_in_progress(addr);
                }
            }
            State::S | State::E | State::M => {
                let idx = self.require_line(line, &event, state)?;
                if !in_mshr || !self.mshr.profiled(addr) {
                    self.count_state_event(cmd, state);
                    self.count_access(cmd, true, in_mshr);
                    if in_mshr {
                        self.mshr.set_profiled(addr);
                    }
                }
                self.record_prefetch_result(idx, "prefetch_useful");

                let other_sharers = self.array.line(idx).has_other_sharers(&event.src);
                if other_sharers || self.array.line(idx).has_owner() {
                    if !in_mshr {
                        status = self.allocate_mshr(&event, false, InsertAt::Back);
                    }
                    if status == MemEventStatus::Ok {
                        self.latency.set_type(event.id, LatencyType::Inv);
                        self.mshr.set_profiled(addr);
                        if other_sharers {
                            let _ = self.invalidate_except_requestor(&event, idx, in_mshr);
                        } else {
                            let _ = self.invalidate_owner(Some(&event), idx, in_mshr, Command::FetchInv);
                        }
                        self.set_state(idx, State::MInv);
                        self.mshr.set_in_progress(addr);
                    }
                } else {
                    if !in_mshr || !self.mshr.profiled(addr) {
                        self.latency.set_type(event.id, LatencyType::Hit);
                    }
                    let l = self.array.line_mut(idx);
                    l.set_state(State::M);
                    l.set_owner(&event.src);
                    l.remove_sharer(&event.src);
                    let time = l.timestamp();
                    let send_time = self.send_response_up(&event, Some(idx), in_mshr, time, None, false);
                    self.array.line_mut(idx).set_timestamp(send_time);
                    self.clean_up_after_request(&event, in_mshr);
                }
            }
            _ => {
                if !in_mshr {
                    status = self.allocate_mshr(&event, false, InsertAt::Back);
                }
            }
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&event);
        }
        Ok(true)
    }

    /// Writes a line back toward memory while keeping a shared copy.
    pub(super) fn handle_flush_line(&mut self, mut event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let mut state = self.state_of(line);

        let mut status = MemEventStatus::Ok;
        if in_mshr {
            self.mshr.remove_pending_retry(addr);
        } else {
            status = self.allocate_mshr(&event, false, InsertAt::Back);
        }
        self.latency.set_type(event.id, LatencyType::Hit);

        // The eviction half of the flush is applied once, before the flush itself can stall.
        let mut acked = false;
        if event.evict {
            let idx = self.require_line(line, &event, state)?;
            state = self.do_eviction(&mut event, idx, state);
            self.array.line_mut(idx).add_sharer(&event.src);
            self.mshr.clear_evict(addr, event.id);
            acked = true;
        }

        match state {
            State::I | State::S => {}
            State::E | State::M => {
                let idx = self.require_line(line, &event, state)?;
                if status == MemEventStatus::Ok && self.array.line(idx).has_owner() {
                    if !self.mshr.profiled(addr) {
                        self.count_state_event(Command::FlushLine, state);
                        self.mshr.set_profiled(addr);
                    }
                    self.downgrade_owner(&event, idx, in_mshr);
                    let next = if state == State::M { State::MInvX } else { State::EInvX };
                    self.set_state(idx, next);
                    status = MemEventStatus::Stall;
                }
            }
            State::EInv | State::MInv => {
                let idx = self.require_line(line, &event, state)?;
                let fetch_pending = self
                    .mshr
                    .front_event(addr)
                    .is_some_and(|e| e.cmd == Command::FetchInvX);
                if fetch_pending && !self.array.line(idx).has_owner() {
                    let _ = self.awaited.remove(addr, &event.src);
                    self.retry(addr);
                }
                if status == MemEventStatus::Ok {
                    status = MemEventStatus::Stall;
                }
            }
            State::EInvX | State::MInvX => {
                let idx = self.require_line(line, &event, state)?;
                if acked {
                    if self.awaited.remove(addr, &event.src) {
                        let _ = self.mshr.decrement_acks_needed(addr);
                    }
                    let next = if state == State::EInvX { State::E } else { State::M };
                    self.set_state(idx, next);
                    self.retry(addr);
                }
                if status == MemEventStatus::Ok {
                    status = MemEventStatus::Stall;
                }
            }
            _ => {
                if status == MemEventStatus::Ok {
                    status = MemEventStatus::Stall;
                }
            }
        }

        if status == MemEventStatus::Ok {
            if !self.mshr.profiled(addr) {
                self.count_state_event(Command::FlushLine, state);
                self.mshr.set_profiled(addr);
            }
            let downgrade = matches!(state, State::E | State::M);
            self.forward_flush(&event, line, downgrade);
            if let Some(idx) = line {
                self.record_prefetch_result(idx, "prefetch_evict");
                if state != State::I {
                    self.set_state(idx, State::SB);
                }
            }
            self.mshr.set_in_progress(addr);
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&event);
        }
        Ok(true)
    }

    /// Writes a line back toward memory and invalidates every copy of it.
    pub(super) fn handle_flush_line_inv(&mut self, mut event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let mut state = self.state_of(line);

        let mut status = MemEventStatus::Ok;
        if in_mshr {
            self.mshr.remove_pending_retry(addr);
        } else {
            status = self.allocate_mshr(&event, false, InsertAt::Back);
        }

        let mut done = self.mshr.acks_needed(addr) == 0;
        if event.evict {
            let idx = self.require_line(line, &event, state)?;
            state = self.do_eviction(&mut event, idx, state);
            self.mshr.clear_evict(addr, event.id);
            if self.awaited.remove(addr, &event.src) && !done {
                done = self.mshr.decrement_acks_needed(addr);
            }
        }
        self.latency.set_type(event.id, LatencyType::Hit);

        match state {
            State::I => {}
            State::S | State::E | State::M => {
                let idx = self.require_line(line, &event, state)?;
                if status == MemEventStatus::Ok && self.invalidate_all(Some(&event), idx, in_mshr, None) {
                    let next = match state {
                        State::S => State::SInv,
                        State::E => State::EInv,
                        _ => State::MInv,
                    };
                    self.set_state(idx, next);
                    status = MemEventStatus::Stall;
                }
            }
            State::SInv | State::EInv | State::EInvX | State::MInv | State::MInvX | State::SBInv | State::SMInv => {
                let idx = self.require_line(line, &event, state)?;
                if done {
                    let next = match state {
                        State::SInv => State::S,
                        State::EInv | State::EInvX => State::E,
                        State::MInv | State::MInvX => State::M,
                        State::SBInv => State::SB,
                        _ => State::SM,
                    };
                    self.set_state(idx, next);
                    self.retry(addr);
                }
                if status == MemEventStatus::Ok {
                    status = MemEventStatus::Stall;
                }
            }
            _ => {
                if status == MemEventStatus::Ok {
                    status = MemEventStatus::Stall;
                }
            }
        }

        if status == MemEventStatus::Ok {
            if !self.mshr.profiled(addr) {
                self.count_state_event(Command::FlushLineInv, state);
                self.mshr.set_profiled(addr);
            }
            self.mshr.set_in_progress(addr);
            if let Some(idx) = line {
                self.record_prefetch_result(idx, "prefetch_evict");
            }
            self.forward_flush(&event, line, state != State::I);
            if let Some(idx) = line
                && state != State::I
            {
                self.set_state(idx, State::IB);
            }
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&event);
        }
        Ok(true)
    }
}
