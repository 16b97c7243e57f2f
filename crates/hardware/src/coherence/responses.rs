//! Responses, acknowledgments and NACKs.

use tracing::debug;

use super::CoherenceEngine;
use crate::common::ProtocolViolation;
use crate::protocol::{Command, MemEvent, State};

impl CoherenceEngine {
    pub(super) fn handle_get_s_resp(&mut self, event: MemEvent) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let state = self.state_of(line);
        self.count_state_event(Command::GetSResp, state);

        let mut req = self.front_request(&event)?;
        req.flags = event.flags;
        if state != State::IS {
            return Err(self.unhandled(&event, state));
        }
        let idx = self.require_line(line, &event, state)?;

        let l = self.array.line_mut(idx);
        l.set_data(&event.payload);
        l.set_state(State::S);
        if req.is_local_prefetch(&self.name) {
            l.set_prefetch(true);
        } else {
            l.add_sharer(&req.src);
            let time = l.timestamp();
            let send_time = self.send_response_up(&req, Some(idx), true, time, None, false);
            self.array.line_mut(idx).set_timestamp(send_time.saturating_sub(1));
        }
        self.clean_up_after_response(addr);
        Ok(true)
    }

    pub(super) fn handle_get_x_resp(&mut self, event: MemEvent) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let state = self.state_of(line);
        self.count_state_event(Command::GetXResp, state);

        let mut req = self.front_request(&event)?;
        req.flags = event.flags;
        let idx = self.require_line(line, &event, state)?;

        match state {
            State::IS => {
                let next = if event.dirty { State::M } else { self.protocol_state() };
                let exclusive = self.grants_exclusive() && next != State::S && self.mshr.size_of(addr) == 1;
                let l = self.array.line_mut(idx);
                l.set_data(&event.payload);
                l.set_state(next);
                if req.is_local_prefetch(&self.name) {
                    l.set_prefetch(true);
                } else {
                    let cmd = if exclusive {
                        l.set_owner(&req.src);
                        Command::GetXResp
                    } else {
                        l.add_sharer(&req.src);
                        Command::GetSResp
                    };
                    let time = l.timestamp();
                    let send_time = self.send_response_up(&req, Some(idx), true, time, Some(cmd), false);
                    self.array.line_mut(idx).set_timestamp(send_time.saturating_sub(1));
                }
                self.clean_up_after_response(addr);
            }
            State::IM | State::SM => {
                let l = self.array.line_mut(idx);
                if state == State::IM {
                    l.set_data(&event.payload);
                }
                l.set_state(State::M);
                l.set_owner(&req.src);
                l.remove_sharer(&req.src);
                let time = l.timestamp();
                let send_time = self.send_response_up(&req, Some(idx), true, time, None, false);
                self.array.line_mut(idx).set_timestamp(send_time.saturating_sub(1));
                self.clean_up_after_response(addr);
            }
            State::SMInv => self.set_state(idx, State::MInv),
            _ => return Err(self.unhandled(&event, state)),
        }
        Ok(true)
    }

    pub(super) fn handle_flush_line_resp(&mut self, event: MemEvent) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let state = self.state_of(line);
        self.count_state_event(Command::FlushLineResp, state);

        let req = self.front_request(&event)?;
        match state {
            State::I => {}
            State::IB => {
                let idx = self.require_line(line, &event, state)?;
                self.set_state(idx, State::I);
            }
            State::SB => {
                let idx = self.require_line(line, &event, state)?;
                self.set_state(idx, State::S);
            }
            _ => return Err(self.unhandled(&event, state)),
        }

        let time = line.map_or(self.timestamp, |idx| self.array.line(idx).timestamp());
        let _ = self.send_response_up(&req, None, true, time, Some(Command::FlushLineResp), event.success);
        self.clean_up_after_response(addr);
        Ok(true)
    }

    pub(super) fn handle_fetch_resp(&mut self, event: MemEvent) -> Result<bool, ProtocolViolation> {
        self.resolve_fetch(event, false)
    }

    pub(super) fn handle_fetch_x_resp(&mut self, event: MemEvent) -> Result<bool, ProtocolViolation> {
        self.resolve_fetch(event, true)
    }

    /// Applies the data returned by the owner of a line.
    ///
    /// The line leaves its fetch state for `E` or `M`; with `keep_sharer` the responder
    /// downgraded rather than invalidated and stays on as a sharer.
    fn resolve_fetch(&mut self, mut event: MemEvent, keep_sharer: bool) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let state = self.state_of(line);
        self.count_state_event(event.cmd, state);

        let idx = self.require_line(line, &event, state)?;
        if !matches!(state, State::EInv | State::MInv | State::EInvX | State::MInvX) {
            return Err(self.unhandled(&event, state));
        }

        if self.awaited.remove(addr, &event.src) {
            let _ = self.mshr.decrement_acks_needed(addr);
        }
        let state = self.do_eviction(&mut event, idx, state);
        let next = if matches!(state, State::MInv | State::MInvX) { State::M } else { State::E };
        let l = self.array.line_mut(idx);
        l.set_state(next);
        if keep_sharer {
            l.add_sharer(&event.src);
        }
        self.retry(addr);
        Ok(true)
    }

    pub(super) fn handle_ack_inv(&mut self, event: MemEvent) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let state = self.state_of(line);
        self.count_state_event(Command::AckInv, state);
        let idx = self.require_line(line, &event, state)?;

        let l = self.array.line_mut(idx);
        if l.is_owner(&event.src) {
            l.remove_owner();
        } else {
            l.remove_sharer(&event.src);
        }

        if !self.awaited.remove(addr, &event.src) {
            debug!(cache = %self.name, src = %event.src, addr = format_args!("{addr:#x}"), "dropping unexpected AckInv");
            return Ok(true);
        }
        if !self.mshr.decrement_acks_needed(addr) {
            return Ok(true);
        }

        match state {
            State::SInv => self.set_state(idx, State::S),
            State::EInv => self.set_state(idx, State::E),
            State::MInv => self.set_state(idx, State::M),
            State::SBInv => self.set_state(idx, State::SB),
            State::SMInv => {
                self.set_state(idx, State::SM);
                if self.mshr.in_progress(addr) {
                    return Ok(true);
                }
            }
            _ => return Err(self.unhandled(&event, state)),
        }
        self.retry(addr);
        Ok(true)
    }

    pub(super) fn handle_ack_put(&mut self, event: MemEvent) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let state = self.line_state(addr);
        self.count_state_event(Command::AckPut, state);

        if !self.mshr.remove_writeback(addr) {
            return Err(ProtocolViolation::MissingRequest {
                cache: self.name.clone(),
                cmd: event.cmd,
                addr,
                time: self.timestamp,
            });
        }
        self.replay_front(addr);
        Ok(true)
    }

    /// Resends the event a neighbour rejected.
    ///
    /// Requests and writebacks always go out again. Invalidations are resent only while the
    /// peer still owes the response to that exact event; otherwise the transaction has moved
    /// on and the NACK is dropped.
    pub(super) fn handle_nack(&mut self, event: MemEvent) -> Result<bool, ProtocolViolation> {
        let unhandled = |engine: &Self, cmd: Command| ProtocolViolation::UnhandledNack {
            cache: engine.name.clone(),
            cmd,
            addr: event.base_addr,
            time: engine.timestamp,
        };
        let Some(nacked) = event.nacked.as_deref().cloned() else {
            return Err(unhandled(self, event.cmd));
        };
        self.stats.incr(&format!("NACK_{}", nacked.cmd));

        match nacked.cmd {
            Command::GetS
            | Command::GetX
            | Command::GetSX
            | Command::FlushLine
            | Command::FlushLineInv
            | Command::PutS
            | Command::PutE
            | Command::PutM
            | Command::PutX
            | Command::FlushAll => self.resend(nacked, false),
            Command::FetchInv | Command::FetchInvX | Command::Inv | Command::ForceInv => {
                if self.awaited.is_awaiting(nacked.base_addr, &nacked.dst, nacked.id) {
                    self.resend(nacked, true);
                } else {
                    debug!(cache = %self.name, event = %nacked, "dropping NACK for resolved invalidation");
                }
            }
            other => return Err(unhandled(self, other)),
        }
        Ok(true)
    }
}
