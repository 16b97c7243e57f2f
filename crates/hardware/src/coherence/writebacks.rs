//! Writebacks from the upper level.
//!
//! A writeback removes its sender from the line's sharer or owner record. When the line
//! was waiting on invalidations and the sender was one of the peers still owing a response,
//! the writeback counts as that response.

use super::CoherenceEngine;
use crate::common::{Addr, ProtocolViolation};
use crate::protocol::{Command, MemEvent, State};

impl CoherenceEngine {
    pub(super) fn handle_put_s(&mut self, mut event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let state = self.state_of(line);
        if in_mshr {
            self.mshr.remove_pending_retry(addr);
        }
        let idx = self.require_line(line, &event, state)?;

        let state = self.do_eviction(&mut event, idx, state);
        self.count_state_event(Command::PutS, state);
        let done = self.writeback_resolves_ack(addr, &event.src);

        match state {
            State::S | State::E | State::M | State::SB => {}
            State::SInv | State::EInv | State::MInv | State::SBInv => {
                if done {
                    let next = match state {
                        State::SInv => State::S,
                        State::EInv => State::E,
                        State::MInv => State::M,
                        _ => State::SB,
                    };
                    self.set_state(idx, next);
                    self.retry(addr);
                }
            }
            State::SMInv => {
                if done {
                    self.set_state(idx, State::SM);
                    if !self.mshr.in_progress(addr) {
                        self.retry(addr);
                    }
                }
            }
            _ => return Err(self.unhandled(&event, state)),
        }

        if self.send_writeback_ack {
            self.send_ack_put(&event);
        }
        Ok(true)
    }

    /// Handles `PutE` and `PutM`.
    pub(super) fn handle_put_e_m(&mut self, mut event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let state = self.state_of(line);
        if in_mshr {
            self.mshr.remove_pending_retry(addr);
        }
        self.count_state_event(event.cmd, state);
        let idx = self.require_line(line, &event, state)?;

        let state = self.do_eviction(&mut event, idx, state);
        let done = self.writeback_resolves_ack(addr, &event.src);

        match state {
            State::E | State::M => {}
            State::EInv | State::EInvX | State::MInv | State::MInvX => {
                if done {
                    let next = if matches!(state, State::EInv | State::EInvX) { State::E } else { State::M };
                    self.set_state(idx, next);
                    self.retry(addr);
                }
            }
            _ => return Err(self.unhandled(&event, state)),
        }

        if self.send_writeback_ack {
            self.send_ack_put(&event);
        }
        Ok(true)
    }

    /// Handles a downgrade from exclusive to shared carrying the line's data.
    pub(super) fn handle_put_x(&mut self, mut event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let state = self.state_of(line);
        if in_mshr {
            self.mshr.remove_pending_retry(addr);
        }
        self.count_state_event(Command::PutX, state);
        let idx = self.require_line(line, &event, state)?;

        let state = self.do_eviction(&mut event, idx, state);
        self.array.line_mut(idx).add_sharer(&event.src);

        match state {
            State::E | State::M => {}
            State::EInv | State::MInv => {
                let fetch_pending = self
                    .mshr
                    .front_event(addr)
                    .is_some_and(|e| e.cmd == Command::FetchInvX);
                if fetch_pending {
                    let _ = self.awaited.remove(addr, &event.src);
                    self.retry(addr);
                }
            }
            State::EInvX | State::MInvX => {
                if self.awaited.remove(addr, &event.src)
                    && self.mshr.acks_needed(addr) > 0
                    && self.mshr.decrement_acks_needed(addr)
                {
                    let next = if state == State::EInvX { State::E } else { State::M };
                    self.set_state(idx, next);
                    self.retry(addr);
                }
            }
            _ => return Err(self.unhandled(&event, state)),
        }

        if self.send_writeback_ack {
            self.send_ack_put(&event);
        }
        Ok(true)
    }

    /// Clears `src` from the responses awaited at `addr`.
    ///
    /// # Returns
    ///
    /// `true` if no acknowledgment remains outstanding for `addr` afterwards.
    fn writeback_resolves_ack(&mut self, addr: Addr, src: &str) -> bool {
        let awaited = self.awaited.remove(addr, src);
        if self.mshr.acks_needed(addr) == 0 {
            return true;
        }
        awaited && self.mshr.decrement_acks_needed(addr)
    }
}
