//! Invalidation and fetch requests from the lower level.
//!
//! An inclusive cache must clear every upper-level copy before it can answer. A request that
//! finds a line with upper copies invalidates them and waits in the MSHR; one that finds the
//! line busy queues at the front or right behind an in-flight demand request.

use super::CoherenceEngine;
use crate::common::{Addr, ProtocolViolation};
use crate::mshr::{InsertAt, MemEventStatus};
use crate::protocol::{Command, MemEvent, State};

/// States an invalidation moves a line to: while upper copies are being invalidated, and
/// once the line holds none.
#[derive(Clone, Copy)]
struct InvTargets {
    busy: State,
    idle: State,
}

const fn inv_targets(state: State) -> Option<InvTargets> {
    let (busy, idle) = match state {
        State::S => (State::SInv, State::I),
        State::E => (State::EInv, State::I),
        State::M => (State::MInv, State::I),
        State::SM => (State::SMInv, State::IM),
        State::SB => (State::SBInv, State::I),
        _ => return None,
    };
    Some(InvTargets { busy, idle })
}

impl CoherenceEngine {
    /// Queue position for a lower-level request that must wait on a busy line.
    ///
    /// Behind an in-flight demand request, which completes locally; otherwise at the front.
    fn stall_position(&self, addr: Addr) -> (InsertAt, bool) {
        if self.front_is_data_request(addr) {
            (InsertAt::Index(1), false)
        } else {
            (InsertAt::Index(0), true)
        }
    }

    fn allocate_forward(&mut self, event: &MemEvent, in_mshr: bool, at: InsertAt) -> MemEventStatus {
        if in_mshr {
            MemEventStatus::Ok
        } else {
            self.allocate_mshr(event, true, at)
        }
    }

    /// Counts an invalidation-class event and the loss of a prefetched line once.
    fn profile_invalidation(&mut self, event: &MemEvent, state: State, line: Option<usize>, in_mshr: bool, mark: bool) {
        let addr = event.base_addr;
        if !in_mshr || !self.mshr.profiled(addr) {
            self.count_state_event(event.cmd, state);
            if let Some(idx) = line {
                self.record_prefetch_result(idx, "prefetch_inv");
            }
            if in_mshr || mark {
                self.mshr.set_profiled(addr);
            }
        }
    }

    pub(super) fn handle_fetch(&mut self, event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let state = self.state_of(line);
        if in_mshr {
            self.mshr.remove_pending_retry(addr);
        }
        self.count_state_event(Command::Fetch, state);

        match state {
            State::S | State::SM | State::SB | State::SInv | State::SMInv => {
                let idx = self.require_line(line, &event, state)?;
                self.send_response_down(&event, idx, true, false);
            }
            State::I | State::IS | State::IM | State::IB => {}
            _ => return Err(self.unhandled(&event, state)),
        }
        self.clean_up_event(&event, in_mshr);
        Ok(true)
    }

    pub(super) fn handle_inv(&mut self, event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let state = self.state_of(line);
        let mut status = MemEventStatus::Ok;
        if in_mshr {
            self.mshr.remove_pending_retry(addr);
        }

        let targets = match state {
            State::S | State::SB | State::SM => inv_targets(state),
            State::SInv | State::SMInv => {
                status = self.allocate_forward(&event, in_mshr, InsertAt::Index(0));
                None
            }
            State::I | State::IS | State::IM | State::IB => {
                if state == State::IB {
                    let idx = self.require_line(line, &event, state)?;
                    self.set_state(idx, State::I);
                }
                self.clean_up_event(&event, in_mshr);
                self.count_state_event(Command::Inv, state);
                None
            }
            _ => return Err(self.unhandled(&event, state)),
        };

        if let Some(targets) = targets {
            let idx = self.require_line(line, &event, state)?;
            // Replays are counted only once their MSHR entry has been marked profiled.
            if !in_mshr || self.mshr.profiled(addr) {
                self.count_state_event(Command::Inv, state);
                self.record_prefetch_result(idx, "prefetch_inv");
                if in_mshr {
                    self.mshr.set_profiled(addr);
                }
            }
            if self.array.line(idx).has_sharers() && !in_mshr {
                status = self.allocate_mshr(&event, true, InsertAt::Index(0));
            }
            if status != MemEventStatus::Reject {
                if self.invalidate_all(Some(&event), idx, in_mshr, None) {
                    self.set_state(idx, targets.busy);
                    status = MemEventStatus::Stall;
                } else {
                    self.send_response_down(&event, idx, false, true);
                    self.set_state(idx, targets.idle);
                    self.clean_up_after_request(&event, in_mshr);
                }
            }
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&event);
        }
        Ok(true)
    }

    /// Invalidates regardless of upper copies' states, discarding their data.
    pub(super) fn handle_force_inv(&mut self, event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let state = self.state_of(line);
        let mut status = MemEventStatus::Ok;
        let mut profile = false;
        if in_mshr {
            self.mshr.remove_pending_retry(addr);
        }

        let targets = match state {
            State::S | State::E | State::M | State::SM | State::SB => inv_targets(state),
            State::SInv | State::EInv => {
                status = self.allocate_forward(&event, in_mshr, InsertAt::Index(0));
                if status != MemEventStatus::Reject {
                    profile = true;
                    status = MemEventStatus::Stall;
                }
                None
            }
            State::MInv | State::EInvX | State::MInvX => {
                let (at, front) = self.stall_position(addr);
                status = self.allocate_forward(&event, in_mshr, at);
                if status == MemEventStatus::Reject {
                    profile = false;
                } else {
                    profile = front;
                    status = MemEventStatus::Stall;
                }
                None
            }
            State::I | State::IS | State::IM | State::IB => {
                if state == State::IB {
                    let idx = self.require_line(line, &event, state)?;
                    self.set_state(idx, State::I);
                }
                self.count_state_event(Command::ForceInv, state);
                self.clean_up_event(&event, in_mshr);
                None
            }
            State::SMInv => {
                let idx = self.require_line(line, &event, state)?;
                let requestor = self.mshr.front_event(addr).map(|e| e.src.clone());
                status = self.allocate_forward(&event, in_mshr, InsertAt::Index(0));
                if status != MemEventStatus::Reject {
                    profile = true;
                    if let Some(requestor) = requestor
                        && self.array.line(idx).is_sharer(&requestor)
                    {
                        let time = self.invalidate_sharer(&requestor, Some(&event), idx, in_mshr, Command::ForceInv);
                        self.array.line_mut(idx).set_timestamp(time);
                    }
                    status = MemEventStatus::Stall;
                }
                None
            }
            _ => return Err(self.unhandled(&event, state)),
        };

        if targets.is_some() || profile {
            self.profile_invalidation(&event, state, line, in_mshr, profile);
        }

        if let Some(targets) = targets {
            let idx = self.require_line(line, &event, state)?;
            let l = self.array.line(idx);
            if l.has_sharers() || l.has_owner() {
                if !in_mshr {
                    status = self.allocate_mshr(&event, true, InsertAt::Index(0));
                }
                if status != MemEventStatus::Reject {
                    let _ = self.invalidate_all(Some(&event), idx, in_mshr, Some(Command::ForceInv));
                    self.set_state(idx, targets.busy);
                    status = MemEventStatus::Stall;
                    self.mshr.set_profiled(addr);
                }
            } else {
                self.send_response_down(&event, idx, false, true);
                self.set_state(idx, targets.idle);
                self.clean_up_after_request(&event, in_mshr);
            }
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&event);
        }
        Ok(true)
    }

    /// Fetches the line's data and invalidates every copy.
    pub(super) fn handle_fetch_inv(&mut self, event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let state = self.state_of(line);
        let mut status = MemEventStatus::Ok;
        let mut profile = false;
        if in_mshr {
            self.mshr.remove_pending_retry(addr);
        }

        let targets = match state {
            State::I | State::IS | State::IM | State::IB => {
                if state == State::IB {
                    let idx = self.require_line(line, &event, state)?;
                    self.set_state(idx, State::I);
                }
                self.clean_up_event(&event, in_mshr);
                self.count_state_event(Command::FetchInv, state);
                None
            }
            State::S | State::E | State::M | State::SM | State::SB => inv_targets(state),
            State::SInv => {
                status = self.allocate_forward(&event, in_mshr, InsertAt::Index(1));
                if status != MemEventStatus::Reject {
                    status = MemEventStatus::Stall;
                }
                None
            }
            State::EInv | State::MInv | State::EInvX | State::MInvX => {
                let (at, front) = self.stall_position(addr);
                status = self.allocate_forward(&event, in_mshr, at);
                if status == MemEventStatus::Reject {
                    profile = false;
                } else {
                    profile = front;
                    status = MemEventStatus::Stall;
                }
                None
            }
            State::SMInv => {
                let idx = self.require_line(line, &event, state)?;
                let requestor = self.mshr.front_event(addr).map(|e| e.src.clone());
                status = self.allocate_forward(&event, in_mshr, InsertAt::Index(0));
                if status != MemEventStatus::Reject {
                    profile = true;
                    if let Some(requestor) = requestor {
                        let _ = self.invalidate_sharer(&requestor, Some(&event), idx, in_mshr, Command::Inv);
                    }
                    status = MemEventStatus::Stall;
                }
                None
            }
            _ => return Err(self.unhandled(&event, state)),
        };

        if targets.is_some() || profile {
            self.profile_invalidation(&event, state, line, in_mshr, profile);
        }

        if let Some(targets) = targets {
            let idx = self.require_line(line, &event, state)?;
            let l = self.array.line(idx);
            if l.has_sharers() || l.has_owner() {
                if !in_mshr {
                    status = self.allocate_mshr(&event, true, InsertAt::Index(0));
                }
                if status != MemEventStatus::Reject {
                    let _ = self.invalidate_all(Some(&event), idx, in_mshr, None);
                    self.set_state(idx, targets.busy);
                    status = MemEventStatus::Stall;
                    self.mshr.set_profiled(addr);
                }
            } else {
                self.send_response_down(&event, idx, true, true);
                self.set_state(idx, targets.idle);
                self.clean_up_after_request(&event, in_mshr);
            }
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&event);
        }
        Ok(true)
    }

    /// Fetches the line's data and downgrades every copy to shared.
    pub(super) fn handle_fetch_inv_x(&mut self, event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        let addr = event.base_addr;
        let line = self.array.peek(addr);
        let state = self.state_of(line);
        let mut status = MemEventStatus::Ok;
        if in_mshr {
            self.mshr.remove_pending_retry(addr);
        }

        match state {
            State::E | State::M => {
                let idx = self.require_line(line, &event, state)?;
                if self.array.line(idx).has_owner() {
                    status = self.allocate_forward(&event, in_mshr, InsertAt::Index(0));
                    if status == MemEventStatus::Ok {
                        self.downgrade_owner(&event, idx, in_mshr);
                        self.mshr.set_in_progress(addr);
                        let next = if state == State::E { State::EInvX } else { State::MInvX };
                        self.set_state(idx, next);
                        status = MemEventStatus::Stall;
                        self.mshr.set_profiled(addr);
                        self.count_state_event(Command::FetchInvX, state);
                    }
                } else {
                    self.send_response_down(&event, idx, true, true);
                    self.set_state(idx, State::S);
                    self.clean_up_after_request(&event, in_mshr);
                    self.count_state_event(Command::FetchInvX, state);
                }
            }
            State::EInv | State::MInv | State::EInvX | State::MInvX => {
                let idx = self.require_line(line, &event, state)?;
                if self.front_is_data_request(addr) {
                    status = if in_mshr {
                        MemEventStatus::Stall
                    } else {
                        self.allocate_mshr(&event, true, InsertAt::Index(1))
                    };
                } else if self.array.line(idx).has_owner() {
                    status = self.allocate_forward(&event, in_mshr, InsertAt::Index(0));
                    self.count_state_event(Command::FetchInvX, state);
                    self.mshr.set_profiled(addr);
                    if status != MemEventStatus::Reject {
                        status = MemEventStatus::Stall;
                    }
                } else {
                    // Respond before leaving the modified state so the data is marked dirty.
                    self.send_response_down(&event, idx, true, true);
                    self.set_state(idx, State::SInv);
                    self.clean_up_after_request(&event, in_mshr);
                    self.count_state_event(Command::FetchInvX, state);
                }
            }
            State::SB | State::IB | State::IS | State::IM | State::I => {
                self.clean_up_event(&event, in_mshr);
                self.count_state_event(Command::FetchInvX, state);
            }
            _ => return Err(self.unhandled(&event, state)),
        }

        if status == MemEventStatus::Reject {
            self.send_nack(&event);
        }
        Ok(true)
    }
}
