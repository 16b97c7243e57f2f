//! Hierarchy-wide flush.
//!
//! A `FlushAll` travels from a processor to the flush manager, normally the last-level
//! cache. The manager coordinates one flush at a time:
//! 1. **Forward:** Every flush peer above it receives a `ForwardFlush` and repeats the
//!    process for its own peers.
//! 2. **Invalidate:** Once all peers have acknowledged, the cache writes back and
//!    invalidates every valid line, waiting on lines with transactions in flight.
//! 3. **Acknowledge:** A helper reports `AckFlush` to the cache that forwarded the flush and
//!    holds new requests until it receives `UnblockFlush`.
//! 4. **Complete:** The manager unblocks its peers and answers the request with
//!    `FlushAllResp`.

use std::collections::BTreeSet;

use tracing::debug;

use super::CoherenceEngine;
use super::outgoing::Route;
use crate::common::{Addr, ProtocolViolation};
use crate::mshr::MemEventStatus;
use crate::protocol::{Command, MemEvent, State};

/// Progress of the flush at the front of the flush queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlushState {
    /// No flush is being processed.
    #[default]
    Ready,
    /// Waiting for flush peers to acknowledge.
    Forward,
    /// Waiting for peers to drain their outstanding requests.
    Drain,
    /// Writing back and invalidating local lines.
    Invalidate,
}

/// Flush bookkeeping of one cache.
#[derive(Debug, Default)]
pub struct FlushControl {
    pub(super) state: FlushState,
    /// Line addresses still to be invalidated.
    pub(super) pending: BTreeSet<Addr>,
    /// This cache acknowledged a forwarded flush and waits for `UnblockFlush`.
    pub(super) awaiting_unblock: bool,
    /// A replay of the front flush is already queued.
    resume_scheduled: bool,
}

impl CoherenceEngine {
    pub(super) fn handle_flush_all(&mut self, event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        if in_mshr {
            if self.flush_manager {
                self.advance_flush();
            } else if self.mshr.front_flush().map(|f| f.id) == Some(event.id) && !self.mshr.flush_in_progress() {
                self.forward_flush_all(&event)?;
            }
            return Ok(true);
        }

        self.stats.incr("FlushAll_received");
        match self.mshr.insert_flush(event.clone(), false, self.flush_manager) {
            MemEventStatus::Reject => self.send_nack(&event),
            MemEventStatus::Stall => {}
            MemEventStatus::Ok => {
                if self.flush_manager {
                    self.advance_flush();
                } else {
                    self.forward_flush_all(&event)?;
                }
            }
        }
        Ok(true)
    }

    /// Sends a flush request on toward the flush manager.
    fn forward_flush_all(&mut self, event: &MemEvent) -> Result<(), ProtocolViolation> {
        let Some(dest) = self.flush_dest.clone() else {
            return Err(ProtocolViolation::Flush {
                cache: self.name.clone(),
                reason: "FlushAll received but no flush destination is configured".to_owned(),
            });
        };
        let mut forward = event.clone();
        forward.src.clone_from(&self.name);
        forward.dst = dest;
        let delivery = self.timestamp + self.timing.tag;
        self.push_down(forward, delivery, Route::ByDestination);
        self.mshr.set_flush_in_progress();
        Ok(())
    }

    pub(super) fn handle_flush_all_resp(&mut self, event: MemEvent) -> Result<bool, ProtocolViolation> {
        if self.flush_manager {
            return Err(ProtocolViolation::Flush {
                cache: self.name.clone(),
                reason: "flush manager received FlushAllResp".to_owned(),
            });
        }
        let req = event
            .response_to
            .and_then(|id| self.mshr.remove_flush(id))
            .ok_or_else(|| ProtocolViolation::MissingRequest {
                cache: self.name.clone(),
                cmd: event.cmd,
                addr: event.base_addr,
                time: self.timestamp,
            })?;
        let _ = self.send_response_up(&req, None, true, self.timestamp, Some(Command::FlushAllResp), event.success);
        self.retry_flush();
        Ok(true)
    }

    pub(super) fn handle_forward_flush(&mut self, event: MemEvent, in_mshr: bool) -> Result<bool, ProtocolViolation> {
        if self.flush_manager {
            return Err(ProtocolViolation::Flush {
                cache: self.name.clone(),
                reason: "flush manager received ForwardFlush".to_owned(),
            });
        }
        if !in_mshr {
            let _ = self.mshr.insert_flush(event, true, false);
        }
        self.advance_flush();
        Ok(true)
    }

    pub(super) fn handle_ack_flush(&mut self, _event: MemEvent) -> Result<bool, ProtocolViolation> {
        if self.mshr.decrement_flush_acks() {
            self.advance_flush();
        }
        Ok(true)
    }

    pub(super) fn handle_unblock_flush(&mut self, _event: MemEvent) -> Result<bool, ProtocolViolation> {
        let _ = self.broadcast_to_peers(Command::UnblockFlush, None);
        if self.mshr.front_flush_is_forward()
            && let Some(id) = self.mshr.front_flush().map(|f| f.id)
        {
            let _ = self.mshr.remove_flush(id);
        }
        self.flush.state = FlushState::Ready;
        self.flush.awaiting_unblock = false;
        self.flush.pending.clear();
        self.retry_flush();
        Ok(true)
    }

    /// Sends a fresh `cmd` to every flush peer, tagged with `rqstr` when given.
    fn broadcast_to_peers(&mut self, cmd: Command, rqstr: Option<&str>) -> u32 {
        let peers = self.flush_peers.clone();
        let delivery = self.timestamp + self.timing.tag;
        for peer in &peers {
            let id = self.next_id();
            let mut message = MemEvent::new(id, &self.name, 0, 0, cmd, 0);
            if let Some(rqstr) = rqstr {
                rqstr.clone_into(&mut message.rqstr);
            }
            peer.clone_into(&mut message.dst);
            self.push_up(message, delivery, Route::ByDestination);
        }
        u32::try_from(peers.len()).unwrap_or(u32::MAX)
    }

    /// Moves the front flush as far through its phases as current conditions allow.
    pub(super) fn advance_flush(&mut self) {
        self.flush.resume_scheduled = false;
        let Some(front) = self.mshr.front_flush().cloned() else {
            return;
        };
        let forwarded = self.mshr.front_flush_is_forward();
        if self.flush.awaiting_unblock || (!forwarded && !self.flush_manager) {
            return;
        }

        if self.flush.state == FlushState::Ready {
            let peers = self.broadcast_to_peers(Command::ForwardFlush, Some(&front.rqstr));
            self.mshr.increment_flush_acks(peers);
            self.flush.state = FlushState::Forward;
            debug!(cache = %self.name, peers, "flush forwarded");
        }
        if matches!(self.flush.state, FlushState::Forward | FlushState::Drain) && self.mshr.flush_acks() == 0 {
            self.flush.state = FlushState::Invalidate;
            self.flush.pending = self.array.valid_addresses();
        }
        if self.flush.state != FlushState::Invalidate {
            return;
        }

        self.flush_sweep();
        if !self.flush.pending.is_empty() {
            return;
        }

        if forwarded {
            let id = self.next_id();
            let mut ack = front.make_response_with(id, Command::AckFlush);
            ack.src.clone_from(&self.name);
            ack.dst.clone_from(&front.src);
            let delivery = self.timestamp + self.timing.tag;
            self.push_down(ack, delivery, Route::ByDestination);
            self.flush.awaiting_unblock = true;
        } else {
            let _ = self.broadcast_to_peers(Command::UnblockFlush, None);
            let _ = self.send_response_up(&front, None, true, self.timestamp, Some(Command::FlushAllResp), true);
            let _ = self.mshr.remove_flush(front.id);
            self.stats.incr("FlushAll_completed");
            self.flush.state = FlushState::Ready;
            self.retry_flush();
        }
    }

    /// Evicts every pending line that is not busy.
    fn flush_sweep(&mut self) {
        let pending: Vec<Addr> = self.flush.pending.iter().copied().collect();
        for addr in pending {
            if self.mshr.exists(addr) || self.mshr.acks_needed(addr) > 0 {
                continue;
            }
            let Some(idx) = self.array.peek(addr) else {
                let _ = self.flush.pending.remove(&addr);
                continue;
            };
            let state = self.array.line(idx).state();
            if state == State::I {
                let _ = self.flush.pending.remove(&addr);
                continue;
            }
            if !state.is_stable() {
                continue;
            }
            if self.handle_eviction(idx) {
                self.array.deallocate(idx);
                if !self.mshr.pending_writeback(addr) {
                    let _ = self.flush.pending.remove(&addr);
                }
            }
        }
    }

    /// Resumes the flush sweep when `addr` was one of the lines it waits on and is now idle.
    pub(super) fn poke_flush(&mut self, addr: Addr) {
        if self.flush.state != FlushState::Invalidate
            || self.flush.resume_scheduled
            || !self.flush.pending.contains(&addr)
            || self.mshr.exists(addr)
            || self.mshr.acks_needed(addr) > 0
        {
            return;
        }
        if let Some(front) = self.mshr.front_flush().cloned() {
            self.retry_buffer.push(front);
            self.flush.resume_scheduled = true;
        }
    }

    /// Schedules the front flush for replay unless it waits on the flush manager.
    pub(super) fn retry_flush(&mut self) {
        let Some(front) = self.mshr.front_flush().cloned() else {
            return;
        };
        if !self.flush_manager && !self.mshr.front_flush_is_forward() && self.mshr.flush_in_progress() {
            return;
        }
        self.retry_buffer.push(front);
    }
}
