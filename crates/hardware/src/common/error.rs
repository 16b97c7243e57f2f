//! Error definitions.
//!
//! This module defines every failure the memory hierarchy can report. It provides:
//! 1. **Protocol violations:** Fatal coherence bugs detected by a cache's state machine.
//! 2. **Configuration errors:** Invalid or unreadable cache, memory and topology settings.
//! 3. **Simulation errors:** Top-level failures returned by the driver.

use thiserror::Error;

use super::addr::Addr;
use crate::protocol::{Command, EventId, State};

/// A coherence protocol bug detected while handling an event.
///
/// Protocol violations are never recovered from: the driver aborts the run after logging the
/// offending cache's status dump.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A command arrived while the line was in a state with no defined transition for it.
    #[error(
        "{cache}: {cmd} (id {id}) for {addr:#x} received in unhandled state {state} at time {time}"
    )]
    UnhandledState {
        /// Name of the cache that received the event.
        cache: String,
        /// Command of the offending event.
        cmd: Command,
        /// Line state when the event arrived.
        state: State,
        /// Line base address.
        addr: Addr,
        /// Unique id of the offending event.
        id: EventId,
        /// Simulated time of the violation.
        time: u64,
    },

    /// A command kind this cache never accepts.
    #[error("{cache}: received unexpected command {cmd} for {addr:#x} at time {time}")]
    UnexpectedCommand {
        /// Name of the cache that received the event.
        cache: String,
        /// Command of the offending event.
        cmd: Command,
        /// Target address.
        addr: Addr,
        /// Simulated time of the violation.
        time: u64,
    },

    /// A response arrived but no request for that address is waiting in the MSHR.
    #[error("{cache}: {cmd} for {addr:#x} has no matching request at time {time}")]
    MissingRequest {
        /// Name of the cache that received the response.
        cache: String,
        /// Command of the response.
        cmd: Command,
        /// Line base address.
        addr: Addr,
        /// Simulated time of the violation.
        time: u64,
    },

    /// A NACK carried a command that is never retried.
    #[error("{cache}: NACK for unhandled command {cmd} ({addr:#x}) at time {time}")]
    UnhandledNack {
        /// Name of the cache that received the NACK.
        cache: String,
        /// Command of the rejected event.
        cmd: Command,
        /// Line base address.
        addr: Addr,
        /// Simulated time of the violation.
        time: u64,
    },

    /// A flush-protocol message reached a cache whose flush role cannot handle it.
    #[error("{cache}: flush protocol error: {reason}")]
    Flush {
        /// Name of the cache.
        cache: String,
        /// What went wrong.
        reason: String,
    },
}

/// An invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value the hierarchy cannot be built with.
    #[error("invalid configuration for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The configuration text could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Builds an [`ConfigError::Invalid`] for `field`.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A failure reported by the simulation driver.
#[derive(Debug, Error)]
pub enum SimError {
    /// A cache detected a coherence protocol bug.
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// The hierarchy could not be constructed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A message was addressed to an endpoint that does not exist.
    #[error("no endpoint named '{0}'")]
    UnknownEndpoint(String),

    /// No address route covers the given address.
    #[error("{from}: no route for address {addr:#x}")]
    NoRoute {
        /// Component that tried to send.
        from: String,
        /// Target address.
        addr: Addr,
    },

    /// The cycle limit passed while work was still outstanding.
    #[error("no forward progress: work still outstanding at cycle {cycle}")]
    Deadlock {
        /// Cycle at which the driver gave up.
        cycle: u64,
    },
}
