//! Coherence protocol vocabulary.
//!
//! This module defines the types shared by every component that speaks the protocol. It
//! includes:
//! 1. **Commands:** The kinds of message exchanged between levels.
//! 2. **States:** Stable and transient line states.
//! 3. **Events:** The message type, its identifiers and flags.

/// Protocol command kinds.
pub mod command;

/// Cache line coherence states.
pub mod state;

/// Messages, ids and initialisation records.
pub mod event;

pub use command::Command;
pub use event::{EndpointKind, EventId, IdGenerator, InitCoherence, MemEvent, flags};
pub use state::State;
