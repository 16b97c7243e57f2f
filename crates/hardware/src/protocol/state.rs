//! Coherence line states.
//!
//! This module defines the stable and transient states a cache line moves through. It
//! provides:
//! 1. **Enumeration:** Stable `I/S/E/M` plus the transient states used by the inclusive
//!    protocol.
//! 2. **Classification:** Stable vs. in-transition checks.
//! 3. **Naming:** Trace names (`S_Inv`) and statistic names (`SInv`).

use std::fmt;

/// The coherence state of a cache line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum State {
    /// Not present (no line allocated).
    NP,
    /// Invalid.
    #[default]
    I,
    /// Shared.
    S,
    /// Exclusive (clean).
    E,
    /// Modified.
    M,
    /// Was I, GetS outstanding.
    IS,
    /// Was I, GetX outstanding.
    IM,
    /// Was S, upgrade outstanding.
    SM,
    /// Was S, invalidations outstanding.
    SInv,
    /// Upgrade and invalidations outstanding.
    SMInv,
    /// Was E, invalidations outstanding.
    EInv,
    /// Was M, invalidations outstanding.
    MInv,
    /// Was E, owner downgrade outstanding.
    EInvX,
    /// Was M, owner downgrade outstanding.
    MInvX,
    /// Was S, blocked on a flush response.
    SB,
    /// Was invalidated, blocked on a flush response.
    IB,
    /// Blocked on a flush response with invalidations outstanding.
    SBInv,
}

impl State {
    /// Every state, in declaration order.
    pub const ALL: [Self; 17] = [
        Self::NP,
        Self::I,
        Self::S,
        Self::E,
        Self::M,
        Self::IS,
        Self::IM,
        Self::SM,
        Self::SInv,
        Self::SMInv,
        Self::EInv,
        Self::MInv,
        Self::EInvX,
        Self::MInvX,
        Self::SB,
        Self::IB,
        Self::SBInv,
    ];

    /// Returns the trace name of this state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NP => "NP",
            Self::I => "I",
            Self::S => "S",
            Self::E => "E",
            Self::M => "M",
            Self::IS => "IS",
            Self::IM => "IM",
            Self::SM => "SM",
            Self::SInv => "S_Inv",
            Self::SMInv => "SM_Inv",
            Self::EInv => "E_Inv",
            Self::MInv => "M_Inv",
            Self::EInvX => "E_InvX",
            Self::MInvX => "M_InvX",
            Self::SB => "S_B",
            Self::IB => "I_B",
            Self::SBInv => "SB_Inv",
        }
    }

    /// Returns the name used in statistic keys: the trace name without underscores.
    pub fn stat_name(self) -> String {
        self.as_str().replace('_', "")
    }

    /// Returns `true` if no operation is outstanding on a line in this state.
    pub const fn is_stable(self) -> bool {
        matches!(self, Self::NP | Self::I | Self::S | Self::E | Self::M)
    }

    /// Returns `true` if the line is waiting on an outstanding operation and may not be
    /// replaced.
    pub const fn in_transition(self) -> bool {
        !self.is_stable()
    }

    /// Returns `true` if the line holds valid data.
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::NP | Self::I)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
