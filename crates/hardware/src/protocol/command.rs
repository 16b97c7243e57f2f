//! Protocol command kinds.
//!
//! Every message exchanged between hierarchy levels carries one `Command`. This module
//! provides:
//! 1. **Enumeration:** All request, forward-request, response and internal command kinds.
//! 2. **Classification:** Direction of travel and request/response pairing.
//! 3. **Naming:** Stable names used in traces and statistic keys (`eventSent_<Cmd>`).

use std::fmt;

use serde::Deserialize;

/// A protocol command kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub enum Command {
    /// Internal replay of a completed eviction.
    #[serde(rename = "NULLCMD")]
    NullCmd,
    /// Read request for a shared copy.
    GetS,
    /// Request for an exclusive (writable) copy.
    GetX,
    /// Exclusive read (read-modify-write / locked access).
    GetSX,
    /// Uncached write.
    Write,
    /// Data response granting a shared copy.
    GetSResp,
    /// Data response granting an exclusive copy.
    GetXResp,
    /// Response to `Write`.
    WriteResp,
    /// Write back a line without invalidating it.
    FlushLine,
    /// Write back and invalidate a line.
    FlushLineInv,
    /// Completion of `FlushLine` / `FlushLineInv`.
    FlushLineResp,
    /// Flush the entire hierarchy.
    FlushAll,
    /// Completion of `FlushAll`.
    FlushAllResp,
    /// Flush manager asking a peer to flush itself.
    ForwardFlush,
    /// Peer reporting that its self-flush finished.
    AckFlush,
    /// Flush manager releasing blocked peers.
    UnblockFlush,
    /// Clean eviction of a shared copy.
    PutS,
    /// Clean eviction of an exclusive copy.
    PutE,
    /// Dirty eviction of a modified copy.
    PutM,
    /// Downgrade of an exclusive copy to shared, with data.
    PutX,
    /// Invalidate a shared copy.
    Inv,
    /// Invalidate regardless of the copy's state, discarding data.
    ForceInv,
    /// Fetch data without changing the copy's state.
    Fetch,
    /// Fetch data and invalidate the copy.
    FetchInv,
    /// Fetch data and downgrade the copy to shared.
    FetchInvX,
    /// Response to `Fetch` / `FetchInv`.
    FetchResp,
    /// Response to `FetchInvX`.
    FetchXResp,
    /// Acknowledgment of `Inv` / `ForceInv`.
    AckInv,
    /// Acknowledgment of a writeback.
    AckPut,
    /// Negative acknowledgment; the rejected event travels inside.
    #[serde(rename = "NACK")]
    Nack,
    /// Uncached move: put.
    Put,
    /// Uncached move: get.
    Get,
    /// Acknowledgment of an uncached move.
    AckMove,
    /// Custom extension request.
    CustomReq,
    /// Custom extension response.
    CustomResp,
    /// Custom extension acknowledgment.
    CustomAck,
}

impl Command {
    /// Every command kind, in declaration order.
    pub const ALL: [Self; 36] = [
        Self::NullCmd,
        Self::GetS,
        Self::GetX,
        Self::GetSX,
        Self::Write,
        Self::GetSResp,
        Self::GetXResp,
        Self::WriteResp,
        Self::FlushLine,
        Self::FlushLineInv,
        Self::FlushLineResp,
        Self::FlushAll,
        Self::FlushAllResp,
        Self::ForwardFlush,
        Self::AckFlush,
        Self::UnblockFlush,
        Self::PutS,
        Self::PutE,
        Self::PutM,
        Self::PutX,
        Self::Inv,
        Self::ForceInv,
        Self::Fetch,
        Self::FetchInv,
        Self::FetchInvX,
        Self::FetchResp,
        Self::FetchXResp,
        Self::AckInv,
        Self::AckPut,
        Self::Nack,
        Self::Put,
        Self::Get,
        Self::AckMove,
        Self::CustomReq,
        Self::CustomResp,
        Self::CustomAck,
    ];

    /// Returns the name used in traces and statistic keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NullCmd => "NULLCMD",
            Self::GetS => "GetS",
            Self::GetX => "GetX",
            Self::GetSX => "GetSX",
            Self::Write => "Write",
            Self::GetSResp => "GetSResp",
            Self::GetXResp => "GetXResp",
            Self::WriteResp => "WriteResp",
            Self::FlushLine => "FlushLine",
            Self::FlushLineInv => "FlushLineInv",
            Self::FlushLineResp => "FlushLineResp",
            Self::FlushAll => "FlushAll",
            Self::FlushAllResp => "FlushAllResp",
            Self::ForwardFlush => "ForwardFlush",
            Self::AckFlush => "AckFlush",
            Self::UnblockFlush => "UnblockFlush",
            Self::PutS => "PutS",
            Self::PutE => "PutE",
            Self::PutM => "PutM",
            Self::PutX => "PutX",
            Self::Inv => "Inv",
            Self::ForceInv => "ForceInv",
            Self::Fetch => "Fetch",
            Self::FetchInv => "FetchInv",
            Self::FetchInvX => "FetchInvX",
            Self::FetchResp => "FetchResp",
            Self::FetchXResp => "FetchXResp",
            Self::AckInv => "AckInv",
            Self::AckPut => "AckPut",
            Self::Nack => "NACK",
            Self::Put => "Put",
            Self::Get => "Get",
            Self::AckMove => "AckMove",
            Self::CustomReq => "CustomReq",
            Self::CustomResp => "CustomResp",
            Self::CustomAck => "CustomAck",
        }
    }

    /// Returns the response command that completes this request, if any.
    ///
    /// # Returns
    ///
    /// `None` for responses and for commands that are never answered.
    pub const fn response(self) -> Option<Self> {
        match self {
            Self::GetS => Some(Self::GetSResp),
            Self::GetX | Self::GetSX => Some(Self::GetXResp),
            Self::Write => Some(Self::WriteResp),
            Self::FlushLine | Self::FlushLineInv => Some(Self::FlushLineResp),
            Self::FlushAll => Some(Self::FlushAllResp),
            Self::ForwardFlush => Some(Self::AckFlush),
            Self::PutS | Self::PutE | Self::PutM | Self::PutX => Some(Self::AckPut),
            Self::Inv | Self::ForceInv => Some(Self::AckInv),
            Self::Fetch | Self::FetchInv => Some(Self::FetchResp),
            Self::FetchInvX => Some(Self::FetchXResp),
            Self::Get | Self::Put => Some(Self::AckMove),
            Self::CustomReq => Some(Self::CustomResp),
            _ => None,
        }
    }

    /// Returns `true` for data requests issued by the level above (`GetS`, `GetX`, `GetSX`).
    pub const fn is_data_request(self) -> bool {
        matches!(self, Self::GetS | Self::GetX | Self::GetSX)
    }

    /// Returns `true` for writebacks travelling toward memory.
    pub const fn is_writeback(self) -> bool {
        matches!(self, Self::PutS | Self::PutE | Self::PutM | Self::PutX)
    }

    /// Returns `true` for invalidation-class requests sent by a lower level.
    pub const fn is_invalidation(self) -> bool {
        matches!(
            self,
            Self::Inv | Self::ForceInv | Self::Fetch | Self::FetchInv | Self::FetchInvX
        )
    }

    /// Returns `true` for new requests from the level above that a cache may hold back
    /// while a hierarchy-wide flush is in progress.
    pub const fn is_flush_blockable(self) -> bool {
        matches!(
            self,
            Self::GetS | Self::GetX | Self::GetSX | Self::FlushLine | Self::FlushLineInv
        )
    }

    /// Returns `true` if events of this kind travel from the processor side toward memory.
    ///
    /// A NACK for such an event travels back up; a NACK for any other event travels down.
    pub const fn travels_down(self) -> bool {
        matches!(
            self,
            Self::GetS
                | Self::GetX
                | Self::GetSX
                | Self::Write
                | Self::FlushLine
                | Self::FlushLineInv
                | Self::FlushAll
                | Self::PutS
                | Self::PutE
                | Self::PutM
                | Self::PutX
                | Self::FetchResp
                | Self::FetchXResp
                | Self::AckInv
                | Self::AckFlush
                | Self::Get
                | Self::Put
                | Self::CustomReq
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
