// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `nfsstat4` values used by the session core (RFC 8881 § 15).
//!
//! Status codes are plain values placed in result bodies. They never
//! propagate as Rust errors; internal failures that cannot be mapped to a
//! protocol code surface as [`NfsStat::ServerFault`].

/// The subset of the RFC 8881 status vocabulary this core produces or
/// inspects. Kept `#[repr(u32)]` so encoding is a cast.
#[repr(u32)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum NfsStat {
    #[default]
    Ok = 0,
    Inval = 22,
    Stale = 70,
    NotSupp = 10004,
    ServerFault = 10006,
    Delay = 10008,
    Expired = 10011,
    NoFileHandle = 10020,
    MinorVersMismatch = 10021,
    StaleClientid = 10022,
    BadXdr = 10036,
    OpIllegal = 10044,
    BadSession = 10052,
    BadSlot = 10053,
    ConnNotBoundToSession = 10055,
    SeqMisordered = 10063,
    SequencePos = 10064,
    RetryUncachedRep = 10068,
    TooManyOps = 10070,
    OpNotInSession = 10071,
    ClientidBusy = 10074,
    SeqFalseRetry = 10076,
    BadHighSlot = 10077,
    DeadSession = 10078,
    EncrAlgUnsupp = 10079,
}

impl NfsStat {
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Reverse mapping for reply validation on the backchannel. Unknown
    /// codes are surfaced raw by the caller.
    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Ok,
            22 => Self::Inval,
            70 => Self::Stale,
            10004 => Self::NotSupp,
            10006 => Self::ServerFault,
            10008 => Self::Delay,
            10011 => Self::Expired,
            10020 => Self::NoFileHandle,
            10021 => Self::MinorVersMismatch,
            10022 => Self::StaleClientid,
            10036 => Self::BadXdr,
            10044 => Self::OpIllegal,
            10052 => Self::BadSession,
            10053 => Self::BadSlot,
            10055 => Self::ConnNotBoundToSession,
            10063 => Self::SeqMisordered,
            10064 => Self::SequencePos,
            10068 => Self::RetryUncachedRep,
            10070 => Self::TooManyOps,
            10071 => Self::OpNotInSession,
            10074 => Self::ClientidBusy,
            10076 => Self::SeqFalseRetry,
            10077 => Self::BadHighSlot,
            10078 => Self::DeadSession,
            10079 => Self::EncrAlgUnsupp,
            _ => return None,
        })
    }
}
