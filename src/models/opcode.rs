// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `nfs_opnum4` / `nfs_cb_opnum4` operation numbers (RFC 8881 § 16, § 20).
//!
//! The dispatcher routes on these; opcodes the server knows nothing about
//! are answered with `OP_ILLEGAL` rather than treated as framing errors.

use std::convert::TryFrom;

use thiserror::Error;

/// Returned when a COMPOUND carries an operation number outside the
/// RFC-defined range.
#[derive(Debug, Error)]
#[error("unknown nfs operation number: {0}")]
pub struct UnknownOpcode(pub u32);

/// Fore-channel operation numbers the core dispatches or references.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Access = 3,
    Close = 4,
    Getattr = 9,
    Getfh = 10,
    Lock = 12,
    Lockt = 13,
    Locku = 14,
    Open = 18,
    Putfh = 22,
    Putrootfh = 24,
    Read = 25,
    Renew = 30,
    Write = 38,
    // v4.1 additions
    BackchannelCtl = 40,
    BindConnToSession = 41,
    ExchangeId = 42,
    CreateSession = 43,
    DestroySession = 44,
    SecinfoNoName = 52,
    Sequence = 53,
    TestStateid = 55,
    DestroyClientid = 57,
    ReclaimComplete = 58,
    Illegal = 10044,
}

impl OpCode {
    /// The session-exempt set: the only operations allowed in the first
    /// position of a v4.1 COMPOUND without a preceding SEQUENCE.
    #[inline]
    pub const fn is_session_exempt(self) -> bool {
        matches!(
            self,
            Self::ExchangeId
                | Self::CreateSession
                | Self::DestroySession
                | Self::BindConnToSession
        )
    }

    /// Operations whose v4.0 argument shape carries an open/lock-owner
    /// seqid that v4.1 replaces with slot ordering.
    #[inline]
    pub const fn carries_owner_seqid(self) -> bool {
        matches!(self, Self::Open | Self::Close | Self::Lock | Self::Locku)
    }

    /// Operations that only exist at minor version 1.
    #[inline]
    pub const fn requires_v41(self) -> bool {
        (self as u32) >= Self::BackchannelCtl as u32 && !matches!(self, Self::Illegal)
    }
}

impl TryFrom<u32> for OpCode {
    type Error = UnknownOpcode;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        Ok(match v {
            3 => Self::Access,
            4 => Self::Close,
            9 => Self::Getattr,
            10 => Self::Getfh,
            12 => Self::Lock,
            13 => Self::Lockt,
            14 => Self::Locku,
            18 => Self::Open,
            22 => Self::Putfh,
            24 => Self::Putrootfh,
            25 => Self::Read,
            30 => Self::Renew,
            38 => Self::Write,
            40 => Self::BackchannelCtl,
            41 => Self::BindConnToSession,
            42 => Self::ExchangeId,
            43 => Self::CreateSession,
            44 => Self::DestroySession,
            52 => Self::SecinfoNoName,
            53 => Self::Sequence,
            55 => Self::TestStateid,
            57 => Self::DestroyClientid,
            58 => Self::ReclaimComplete,
            10044 => Self::Illegal,
            other => return Err(UnknownOpcode(other)),
        })
    }
}

/// Callback operation numbers carried inside CB_COMPOUND.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbOpCode {
    CbGetattr = 3,
    CbRecall = 4,
    CbSequence = 11,
    CbIllegal = 10044,
}

impl TryFrom<u32> for CbOpCode {
    type Error = UnknownOpcode;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        Ok(match v {
            3 => Self::CbGetattr,
            4 => Self::CbRecall,
            11 => Self::CbSequence,
            10044 => Self::CbIllegal,
            other => return Err(UnknownOpcode(other)),
        })
    }
}
