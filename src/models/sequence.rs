// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SEQUENCE / CB_SEQUENCE argument and result codecs (RFC 8881 § 18.46,
//! § 20.9).

use bitflags::bitflags;
use bytes::Bytes;

use crate::models::{
    common::SessionId,
    status::NfsStat,
    xdr::{XdrError, XdrReader, XdrWriter},
};

bitflags! {
    /// `sa_status_flags` reported in every successful SEQUENCE result
    /// (RFC 8881 § 18.46.3). The XDR union places these inside the
    /// NFS4_OK arm, so error replies never carry them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SeqStatusFlags: u32 {
        const CB_PATH_DOWN = 0x00000001;
        const CB_GSS_CONTEXTS_EXPIRING = 0x00000002;
        const CB_GSS_CONTEXTS_EXPIRED = 0x00000004;
        const EXPIRED_ALL_STATE_REVOKED = 0x00000008;
        const EXPIRED_SOME_STATE_REVOKED = 0x00000010;
        const ADMIN_STATE_REVOKED = 0x00000020;
        const RECALLABLE_STATE_REVOKED = 0x00000040;
        const LEASE_MOVED = 0x00000080;
        const RESTART_RECLAIM_NEEDED = 0x00000100;
        const CB_PATH_DOWN_SESSION = 0x00000200;
        const BACKCHANNEL_FAULT = 0x00000400;
        const DEVID_CHANGED = 0x00000800;
        const DEVID_DELETED = 0x00001000;
    }
}

/// SEQUENCE4args.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceArgs {
    pub sessionid: SessionId,
    pub sequenceid: u32,
    pub slotid: u32,
    pub highest_slotid: u32,
    pub cachethis: bool,
}

impl SequenceArgs {
    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        Ok(Self {
            sessionid: SessionId::decode(r)?,
            sequenceid: r.u32()?,
            slotid: r.u32()?,
            highest_slotid: r.u32()?,
            cachethis: r.bool()?,
        })
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        self.sessionid.encode(w);
        w.u32(self.sequenceid);
        w.u32(self.slotid);
        w.u32(self.highest_slotid);
        w.bool(self.cachethis);
    }
}

/// The NFS4_OK arm of SEQUENCE4res.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceResOk {
    pub sessionid: SessionId,
    pub sequenceid: u32,
    pub slotid: u32,
    pub highest_slotid: u32,
    pub target_highest_slotid: u32,
    pub status_flags: SeqStatusFlags,
}

impl SequenceResOk {
    /// Full result body, status word included.
    pub fn encode(&self) -> Bytes {
        let mut w = XdrWriter::new();
        w.u32(NfsStat::Ok.code());
        self.sessionid.encode(&mut w);
        w.u32(self.sequenceid);
        w.u32(self.slotid);
        w.u32(self.highest_slotid);
        w.u32(self.target_highest_slotid);
        w.u32(self.status_flags.bits());
        w.into_bytes()
    }

    pub fn decode(r: &mut XdrReader) -> Result<Result<Self, NfsStat>, XdrError> {
        let code = r.u32()?;
        if code != NfsStat::Ok.code() {
            return Ok(Err(NfsStat::from_code(code).unwrap_or(NfsStat::ServerFault)));
        }
        Ok(Ok(Self {
            sessionid: SessionId::decode(r)?,
            sequenceid: r.u32()?,
            slotid: r.u32()?,
            highest_slotid: r.u32()?,
            target_highest_slotid: r.u32()?,
            status_flags: SeqStatusFlags::from_bits_truncate(r.u32()?),
        }))
    }
}

/// CB_SEQUENCE4args. Referring call lists are always empty in this core:
/// callbacks are never triggered from within a COMPOUND the client still
/// has in flight on the same session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbSequenceArgs {
    pub sessionid: SessionId,
    pub sequenceid: u32,
    pub slotid: u32,
    pub highest_slotid: u32,
    pub cachethis: bool,
}

impl CbSequenceArgs {
    pub fn encode(&self, w: &mut XdrWriter) {
        self.sessionid.encode(w);
        w.u32(self.sequenceid);
        w.u32(self.slotid);
        w.u32(self.highest_slotid);
        w.bool(self.cachethis);
        w.u32(0); // csa_referring_call_lists
    }

    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        let args = Self {
            sessionid: SessionId::decode(r)?,
            sequenceid: r.u32()?,
            slotid: r.u32()?,
            highest_slotid: r.u32()?,
            cachethis: r.bool()?,
        };
        let nlists = r.u32()?;
        for _ in 0..nlists {
            let _sessionid = SessionId::decode(r)?;
            let ncalls = r.u32()?;
            for _ in 0..ncalls {
                let _seq = r.u32()?;
                let _slot = r.u32()?;
            }
        }
        Ok(args)
    }
}

/// CB_SEQUENCE4res, NFS4_OK arm. Only decoded (the client encodes it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbSequenceResOk {
    pub sessionid: SessionId,
    pub sequenceid: u32,
    pub slotid: u32,
    pub highest_slotid: u32,
    pub target_highest_slotid: u32,
}

impl CbSequenceResOk {
    pub fn decode(r: &mut XdrReader) -> Result<Result<Self, NfsStat>, XdrError> {
        let code = r.u32()?;
        if code != NfsStat::Ok.code() {
            return Ok(Err(NfsStat::from_code(code).unwrap_or(NfsStat::ServerFault)));
        }
        Ok(Ok(Self {
            sessionid: SessionId::decode(r)?,
            sequenceid: r.u32()?,
            slotid: r.u32()?,
            highest_slotid: r.u32()?,
            target_highest_slotid: r.u32()?,
        }))
    }

    pub fn encode(&self) -> Bytes {
        let mut w = XdrWriter::new();
        w.u32(NfsStat::Ok.code());
        self.sessionid.encode(&mut w);
        w.u32(self.sequenceid);
        w.u32(self.slotid);
        w.u32(self.highest_slotid);
        w.u32(self.target_highest_slotid);
        w.into_bytes()
    }
}
