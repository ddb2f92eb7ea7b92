// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Sun RPC (RFC 5531) call / reply framing over record-marked TCP
//! (RFC 1831 § 10).
//!
//! A record is a sequence of fragments, each prefixed by a 4-byte mark:
//!
//! ```text
//!  31  30 ............................ 0
//! +---+--------------------------------+
//! | L |      fragment length           |
//! +---+--------------------------------+
//! ```
//!
//! * **L** – last-fragment flag.
//! * The message body starts with `xid` and `msg_type`; the demultiplexer
//!   MUST route on `msg_type` (bytes 4..8) before any CALL decoding,
//!   because the same stream carries replies to our own callbacks.

use bytes::Bytes;
use thiserror::Error;
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32,
};

use crate::models::xdr::{XdrError, XdrReader, XdrWriter};

/// RPC protocol version (the only one that exists in the wild).
pub const RPC_VERSION: u32 = 2;

pub const MSG_TYPE_CALL: u32 = 0;
pub const MSG_TYPE_REPLY: u32 = 1;

pub const REPLY_MSG_ACCEPTED: u32 = 0;
pub const REPLY_MSG_DENIED: u32 = 1;

/// Authentication flavors the core recognises.
pub const AUTH_NONE: u32 = 0;
pub const AUTH_SYS: u32 = 1;
pub const RPCSEC_GSS: u32 = 6;

const LAST_FRAGMENT_BIT: u32 = 1 << 31;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Xdr(#[from] XdrError),
    #[error("rpc: invalid msg_type {0}")]
    BadMsgType(u32),
    #[error("rpc: unsupported rpc version {0}")]
    BadRpcVersion(u32),
    #[error("rpc: reply denied (reject_stat {0})")]
    Denied(u32),
}

/// Wire-safe record-marking word. Transparent over a big-endian `u32`.
#[repr(transparent)]
#[derive(Clone, Copy, Default, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RecordMark(U32<BigEndian>);

impl RecordMark {
    #[inline]
    pub fn new(len: u32, last: bool) -> Self {
        Self(U32::new(if last { len | LAST_FRAGMENT_BIT } else { len }))
    }

    #[inline]
    pub fn fragment_len(&self) -> u32 {
        self.0.get() & !LAST_FRAGMENT_BIT
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        (self.0.get() & LAST_FRAGMENT_BIT) != 0
    }
}

/// Fixed prefix of every RPC CALL body (six big-endian words).
#[repr(C)]
#[derive(Debug, Clone, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawCallPrefix {
    pub xid: U32<BigEndian>,
    pub msg_type: U32<BigEndian>,
    pub rpcvers: U32<BigEndian>,
    pub prog: U32<BigEndian>,
    pub vers: U32<BigEndian>,
    pub proc: U32<BigEndian>,
}

pub const CALL_PREFIX_LEN: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgType {
    Call,
    Reply,
}

/// Route a full record by its `msg_type` word without decoding anything
/// else. `None` when the record is shorter than the two leading words.
pub fn peek_msg_type(record: &[u8]) -> Option<MsgType> {
    if record.len() < 8 {
        return None;
    }
    match u32::from_be_bytes([record[4], record[5], record[6], record[7]]) {
        MSG_TYPE_CALL => Some(MsgType::Call),
        MSG_TYPE_REPLY => Some(MsgType::Reply),
        _ => None,
    }
}

/// XID of a record, for REPLY routing. Bytes 0..4.
pub fn peek_xid(record: &[u8]) -> Option<u32> {
    if record.len() < 4 {
        return None;
    }
    Some(u32::from_be_bytes([
        record[0], record[1], record[2], record[3],
    ]))
}

/// `opaque_auth`: flavor word plus an opaque body capped at 400 bytes by
/// RFC 5531.
#[derive(Debug, Clone, Default)]
pub struct OpaqueAuth {
    pub flavor: u32,
    pub body: Bytes,
}

impl OpaqueAuth {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        let flavor = r.u32()?;
        let body = r.opaque_var(400)?;
        Ok(Self { flavor, body })
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        w.u32(self.flavor);
        w.opaque_var(&self.body);
    }
}

/// `authsys_parms` (RFC 5531 appendix A). Decoded out of AUTH_SYS
/// credential bodies to extract the caller principal.
#[derive(Debug, Clone, Default)]
pub struct AuthSysParms {
    pub stamp: u32,
    pub machinename: String,
    pub uid: u32,
    pub gid: u32,
    pub gids: Vec<u32>,
}

impl AuthSysParms {
    pub fn decode(body: Bytes) -> Result<Self, XdrError> {
        let mut r = XdrReader::new(body);
        let stamp = r.u32()?;
        let machinename = r.string(255)?;
        let uid = r.u32()?;
        let gid = r.u32()?;
        let n = r.u32()?;
        if n > 16 {
            return Err(XdrError::TooLong { len: n, limit: 16 });
        }
        let mut gids = Vec::with_capacity(n as usize);
        for _ in 0..n {
            gids.push(r.u32()?);
        }
        Ok(Self {
            stamp,
            machinename,
            uid,
            gid,
            gids,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut w = XdrWriter::new();
        w.u32(self.stamp);
        w.string(&self.machinename);
        w.u32(self.uid);
        w.u32(self.gid);
        w.u32(self.gids.len() as u32);
        for g in &self.gids {
            w.u32(*g);
        }
        w.into_bytes()
    }
}

/// Parsed RPC CALL header. The returned reader is positioned at the
/// procedure arguments.
#[derive(Debug, Clone)]
pub struct CallHeader {
    pub xid: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
    pub cred: OpaqueAuth,
    pub verf: OpaqueAuth,
}

impl CallHeader {
    pub fn parse(record: Bytes) -> Result<(Self, XdrReader), RpcError> {
        let (prefix, _) = RawCallPrefix::ref_from_prefix(&record).map_err(|_| {
            XdrError::Truncated {
                need: CALL_PREFIX_LEN,
                have: record.len(),
            }
        })?;
        if prefix.msg_type.get() != MSG_TYPE_CALL {
            return Err(RpcError::BadMsgType(prefix.msg_type.get()));
        }
        if prefix.rpcvers.get() != RPC_VERSION {
            return Err(RpcError::BadRpcVersion(prefix.rpcvers.get()));
        }
        let header = Self {
            xid: prefix.xid.get(),
            prog: prefix.prog.get(),
            vers: prefix.vers.get(),
            proc: prefix.proc.get(),
            cred: OpaqueAuth::none(),
            verf: OpaqueAuth::none(),
        };
        let mut r = XdrReader::new(record.slice(CALL_PREFIX_LEN..));
        let cred = OpaqueAuth::decode(&mut r)?;
        let verf = OpaqueAuth::decode(&mut r)?;
        Ok((
            Self {
                cred,
                verf,
                ..header
            },
            r,
        ))
    }

    /// Encode a CALL record body (no record mark) with the given procedure
    /// arguments. Used by the backchannel sender for CB_COMPOUND.
    pub fn encode(&self, args: &[u8]) -> Bytes {
        let mut w = XdrWriter::new();
        w.u32(self.xid);
        w.u32(MSG_TYPE_CALL);
        w.u32(RPC_VERSION);
        w.u32(self.prog);
        w.u32(self.vers);
        w.u32(self.proc);
        self.cred.encode(&mut w);
        self.verf.encode(&mut w);
        w.raw(args);
        w.into_bytes()
    }
}

/// `accept_stat` values of an accepted reply.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStat {
    Success = 0,
    ProgUnavail = 1,
    ProgMismatch = 2,
    ProcUnavail = 3,
    GarbageArgs = 4,
    SystemErr = 5,
}

/// Build an accepted REPLY record body with an AUTH_NONE verifier.
pub fn encode_accepted_reply(xid: u32, stat: AcceptStat, body: &[u8]) -> Bytes {
    let mut w = XdrWriter::new();
    w.u32(xid);
    w.u32(MSG_TYPE_REPLY);
    w.u32(REPLY_MSG_ACCEPTED);
    OpaqueAuth::none().encode(&mut w);
    w.u32(stat as u32);
    w.raw(body);
    w.into_bytes()
}

/// Accepted PROG_MISMATCH reply advertising the supported version window.
pub fn encode_prog_mismatch(xid: u32, low: u32, high: u32) -> Bytes {
    let mut w = XdrWriter::new();
    w.u32(xid);
    w.u32(MSG_TYPE_REPLY);
    w.u32(REPLY_MSG_ACCEPTED);
    OpaqueAuth::none().encode(&mut w);
    w.u32(AcceptStat::ProgMismatch as u32);
    w.u32(low);
    w.u32(high);
    w.into_bytes()
}

/// Parsed REPLY header, as seen by the backchannel sender when the client
/// answers one of our CB_COMPOUNDs.
#[derive(Debug)]
pub struct ReplyHeader {
    pub xid: u32,
    pub accept_stat: u32,
}

impl ReplyHeader {
    /// Parse a REPLY record body; the returned reader is positioned at the
    /// procedure results. Denied replies surface as [`RpcError::Denied`].
    pub fn parse(record: Bytes) -> Result<(Self, XdrReader), RpcError> {
        let mut r = XdrReader::new(record);
        let xid = r.u32()?;
        let msg_type = r.u32()?;
        if msg_type != MSG_TYPE_REPLY {
            return Err(RpcError::BadMsgType(msg_type));
        }
        match r.u32()? {
            REPLY_MSG_ACCEPTED => {
                let _verf = OpaqueAuth::decode(&mut r)?;
                let accept_stat = r.u32()?;
                if accept_stat == AcceptStat::ProgMismatch as u32 {
                    let _low = r.u32()?;
                    let _high = r.u32()?;
                }
                Ok((Self { xid, accept_stat }, r))
            },
            REPLY_MSG_DENIED => {
                let reject_stat = r.u32()?;
                Err(RpcError::Denied(reject_stat))
            },
            other => Err(RpcError::BadMsgType(other)),
        }
    }
}
