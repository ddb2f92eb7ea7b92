// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! CB_COMPOUND construction and reply parsing (RFC 8881 § 20).
//!
//! The server is the caller here: every CB_COMPOUND carries CB_SEQUENCE
//! first, then exactly one callback operation, and travels over the
//! client's own fore-channel TCP connection.

use bytes::Bytes;
use enum_dispatch::enum_dispatch;

use crate::models::{
    common::{FileHandle, StateId},
    opcode::CbOpCode,
    sequence::CbSequenceArgs,
    status::NfsStat,
    xdr::{XdrError, XdrReader, XdrWriter},
};

/// A callback operation body that knows how to place itself inside a
/// CB_COMPOUND argument stream.
#[enum_dispatch]
pub trait EncodeCbOp {
    fn opnum(&self) -> CbOpCode;
    fn encode_args(&self, w: &mut XdrWriter);
}

/// CB_RECALL4args (RFC 8881 § 20.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbRecall {
    pub stateid: StateId,
    pub truncate: bool,
    pub fh: FileHandle,
}

impl EncodeCbOp for CbRecall {
    fn opnum(&self) -> CbOpCode {
        CbOpCode::CbRecall
    }

    fn encode_args(&self, w: &mut XdrWriter) {
        self.stateid.encode(w);
        w.bool(self.truncate);
        self.fh.encode(w);
    }
}

impl CbRecall {
    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        Ok(Self {
            stateid: StateId::decode(r)?,
            truncate: r.bool()?,
            fh: FileHandle::decode(r)?,
        })
    }
}

/// The callback operations this core can originate.
#[enum_dispatch(EncodeCbOp)]
#[derive(Debug, Clone)]
pub enum CbOp {
    CbRecall(CbRecall),
}

/// Encode the CB_COMPOUND4args body: empty tag, minorversion 1,
/// callback_ident 0 (unused at minor 1), CB_SEQUENCE, then the op.
pub fn encode_cb_compound(seq: &CbSequenceArgs, op: &CbOp) -> Bytes {
    let mut w = XdrWriter::new();
    w.opaque_var(b"");
    w.u32(1); // minorversion
    w.u32(0); // callback_ident
    w.u32(2); // opcount
    w.u32(CbOpCode::CbSequence as u32);
    seq.encode(&mut w);
    w.u32(op.opnum() as u32);
    op.encode_args(&mut w);
    w.into_bytes()
}

/// Decoded CB_COMPOUND4res, reduced to what the sender needs to judge the
/// round-trip: the overall status, the CB_SEQUENCE status, and the status
/// of the callback op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbCompoundRes {
    pub status: u32,
    pub seq_status: u32,
    pub op_status: Option<u32>,
}

impl CbCompoundRes {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status == NfsStat::Ok.code()
            && self.seq_status == NfsStat::Ok.code()
            && self.op_status == Some(NfsStat::Ok.code())
    }

    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        let status = r.u32()?;
        let _tag = r.opaque_var(crate::models::common::OPAQUE_LIMIT)?;
        let nres = r.u32()?;
        if nres == 0 {
            return Ok(Self {
                status,
                seq_status: status,
                op_status: None,
            });
        }
        let _seq_opnum = r.u32()?;
        let seq_status = match crate::models::sequence::CbSequenceResOk::decode(r)? {
            Ok(_) => NfsStat::Ok.code(),
            Err(stat) => stat.code(),
        };
        let op_status = if nres > 1 {
            let _opnum = r.u32()?;
            Some(r.u32()?)
        } else {
            None
        };
        Ok(Self {
            status,
            seq_status,
            op_status,
        })
    }
}
