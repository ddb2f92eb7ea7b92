// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! COMPOUND4args / COMPOUND4res framing (RFC 8881 § 16.2).
//!
//! The args side is decoded incrementally: the dispatcher reads the
//! header, then pulls one operation number at a time and hands the reader
//! to the matching handler. The res side is accumulated by
//! [`CompoundReplyBuilder`] and frozen once, so a replay-cache hit can
//! return the identical `Bytes`.

use bytes::Bytes;

use crate::models::{
    common::OPAQUE_LIMIT,
    status::NfsStat,
    xdr::{XdrError, XdrReader, XdrWriter},
};

/// Upper bound on operations per COMPOUND; requests above it get
/// `TOO_MANY_OPS` rather than an allocation proportional to the claim.
pub const MAX_OPS_PER_COMPOUND: u32 = 128;

/// Decoded COMPOUND4args header: everything before the operation stream.
#[derive(Debug, Clone)]
pub struct CompoundHeader {
    pub tag: Bytes,
    pub minorversion: u32,
    pub numops: u32,
}

impl CompoundHeader {
    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        let tag = r.opaque_var(OPAQUE_LIMIT)?;
        let minorversion = r.u32()?;
        let numops = r.u32()?;
        Ok(Self {
            tag,
            minorversion,
            numops,
        })
    }
}

/// One encoded operation result: the `resop4` discriminant plus the body
/// (which itself begins with the op status).
#[derive(Debug, Clone)]
pub struct OpResult {
    pub opnum: u32,
    pub body: Bytes,
}

/// Accumulates per-op results and encodes the final COMPOUND4res.
#[derive(Debug)]
pub struct CompoundReplyBuilder {
    tag: Bytes,
    results: Vec<OpResult>,
}

impl CompoundReplyBuilder {
    pub fn new(tag: Bytes) -> Self {
        Self {
            tag,
            results: Vec::with_capacity(8),
        }
    }

    pub fn push(&mut self, opnum: u32, body: Bytes) {
        self.results.push(OpResult { opnum, body });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Encode `COMPOUND4res { status, tag, resarray }`. The overall status
    /// is the status of the last executed operation, per the partial
    /// results rule.
    pub fn build(self, status: NfsStat) -> Bytes {
        let mut w = XdrWriter::new();
        w.u32(status.code());
        w.opaque_var(&self.tag);
        w.u32(self.results.len() as u32);
        for res in &self.results {
            w.u32(res.opnum);
            w.raw(&res.body);
        }
        w.into_bytes()
    }
}

/// A COMPOUND4res with zero results, used for framing-level rejections
/// (BADXDR before any op, MINOR_VERS_MISMATCH) and for the status-only
/// buffer the slot finalizer writes when a handler never produced one.
pub fn status_only_reply(status: NfsStat, tag: &[u8]) -> Bytes {
    let mut w = XdrWriter::new();
    w.u32(status.code());
    w.opaque_var(tag);
    w.u32(0);
    w.into_bytes()
}

/// A COMPOUND4res holding exactly one status-only op result. This is the
/// shape of `OP_NOT_IN_SESSION`, `SEQUENCE_POS` and SEQUENCE-level
/// rejections.
pub fn single_op_reply(status: NfsStat, tag: &[u8], opnum: u32) -> Bytes {
    let mut w = XdrWriter::new();
    w.u32(status.code());
    w.opaque_var(tag);
    w.u32(1);
    w.u32(opnum);
    w.u32(status.code());
    w.into_bytes()
}
