// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Primitive XDR (RFC 4506) encode / decode.
//!
//! Every XDR item occupies a multiple of four bytes on the wire:
//!
//! ```text
//! +--------+--------+...+--------+--------+...+--------+
//! | byte 0 | byte 1 |...| byte n | pad 0  |...| pad 0  |
//! +--------+--------+...+--------+--------+...+--------+
//! |<------------ n bytes ------->|<---- r bytes ------>|
//! |<------------- n + r (multiple of 4) -------------->|
//! ```
//!
//! [`XdrReader`] consumes a [`Bytes`] buffer left to right; all reads are
//! bounds-checked and surface [`XdrError`] (which the dispatcher maps to
//! `NFS4ERR_BADXDR`). [`XdrWriter`] appends to a [`BytesMut`] and never
//! fails.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Decode failure. Values of this type always become `BADXDR` in the
/// response stream, never an out-of-band failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum XdrError {
    #[error("xdr: need {need} bytes, {have} available")]
    Truncated { need: usize, have: usize },
    #[error("xdr: opaque of {len} bytes exceeds limit {limit}")]
    TooLong { len: u32, limit: u32 },
    #[error("xdr: boolean must be 0 or 1, got {0}")]
    InvalidBool(u32),
    #[error("xdr: string is not valid utf-8")]
    InvalidUtf8,
}

/// Checked cursor over one XDR-encoded buffer.
#[derive(Debug, Clone)]
pub struct XdrReader {
    buf: Bytes,
}

impl XdrReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    #[inline]
    fn need(&self, n: usize) -> Result<(), XdrError> {
        if self.buf.remaining() < n {
            return Err(XdrError::Truncated {
                need: n,
                have: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u32(&mut self) -> Result<u32, XdrError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn u64(&mut self) -> Result<u64, XdrError> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn i64(&mut self) -> Result<i64, XdrError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    /// XDR booleans are full 4-byte words constrained to 0 / 1.
    pub fn bool(&mut self) -> Result<bool, XdrError> {
        match self.u32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(XdrError::InvalidBool(other)),
        }
    }

    /// Fixed-length opaque: `n` bytes plus pad to the 4-byte boundary.
    pub fn opaque_fixed(&mut self, n: usize) -> Result<Bytes, XdrError> {
        let padded = n + pad_len(n);
        self.need(padded)?;
        let out = self.buf.split_to(n);
        self.buf.advance(padded - n);
        Ok(out)
    }

    /// Variable-length opaque: 4-byte length, bytes, pad.
    pub fn opaque_var(&mut self, limit: u32) -> Result<Bytes, XdrError> {
        let len = self.u32()?;
        if len > limit {
            return Err(XdrError::TooLong { len, limit });
        }
        self.opaque_fixed(len as usize)
    }

    pub fn string(&mut self, limit: u32) -> Result<String, XdrError> {
        let raw = self.opaque_var(limit)?;
        String::from_utf8(raw.to_vec()).map_err(|_| XdrError::InvalidUtf8)
    }

    /// Remaining bytes, consumed. Used to hand an op handler its argument
    /// tail or to capture an opaque payload verbatim.
    pub fn take_rest(&mut self) -> Bytes {
        self.buf.split_to(self.buf.remaining())
    }
}

/// Append-only XDR encoder.
#[derive(Debug, Default)]
pub struct XdrWriter {
    buf: BytesMut,
}

impl XdrWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.put_u32(v as u32);
    }

    pub fn opaque_fixed(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
        self.buf.put_bytes(0, pad_len(bytes.len()));
    }

    pub fn opaque_var(&mut self, bytes: &[u8]) {
        self.u32(bytes.len() as u32);
        self.opaque_fixed(bytes);
    }

    pub fn string(&mut self, s: &str) {
        self.opaque_var(s.as_bytes());
    }

    /// Raw pass-through for pre-encoded result bodies.
    pub fn raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

#[inline]
const fn pad_len(n: usize) -> usize {
    (4 - (n % 4)) % 4
}
