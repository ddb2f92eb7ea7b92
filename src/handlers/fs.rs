// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Filehandle plumbing (PUTROOTFH / PUTFH / GETFH / GETATTR /
//! RECLAIM_COMPLETE) and the metadata-store collaborator boundary.
//!
//! File content and attribute storage are external; the core only moves
//! the current filehandle through the COMPOUND and hands attribute
//! requests to the store.

use std::fmt::Debug;

use anyhow::Result;
use bytes::Bytes;

use crate::{
    handlers::{OpContext, OpHandler, OpReply},
    models::{
        common::FileHandle,
        status::NfsStat,
        xdr::{XdrReader, XdrWriter},
    },
};

/// Attribute numbers of `fattr4` this core's test store serves.
pub const FATTR4_TYPE: u32 = 1;
pub const FATTR4_CHANGE: u32 = 3;
pub const FATTR4_SIZE: u32 = 4;

/// `nfs_ftype4` directory discriminant.
pub const NF4DIR: u32 = 2;

/// Narrow boundary to the metadata store. Attribute encoding stays on the
/// store side; the core treats the result as opaque `fattr4` content.
pub trait MetadataStore: Send + Sync + Debug {
    fn root_handle(&self) -> FileHandle;

    /// Resolve the requested attribute bitmap for a handle. `None` means
    /// the handle is stale / unknown.
    fn getattr(
        &self,
        fh: &FileHandle,
        request: &[u32],
    ) -> Option<(Vec<u32>, Bytes)>;
}

/// Minimal in-memory store: a single root directory. Enough to drive the
/// session machinery end to end; production embedders bring their own.
#[derive(Debug, Default)]
pub struct InMemoryRoot;

impl InMemoryRoot {
    const ROOT_FH: &'static [u8] = b"\0\0\0\0\0\0\0\x01";
}

impl MetadataStore for InMemoryRoot {
    fn root_handle(&self) -> FileHandle {
        FileHandle(Bytes::from_static(Self::ROOT_FH))
    }

    fn getattr(&self, fh: &FileHandle, request: &[u32]) -> Option<(Vec<u32>, Bytes)> {
        if fh.0.as_ref() != Self::ROOT_FH {
            return None;
        }
        let mut granted_words = vec![0u32];
        let mut vals = XdrWriter::new();
        let wants = |bit: u32| request.first().is_some_and(|w| w & (1 << bit) != 0);
        // fattr4 values are packed in ascending attribute order.
        if wants(FATTR4_TYPE) {
            granted_words[0] |= 1 << FATTR4_TYPE;
            vals.u32(NF4DIR);
        }
        if wants(FATTR4_CHANGE) {
            granted_words[0] |= 1 << FATTR4_CHANGE;
            vals.u64(1);
        }
        if wants(FATTR4_SIZE) {
            granted_words[0] |= 1 << FATTR4_SIZE;
            vals.u64(0);
        }
        Some((granted_words, vals.into_bytes()))
    }
}

#[derive(Debug, Default)]
pub struct PutrootfhHandler;

impl OpHandler for PutrootfhHandler {
    fn handle(&self, ctx: &mut OpContext<'_>, _args: &mut XdrReader) -> Result<OpReply> {
        ctx.cfh = Some(ctx.store.root_handle());
        Ok(OpReply::status_only(NfsStat::Ok))
    }
}

#[derive(Debug, Default)]
pub struct PutfhHandler;

impl OpHandler for PutfhHandler {
    fn handle(&self, ctx: &mut OpContext<'_>, args: &mut XdrReader) -> Result<OpReply> {
        let fh = FileHandle::decode(args)?;
        ctx.cfh = Some(fh);
        Ok(OpReply::status_only(NfsStat::Ok))
    }
}

#[derive(Debug, Default)]
pub struct GetfhHandler;

impl OpHandler for GetfhHandler {
    fn handle(&self, ctx: &mut OpContext<'_>, _args: &mut XdrReader) -> Result<OpReply> {
        let Some(fh) = ctx.cfh.as_ref() else {
            return Ok(OpReply::status_only(NfsStat::NoFileHandle));
        };
        let mut w = XdrWriter::new();
        w.u32(NfsStat::Ok.code());
        fh.encode(&mut w);
        Ok(OpReply::new(NfsStat::Ok, w.into_bytes()))
    }
}

#[derive(Debug, Default)]
pub struct GetattrHandler;

impl OpHandler for GetattrHandler {
    fn handle(&self, ctx: &mut OpContext<'_>, args: &mut XdrReader) -> Result<OpReply> {
        let nwords = args.u32()?;
        if nwords > 8 {
            return Ok(OpReply::status_only(NfsStat::BadXdr));
        }
        let mut request = Vec::with_capacity(nwords as usize);
        for _ in 0..nwords {
            request.push(args.u32()?);
        }
        let Some(fh) = ctx.cfh.as_ref() else {
            return Ok(OpReply::status_only(NfsStat::NoFileHandle));
        };
        let Some((granted, vals)) = ctx.store.getattr(fh, &request) else {
            return Ok(OpReply::status_only(NfsStat::Stale));
        };
        let mut w = XdrWriter::new();
        w.u32(NfsStat::Ok.code());
        w.u32(granted.len() as u32);
        for word in &granted {
            w.u32(*word);
        }
        w.opaque_var(&vals);
        Ok(OpReply::new(NfsStat::Ok, w.into_bytes()))
    }
}

/// RECLAIM_COMPLETE (RFC 8881 § 18.51). Reclaim across restarts is out of
/// scope, so this is an acknowledgement with no state behind it.
#[derive(Debug, Default)]
pub struct ReclaimCompleteHandler;

impl OpHandler for ReclaimCompleteHandler {
    fn handle(&self, _ctx: &mut OpContext<'_>, args: &mut XdrReader) -> Result<OpReply> {
        let _one_fs = args.bool()?;
        Ok(OpReply::status_only(NfsStat::Ok))
    }
}
