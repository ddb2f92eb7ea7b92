// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Identifiers and wire constants shared by the NFSv4.1 codecs and the
//! session state machine.

use core::fmt;

use bytes::Bytes;

use crate::models::xdr::{XdrError, XdrReader, XdrWriter};

/// ONC RPC program number of the NFS service (RFC 8881 § 2.9.3).
pub const NFS_PROGRAM: u32 = 100_003;
/// Protocol version carried in the RPC CALL header for v4.x.
pub const NFS_VERSION: u32 = 4;

/// RPC procedure numbers of the fore channel.
pub const NFSPROC4_NULL: u32 = 0;
pub const NFSPROC4_COMPOUND: u32 = 1;

/// RPC procedure numbers of the callback service.
pub const CB_NULL: u32 = 0;
pub const CB_COMPOUND: u32 = 1;

/// Size of a `sessionid4` (RFC 8881 § 3.2).
pub const SESSIONID_SIZE: usize = 16;

/// Upper bound accepted for any variable-length opaque the core decodes
/// (tags, owner ids, file handles). Larger values are a decode error.
pub const OPAQUE_LIMIT: u32 = 1024;

/// Opaque 16-byte session identifier. Equality is byte-wise; `Debug`
/// prints the hex form the way session ids show up in packet dumps.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionId(pub [u8; SESSIONID_SIZE]);

impl SessionId {
    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        let raw = r.opaque_fixed(SESSIONID_SIZE)?;
        let mut id = [0u8; SESSIONID_SIZE];
        id.copy_from_slice(&raw);
        Ok(Self(id))
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        w.opaque_fixed(&self.0);
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", hex::encode(self.0))
    }
}

/// 64-bit short client id chosen by the server at EXCHANGE_ID.
pub type ClientId = u64;

/// Locally unique id of one accepted TCP connection.
pub type ConnectionId = u64;

/// `stateid4`: a 4-byte seqid plus 12 opaque bytes (RFC 8881 § 8.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateId {
    pub seqid: u32,
    pub other: [u8; 12],
}

impl StateId {
    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        let seqid = r.u32()?;
        let raw = r.opaque_fixed(12)?;
        let mut other = [0u8; 12];
        other.copy_from_slice(&raw);
        Ok(Self { seqid, other })
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        w.u32(self.seqid);
        w.opaque_fixed(&self.other);
    }
}

/// Opaque file handle as handed out by the metadata store. The core never
/// looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FileHandle(pub Bytes);

impl FileHandle {
    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        Ok(Self(r.opaque_var(OPAQUE_LIMIT)?))
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        w.opaque_var(&self.0);
    }
}
