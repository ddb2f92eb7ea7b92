// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Argument / result codecs for the session management operations:
//! EXCHANGE_ID, CREATE_SESSION, DESTROY_SESSION, BIND_CONN_TO_SESSION,
//! BACKCHANNEL_CTL and DESTROY_CLIENTID (RFC 8881 § 18.33–18.37, § 18.50).

use bitflags::bitflags;
use bytes::Bytes;

use crate::models::{
    common::{OPAQUE_LIMIT, SessionId},
    rpc::{AUTH_NONE, AUTH_SYS, AuthSysParms, RPCSEC_GSS},
    status::NfsStat,
    xdr::{XdrError, XdrReader, XdrWriter},
};

bitflags! {
    /// `eia_flags` / `eir_flags` of EXCHANGE_ID.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExchgIdFlags: u32 {
        const SUPP_MOVED_REFER = 0x00000001;
        const SUPP_MOVED_MIGR = 0x00000002;
        const BIND_PRINC_STATEID = 0x00000100;
        const USE_NON_PNFS = 0x00010000;
        const USE_PNFS_MDS = 0x00020000;
        const USE_PNFS_DS = 0x00040000;
        const UPD_CONFIRMED_REC_A = 0x40000000;
        const CONFIRMED_R = 0x80000000;
    }
}

bitflags! {
    /// `csa_flags` / `csr_flags` of CREATE_SESSION.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CreateSessionFlags: u32 {
        const PERSIST = 0x00000001;
        const CONN_BACK_CHAN = 0x00000002;
        const CONN_RDMA = 0x00000004;
    }
}

/// `state_protect_how4` discriminants.
pub const SP4_NONE: u32 = 0;
pub const SP4_MACH_CRED: u32 = 1;
pub const SP4_SSV: u32 = 2;

/// `nfstime4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NfsTime {
    pub seconds: i64,
    pub nseconds: u32,
}

impl NfsTime {
    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        Ok(Self {
            seconds: r.i64()?,
            nseconds: r.u32()?,
        })
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        w.i64(self.seconds);
        w.u32(self.nseconds);
    }
}

/// `nfs_impl_id4`: informational implementation identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImplId {
    pub domain: String,
    pub name: String,
    pub date: NfsTime,
}

impl ImplId {
    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        Ok(Self {
            domain: r.string(OPAQUE_LIMIT)?,
            name: r.string(OPAQUE_LIMIT)?,
            date: NfsTime::decode(r)?,
        })
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        w.string(&self.domain);
        w.string(&self.name);
        self.date.encode(w);
    }

    fn decode_array(r: &mut XdrReader) -> Result<Option<Self>, XdrError> {
        match r.u32()? {
            0 => Ok(None),
            // The XDR caps this array at one entry.
            1 => Ok(Some(Self::decode(r)?)),
            n => Err(XdrError::TooLong { len: n, limit: 1 }),
        }
    }

    fn encode_array(item: Option<&Self>, w: &mut XdrWriter) {
        match item {
            None => w.u32(0),
            Some(id) => {
                w.u32(1);
                id.encode(w);
            },
        }
    }
}

/// EXCHANGE_ID4args. State protection beyond SP4_NONE is decoded but the
/// registry only grants SP4_NONE; SP4_SSV is answered with ENCR_ALG_UNSUPP.
#[derive(Debug, Clone)]
pub struct ExchangeIdArgs {
    pub verifier: [u8; 8],
    pub ownerid: Bytes,
    pub flags: ExchgIdFlags,
    pub state_protect: u32,
    pub impl_id: Option<ImplId>,
}

impl ExchangeIdArgs {
    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        let raw = r.opaque_fixed(8)?;
        let mut verifier = [0u8; 8];
        verifier.copy_from_slice(&raw);
        let ownerid = r.opaque_var(OPAQUE_LIMIT)?;
        let flags = ExchgIdFlags::from_bits_truncate(r.u32()?);
        let state_protect = r.u32()?;
        match state_protect {
            SP4_NONE => {},
            SP4_MACH_CRED => {
                // spo_must_enforce / spo_must_allow bitmaps, skipped.
                for _ in 0..2 {
                    let words = r.u32()?;
                    for _ in 0..words {
                        let _ = r.u32()?;
                    }
                }
            },
            // SP4_SSV arguments are not consumed; the handler rejects the
            // whole operation before looking past the discriminant.
            _ => {},
        }
        let impl_id = if state_protect == SP4_SSV {
            None
        } else {
            ImplId::decode_array(r)?
        };
        Ok(Self {
            verifier,
            ownerid,
            flags,
            state_protect,
            impl_id,
        })
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        w.opaque_fixed(&self.verifier);
        w.opaque_var(&self.ownerid);
        w.u32(self.flags.bits());
        w.u32(SP4_NONE);
        ImplId::encode_array(self.impl_id.as_ref(), w);
    }
}

/// The NFS4_OK arm of EXCHANGE_ID4res.
#[derive(Debug, Clone)]
pub struct ExchangeIdResOk {
    pub clientid: u64,
    pub sequenceid: u32,
    pub flags: ExchgIdFlags,
    pub server_minor_id: u64,
    pub server_major_id: Bytes,
    pub server_scope: Bytes,
    pub server_impl_id: Option<ImplId>,
}

impl ExchangeIdResOk {
    pub fn encode(&self) -> Bytes {
        let mut w = XdrWriter::new();
        w.u32(NfsStat::Ok.code());
        w.u64(self.clientid);
        w.u32(self.sequenceid);
        w.u32(self.flags.bits());
        w.u32(SP4_NONE);
        w.u64(self.server_minor_id);
        w.opaque_var(&self.server_major_id);
        w.opaque_var(&self.server_scope);
        ImplId::encode_array(self.server_impl_id.as_ref(), &mut w);
        w.into_bytes()
    }

    pub fn decode(r: &mut XdrReader) -> Result<Result<Self, NfsStat>, XdrError> {
        let code = r.u32()?;
        if code != NfsStat::Ok.code() {
            return Ok(Err(NfsStat::from_code(code).unwrap_or(NfsStat::ServerFault)));
        }
        let clientid = r.u64()?;
        let sequenceid = r.u32()?;
        let flags = ExchgIdFlags::from_bits_truncate(r.u32()?);
        let sp = r.u32()?;
        if sp != SP4_NONE {
            return Err(XdrError::InvalidBool(sp));
        }
        let server_minor_id = r.u64()?;
        let server_major_id = r.opaque_var(OPAQUE_LIMIT)?;
        let server_scope = r.opaque_var(OPAQUE_LIMIT)?;
        let server_impl_id = ImplId::decode_array(r)?;
        Ok(Ok(Self {
            clientid,
            sequenceid,
            flags,
            server_minor_id,
            server_major_id,
            server_scope,
            server_impl_id,
        }))
    }
}

/// `channel_attrs4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAttrs {
    pub headerpadsize: u32,
    pub maxrequestsize: u32,
    pub maxresponsesize: u32,
    pub maxresponsesize_cached: u32,
    pub maxoperations: u32,
    pub maxrequests: u32,
}

impl ChannelAttrs {
    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        let attrs = Self {
            headerpadsize: r.u32()?,
            maxrequestsize: r.u32()?,
            maxresponsesize: r.u32()?,
            maxresponsesize_cached: r.u32()?,
            maxoperations: r.u32()?,
            maxrequests: r.u32()?,
        };
        // ca_rdma_ird<1>
        match r.u32()? {
            0 => {},
            1 => {
                let _ = r.u32()?;
            },
            n => return Err(XdrError::TooLong { len: n, limit: 1 }),
        }
        Ok(attrs)
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        w.u32(self.headerpadsize);
        w.u32(self.maxrequestsize);
        w.u32(self.maxresponsesize);
        w.u32(self.maxresponsesize_cached);
        w.u32(self.maxoperations);
        w.u32(self.maxrequests);
        w.u32(0); // no rdma_ird
    }
}

/// `callback_sec_parms4`: the security envelope the server must use when
/// originating CB_COMPOUNDs. GSS handles are stored opaquely and only
/// validated at first use.
#[derive(Debug, Clone)]
pub enum CallbackSecParms {
    None,
    Sys(AuthSysParms),
    Gss {
        service: u32,
        handle_from_server: Bytes,
        handle_from_client: Bytes,
    },
}

impl CallbackSecParms {
    #[inline]
    pub const fn flavor(&self) -> u32 {
        match self {
            Self::None => AUTH_NONE,
            Self::Sys(_) => AUTH_SYS,
            Self::Gss { .. } => RPCSEC_GSS,
        }
    }

    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        match r.u32()? {
            AUTH_NONE => Ok(Self::None),
            AUTH_SYS => {
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
                Ok(Self::Sys(AuthSysParms {
                    stamp,
                    machinename,
                    uid,
                    gid,
                    gids,
                }))
            },
            RPCSEC_GSS => Ok(Self::Gss {
                service: r.u32()?,
                handle_from_server: r.opaque_var(OPAQUE_LIMIT)?,
                handle_from_client: r.opaque_var(OPAQUE_LIMIT)?,
            }),
            other => Err(XdrError::InvalidBool(other)),
        }
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        w.u32(self.flavor());
        match self {
            Self::None => {},
            Self::Sys(parms) => w.raw(&parms.encode()),
            Self::Gss {
                service,
                handle_from_server,
                handle_from_client,
            } => {
                w.u32(*service);
                w.opaque_var(handle_from_server);
                w.opaque_var(handle_from_client);
            },
        }
    }

    pub fn decode_array(r: &mut XdrReader) -> Result<Vec<Self>, XdrError> {
        let n = r.u32()?;
        if n > 16 {
            return Err(XdrError::TooLong { len: n, limit: 16 });
        }
        let mut parms = Vec::with_capacity(n as usize);
        for _ in 0..n {
            parms.push(Self::decode(r)?);
        }
        Ok(parms)
    }

    pub fn encode_array(parms: &[Self], w: &mut XdrWriter) {
        w.u32(parms.len() as u32);
        for p in parms {
            p.encode(w);
        }
    }
}

/// CREATE_SESSION4args.
#[derive(Debug, Clone)]
pub struct CreateSessionArgs {
    pub clientid: u64,
    pub sequence: u32,
    pub flags: CreateSessionFlags,
    pub fore_attrs: ChannelAttrs,
    pub back_attrs: ChannelAttrs,
    pub cb_program: u32,
    pub sec_parms: Vec<CallbackSecParms>,
}

impl CreateSessionArgs {
    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        Ok(Self {
            clientid: r.u64()?,
            sequence: r.u32()?,
            flags: CreateSessionFlags::from_bits_truncate(r.u32()?),
            fore_attrs: ChannelAttrs::decode(r)?,
            back_attrs: ChannelAttrs::decode(r)?,
            cb_program: r.u32()?,
            sec_parms: CallbackSecParms::decode_array(r)?,
        })
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        w.u64(self.clientid);
        w.u32(self.sequence);
        w.u32(self.flags.bits());
        self.fore_attrs.encode(w);
        self.back_attrs.encode(w);
        w.u32(self.cb_program);
        CallbackSecParms::encode_array(&self.sec_parms, w);
    }
}

/// The NFS4_OK arm of CREATE_SESSION4res.
#[derive(Debug, Clone)]
pub struct CreateSessionResOk {
    pub sessionid: SessionId,
    pub sequence: u32,
    pub flags: CreateSessionFlags,
    pub fore_attrs: ChannelAttrs,
    pub back_attrs: ChannelAttrs,
}

impl CreateSessionResOk {
    pub fn encode(&self) -> Bytes {
        let mut w = XdrWriter::new();
        w.u32(NfsStat::Ok.code());
        self.sessionid.encode(&mut w);
        w.u32(self.sequence);
        w.u32(self.flags.bits());
        self.fore_attrs.encode(&mut w);
        self.back_attrs.encode(&mut w);
        w.into_bytes()
    }

    pub fn decode(r: &mut XdrReader) -> Result<Result<Self, NfsStat>, XdrError> {
        let code = r.u32()?;
        if code != NfsStat::Ok.code() {
            return Ok(Err(NfsStat::from_code(code).unwrap_or(NfsStat::ServerFault)));
        }
        Ok(Ok(Self {
            sessionid: SessionId::decode(r)?,
            sequence: r.u32()?,
            flags: CreateSessionFlags::from_bits_truncate(r.u32()?),
            fore_attrs: ChannelAttrs::decode(r)?,
            back_attrs: ChannelAttrs::decode(r)?,
        }))
    }
}

/// BIND_CONN_TO_SESSION4args. The direction words are the raw
/// `channel_dir_from_client4` / `..from_server4` values; negotiation
/// lives in the connection-binding layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindConnArgs {
    pub sessionid: SessionId,
    pub dir: u32,
    pub rdma_mode: bool,
}

impl BindConnArgs {
    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        Ok(Self {
            sessionid: SessionId::decode(r)?,
            dir: r.u32()?,
            rdma_mode: r.bool()?,
        })
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        self.sessionid.encode(w);
        w.u32(self.dir);
        w.bool(self.rdma_mode);
    }
}

/// The NFS4_OK arm of BIND_CONN_TO_SESSION4res.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindConnResOk {
    pub sessionid: SessionId,
    pub dir: u32,
    pub rdma_mode: bool,
}

impl BindConnResOk {
    pub fn encode(&self) -> Bytes {
        let mut w = XdrWriter::new();
        w.u32(NfsStat::Ok.code());
        self.sessionid.encode(&mut w);
        w.u32(self.dir);
        w.bool(self.rdma_mode);
        w.into_bytes()
    }

    pub fn decode(r: &mut XdrReader) -> Result<Result<Self, NfsStat>, XdrError> {
        let code = r.u32()?;
        if code != NfsStat::Ok.code() {
            return Ok(Err(NfsStat::from_code(code).unwrap_or(NfsStat::ServerFault)));
        }
        Ok(Ok(Self {
            sessionid: SessionId::decode(r)?,
            dir: r.u32()?,
            rdma_mode: r.bool()?,
        }))
    }
}

/// BACKCHANNEL_CTL4args.
#[derive(Debug, Clone)]
pub struct BackchannelCtlArgs {
    pub cb_program: u32,
    pub sec_parms: Vec<CallbackSecParms>,
}

impl BackchannelCtlArgs {
    pub fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        Ok(Self {
            cb_program: r.u32()?,
            sec_parms: CallbackSecParms::decode_array(r)?,
        })
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        w.u32(self.cb_program);
        CallbackSecParms::encode_array(&self.sec_parms, w);
    }
}
