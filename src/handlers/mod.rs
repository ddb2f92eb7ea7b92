// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-opcode operation handlers.
//!
//! Each handler decodes its own arguments from the COMPOUND stream and
//! returns an encoded result body (status word first). Handlers are
//! synchronous: they talk to the state manager and the metadata store,
//! never to the network.

pub mod bind_conn;
pub mod create_session;
pub mod destroy_clientid;
pub mod destroy_session;
pub mod exchange_id;
pub mod fs;
pub mod sequence;
pub mod session_ctl;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use bytes::Bytes;
use enum_dispatch::enum_dispatch;

use crate::{
    handlers::{
        bind_conn::BindConnHandler,
        create_session::CreateSessionHandler,
        destroy_clientid::DestroyClientidHandler,
        destroy_session::DestroySessionHandler,
        exchange_id::ExchangeIdHandler,
        fs::{
            GetattrHandler, GetfhHandler, MetadataStore, PutfhHandler,
            PutrootfhHandler, ReclaimCompleteHandler,
        },
        session_ctl::BackchannelCtlHandler,
    },
    models::{
        common::{FileHandle, SessionId},
        opcode::OpCode,
        rpc::{AUTH_SYS, AuthSysParms, OpaqueAuth},
        status::NfsStat,
        xdr::{XdrReader, XdrWriter},
    },
    server::connection::ServerConnection,
    state::manager::StateManager,
};

/// Authenticated caller identity, extracted from the RPC credential.
#[derive(Debug, Clone, Default)]
pub enum Principal {
    #[default]
    Anonymous,
    Sys {
        uid: u32,
        gid: u32,
        machine: String,
    },
}

impl Principal {
    pub fn from_cred(cred: &OpaqueAuth) -> Self {
        if cred.flavor != AUTH_SYS {
            return Self::Anonymous;
        }
        match AuthSysParms::decode(cred.body.clone()) {
            Ok(parms) => Self::Sys {
                uid: parms.uid,
                gid: parms.gid,
                machine: parms.machinename,
            },
            Err(_) => Self::Anonymous,
        }
    }
}

/// Slot coordinates of the SEQUENCE governing this COMPOUND. Absent for
/// exempt operations and the whole v4.0 path.
#[derive(Debug, Clone, Copy)]
pub struct V41Context {
    pub session_id: SessionId,
    pub slot_id: u32,
    pub seqid: u32,
    pub cache_this: bool,
}

/// Per-request context threaded through the dispatch loop.
#[derive(Debug)]
pub struct OpContext<'a> {
    pub peer: SocketAddr,
    pub minor: u32,
    pub conn: &'a Arc<ServerConnection>,
    pub state: &'a Arc<StateManager>,
    pub store: &'a Arc<dyn MetadataStore>,
    pub principal: Principal,
    pub v41: Option<V41Context>,
    /// Set by the dispatcher before OPEN / CLOSE / LOCK / LOCKU on the
    /// v4.1 path: slot ordering replaces the owner seqid, and the file
    /// state handlers skip their v4.0 seqid checks.
    pub skip_owner_seqid: bool,
    /// Current filehandle within this COMPOUND.
    pub cfh: Option<FileHandle>,
}

/// One encoded operation result. `body` is the full result body starting
/// with the status word; `status` is duplicated for dispatch control flow.
#[derive(Debug, Clone)]
pub struct OpReply {
    pub status: NfsStat,
    pub body: Bytes,
}

impl OpReply {
    pub fn new(status: NfsStat, body: Bytes) -> Self {
        Self { status, body }
    }

    /// Result consisting of nothing but the status word.
    pub fn status_only(status: NfsStat) -> Self {
        let mut w = XdrWriter::new();
        w.u32(status.code());
        Self {
            status,
            body: w.into_bytes(),
        }
    }
}

#[enum_dispatch]
pub trait OpHandler {
    fn handle(&self, ctx: &mut OpContext<'_>, args: &mut XdrReader) -> Result<OpReply>;
}

/// The dispatch table. SEQUENCE is deliberately absent: the dispatcher
/// executes it inline because it owns the slot lifecycle.
#[enum_dispatch(OpHandler)]
#[derive(Debug)]
pub enum Operation {
    ExchangeId(ExchangeIdHandler),
    CreateSession(CreateSessionHandler),
    DestroySession(DestroySessionHandler),
    BindConn(BindConnHandler),
    BackchannelCtl(BackchannelCtlHandler),
    DestroyClientid(DestroyClientidHandler),
    ReclaimComplete(ReclaimCompleteHandler),
    Putrootfh(PutrootfhHandler),
    Putfh(PutfhHandler),
    Getfh(GetfhHandler),
    Getattr(GetattrHandler),
}

/// Map an opcode to its handler. `None` means the opcode is understood
/// but not served by this core (the dispatcher answers NOTSUPP).
pub fn operation_for(op: OpCode) -> Option<Operation> {
    Some(match op {
        OpCode::ExchangeId => ExchangeIdHandler.into(),
        OpCode::CreateSession => CreateSessionHandler.into(),
        OpCode::DestroySession => DestroySessionHandler.into(),
        OpCode::BindConnToSession => BindConnHandler.into(),
        OpCode::BackchannelCtl => BackchannelCtlHandler.into(),
        OpCode::DestroyClientid => DestroyClientidHandler.into(),
        OpCode::ReclaimComplete => ReclaimCompleteHandler.into(),
        OpCode::Putrootfh => PutrootfhHandler.into(),
        OpCode::Putfh => PutfhHandler.into(),
        OpCode::Getfh => GetfhHandler.into(),
        OpCode::Getattr => GetattrHandler.into(),
        _ => return None,
    })
}
