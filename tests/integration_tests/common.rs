// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared harness: a real server read loop on one end of a duplex pipe,
//! a scripted NFSv4.1 client on the other.

use std::{sync::Arc, time::Duration};

use anyhow::{Result, bail, ensure};
use bytes::{Bytes, BytesMut};
use nfs41_server_rs::{
    cfg::config::Config,
    handlers::fs::InMemoryRoot,
    metrics::{AtomicMetrics, MetricsSink},
    models::{
        common::{NFS_PROGRAM, NFS_VERSION, NFSPROC4_COMPOUND, SessionId},
        opcode::OpCode,
        rpc::{
            AcceptStat, CallHeader, MsgType, OpaqueAuth, RecordMark, ReplyHeader,
            peek_msg_type,
        },
        sequence::SequenceArgs,
        session_ops::{
            CallbackSecParms, ChannelAttrs, CreateSessionArgs, CreateSessionFlags,
            CreateSessionResOk, ExchangeIdArgs, ExchangeIdResOk,
        },
        status::NfsStat,
        xdr::{XdrReader, XdrWriter},
    },
    server::{connection::ServerConnection, dispatch::Dispatcher},
    state::manager::StateManager,
};
use tokio::io::{
    AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf, duplex, split,
};
use zerocopy::{FromBytes, IntoBytes};

pub struct TestHarness {
    pub state: Arc<StateManager>,
    pub metrics: Arc<AtomicMetrics>,
    pub dispatcher: Arc<Dispatcher>,
}

pub struct TestClient {
    r: ReadHalf<DuplexStream>,
    w: WriteHalf<DuplexStream>,
    next_xid: u32,
    /// CALL records (server-originated callbacks) seen while waiting for
    /// a reply.
    stashed_calls: Vec<Bytes>,
}

/// Start a server connection over a duplex pipe and return both sides.
pub fn start(cfg: Config) -> (TestHarness, TestClient) {
    let metrics = Arc::new(AtomicMetrics::new());
    let state = StateManager::new(cfg, Arc::clone(&metrics) as Arc<dyn MetricsSink>);
    let dispatcher = Dispatcher::new(Arc::clone(&state), Arc::new(InMemoryRoot));

    let (client_io, server_io) = duplex(1 << 20);
    let (r, w) = split(server_io);
    let conn = ServerConnection::from_io(
        Box::new(r),
        Box::new(w),
        "127.0.0.1:9".parse().expect("addr"),
        state.cancel_token().child_token(),
        Duration::from_secs(5),
    );
    tokio::spawn(conn.serve(Arc::clone(&dispatcher)));

    let (cr, cw) = split(client_io);
    (
        TestHarness {
            state,
            metrics,
            dispatcher,
        },
        TestClient {
            r: cr,
            w: cw,
            next_xid: 0x1000,
            stashed_calls: Vec::new(),
        },
    )
}

pub fn op(opnum: OpCode, encode: impl FnOnce(&mut XdrWriter)) -> (u32, Bytes) {
    let mut w = XdrWriter::new();
    encode(&mut w);
    (opnum as u32, w.into_bytes())
}

pub fn compound(minor: u32, ops: &[(u32, Bytes)]) -> Bytes {
    let mut w = XdrWriter::new();
    w.opaque_var(b"it");
    w.u32(minor);
    w.u32(ops.len() as u32);
    for (opnum, args) in ops {
        w.u32(*opnum);
        w.raw(args);
    }
    w.into_bytes()
}

pub fn sequence_op(session: SessionId, slot: u32, seqid: u32, cache: bool) -> (u32, Bytes) {
    op(OpCode::Sequence, move |w| {
        SequenceArgs {
            sessionid: session,
            sequenceid: seqid,
            slotid: slot,
            highest_slotid: 15,
            cachethis: cache,
        }
        .encode(w)
    })
}

pub fn channel_attrs(slots: u32) -> ChannelAttrs {
    ChannelAttrs {
        headerpadsize: 0,
        maxrequestsize: 1 << 20,
        maxresponsesize: 1 << 20,
        maxresponsesize_cached: 4096,
        maxoperations: 16,
        maxrequests: slots,
    }
}

/// Consume status, tag and result count of a COMPOUND4res.
pub fn parse_res(bytes: Bytes) -> (u32, u32, XdrReader) {
    let mut r = XdrReader::new(bytes);
    let status = r.u32().expect("status");
    let _tag = r.opaque_var(1024).expect("tag");
    let count = r.u32().expect("count");
    (status, count, r)
}

impl TestClient {
    pub async fn write_record(&mut self, payload: &[u8]) -> Result<()> {
        let mark = RecordMark::new(payload.len() as u32, true);
        let mut framed = BytesMut::with_capacity(4 + payload.len());
        framed.extend_from_slice(mark.as_bytes());
        framed.extend_from_slice(payload);
        self.w.write_all(&framed).await?;
        self.w.flush().await?;
        Ok(())
    }

    pub async fn read_record(&mut self) -> Result<Bytes> {
        let mut record = BytesMut::new();
        loop {
            let mut mark_buf = [0u8; 4];
            self.r.read_exact(&mut mark_buf).await?;
            let mark = RecordMark::read_from_bytes(mark_buf.as_slice())
                .map_err(|_| anyhow::anyhow!("bad mark"))?;
            let old = record.len();
            record.resize(old + mark.fragment_len() as usize, 0);
            self.r.read_exact(&mut record[old..]).await?;
            if mark.is_last() {
                return Ok(record.freeze());
            }
        }
    }

    /// Issue one COMPOUND call and return the COMPOUND4res body.
    /// Server-originated CALLs arriving in between are stashed for
    /// [`TestClient::read_callback`].
    pub async fn call(&mut self, body: &[u8]) -> Result<Bytes> {
        self.next_xid += 1;
        let xid = self.next_xid;
        let call = CallHeader {
            xid,
            prog: NFS_PROGRAM,
            vers: NFS_VERSION,
            proc: NFSPROC4_COMPOUND,
            cred: OpaqueAuth::none(),
            verf: OpaqueAuth::none(),
        };
        self.write_record(&call.encode(body)).await?;

        loop {
            let record = self.read_record().await?;
            match peek_msg_type(&record) {
                Some(MsgType::Reply) => {
                    let (header, mut rest) = ReplyHeader::parse(record)?;
                    ensure!(header.xid == xid, "reply xid mismatch");
                    ensure!(
                        header.accept_stat == AcceptStat::Success as u32,
                        "rpc accept_stat {}",
                        header.accept_stat
                    );
                    return Ok(rest.take_rest());
                },
                Some(MsgType::Call) => self.stashed_calls.push(record),
                None => bail!("unroutable record"),
            }
        }
    }

    /// Next server-originated CALL record (a CB_COMPOUND).
    pub async fn read_callback(&mut self) -> Result<Bytes> {
        if !self.stashed_calls.is_empty() {
            return Ok(self.stashed_calls.remove(0));
        }
        loop {
            let record = self.read_record().await?;
            match peek_msg_type(&record) {
                Some(MsgType::Call) => return Ok(record),
                Some(MsgType::Reply) => bail!("unexpected reply"),
                None => bail!("unroutable record"),
            }
        }
    }

    pub async fn exchange_id(&mut self, owner: &'static [u8]) -> Result<(u64, u32)> {
        let body = compound(
            1,
            &[op(OpCode::ExchangeId, |w| {
                ExchangeIdArgs {
                    verifier: *b"clientvv",
                    ownerid: Bytes::from_static(owner),
                    flags: Default::default(),
                    state_protect: 0,
                    impl_id: None,
                }
                .encode(w)
            })],
        );
        let res = self.call(&body).await?;
        let (status, _, mut r) = parse_res(res);
        ensure!(status == NfsStat::Ok.code(), "exchange_id status {status}");
        ensure!(r.u32()? == OpCode::ExchangeId as u32, "wrong resop");
        let ok = ExchangeIdResOk::decode(&mut r)?
            .map_err(|s| anyhow::anyhow!("exchange_id error {s:?}"))?;
        Ok((ok.clientid, ok.sequenceid))
    }

    pub async fn create_session(
        &mut self,
        clientid: u64,
        sequence: u32,
        back_chan: bool,
    ) -> Result<SessionId> {
        let flags = if back_chan {
            CreateSessionFlags::CONN_BACK_CHAN
        } else {
            CreateSessionFlags::empty()
        };
        let body = compound(
            1,
            &[op(OpCode::CreateSession, |w| {
                CreateSessionArgs {
                    clientid,
                    sequence,
                    flags,
                    fore_attrs: channel_attrs(16),
                    back_attrs: channel_attrs(8),
                    cb_program: 0x4000_0000,
                    sec_parms: vec![CallbackSecParms::None],
                }
                .encode(w)
            })],
        );
        let res = self.call(&body).await?;
        let (status, _, mut r) = parse_res(res);
        ensure!(status == NfsStat::Ok.code(), "create_session status {status}");
        ensure!(r.u32()? == OpCode::CreateSession as u32, "wrong resop");
        let ok = CreateSessionResOk::decode(&mut r)?
            .map_err(|s| anyhow::anyhow!("create_session error {s:?}"))?;
        Ok(ok.sessionid)
    }
}
