// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use bytes::Bytes;
use nfs41_server_rs::{
    cfg::config::Config,
    handlers::fs::{FATTR4_SIZE, FATTR4_TYPE, InMemoryRoot},
    metrics::AtomicMetrics,
    models::{
        common::{NFS_PROGRAM, NFS_VERSION, NFSPROC4_COMPOUND, SessionId},
        opcode::OpCode,
        rpc::{CallHeader, OpaqueAuth},
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
use tokio::io::{DuplexStream, split};
use tokio_util::sync::CancellationToken;

fn harness() -> (Arc<Dispatcher>, Arc<ServerConnection>, DuplexStream) {
    let state = StateManager::new(Config::default(), Arc::new(AtomicMetrics::new()));
    let dispatcher = Dispatcher::new(Arc::clone(&state), Arc::new(InMemoryRoot));
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (r, w) = split(server_io);
    let conn = ServerConnection::from_io(
        Box::new(r),
        Box::new(w),
        "127.0.0.1:9".parse().expect("addr"),
        CancellationToken::new(),
        std::time::Duration::from_secs(5),
    );
    state.register_connection(Arc::clone(&conn));
    (dispatcher, conn, client_io)
}

fn call_header() -> CallHeader {
    CallHeader {
        xid: 1,
        prog: NFS_PROGRAM,
        vers: NFS_VERSION,
        proc: NFSPROC4_COMPOUND,
        cred: OpaqueAuth::none(),
        verf: OpaqueAuth::none(),
    }
}

fn op(opnum: OpCode, encode: impl FnOnce(&mut XdrWriter)) -> (u32, Bytes) {
    let mut w = XdrWriter::new();
    encode(&mut w);
    (opnum as u32, w.into_bytes())
}

fn compound(minor: u32, ops: &[(u32, Bytes)]) -> Bytes {
    let mut w = XdrWriter::new();
    w.opaque_var(b"t");
    w.u32(minor);
    w.u32(ops.len() as u32);
    for (opnum, args) in ops {
        w.u32(*opnum);
        w.raw(args);
    }
    w.into_bytes()
}

/// Consume status, tag and result count of a COMPOUND4res.
fn parse_res(bytes: Bytes) -> (u32, u32, XdrReader) {
    let mut r = XdrReader::new(bytes);
    let status = r.u32().expect("status");
    let _tag = r.opaque_var(1024).expect("tag");
    let count = r.u32().expect("count");
    (status, count, r)
}

fn channel_attrs(slots: u32) -> ChannelAttrs {
    ChannelAttrs {
        headerpadsize: 0,
        maxrequestsize: 1 << 20,
        maxresponsesize: 1 << 20,
        maxresponsesize_cached: 4096,
        maxoperations: 16,
        maxrequests: slots,
    }
}

fn getattr_mask() -> impl FnOnce(&mut XdrWriter) {
    |w: &mut XdrWriter| {
        w.u32(1);
        w.u32((1 << FATTR4_TYPE) | (1 << FATTR4_SIZE));
    }
}

/// Drive EXCHANGE_ID + CREATE_SESSION through the dispatcher, returning
/// the new session id.
fn setup_session(dispatcher: &Arc<Dispatcher>, conn: &Arc<ServerConnection>) -> SessionId {
    let body = compound(
        1,
        &[op(OpCode::ExchangeId, |w| {
            ExchangeIdArgs {
                verifier: *b"verifier",
                ownerid: Bytes::from_static(b"compound-client"),
                flags: Default::default(),
                state_protect: 0,
                impl_id: None,
            }
            .encode(w)
        })],
    );
    let res = dispatcher.process_compound(conn, &call_header(), body);
    let (status, count, mut r) = parse_res(res);
    assert_eq!(status, NfsStat::Ok.code());
    assert_eq!(count, 1);
    assert_eq!(r.u32().expect("opnum"), OpCode::ExchangeId as u32);
    let exchange = ExchangeIdResOk::decode(&mut r)
        .expect("xdr")
        .expect("status");

    let body = compound(
        1,
        &[op(OpCode::CreateSession, |w| {
            CreateSessionArgs {
                clientid: exchange.clientid,
                sequence: exchange.sequenceid,
                flags: CreateSessionFlags::CONN_BACK_CHAN,
                fore_attrs: channel_attrs(16),
                back_attrs: channel_attrs(8),
                cb_program: 0x4000_0000,
                sec_parms: vec![CallbackSecParms::None],
            }
            .encode(w)
        })],
    );
    let res = dispatcher.process_compound(conn, &call_header(), body);
    let (status, count, mut r) = parse_res(res);
    assert_eq!(status, NfsStat::Ok.code());
    assert_eq!(count, 1);
    assert_eq!(r.u32().expect("opnum"), OpCode::CreateSession as u32);
    CreateSessionResOk::decode(&mut r)
        .expect("xdr")
        .expect("status")
        .sessionid
}

fn sequence_op(session: SessionId, slot: u32, seqid: u32, cache: bool) -> (u32, Bytes) {
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

#[tokio::test]
async fn test_minor_version_window_is_enforced() {
    let (dispatcher, conn, _io) = harness();
    let body = compound(5, &[]);
    let (status, count, _) =
        parse_res(dispatcher.process_compound(&conn, &call_header(), body));
    assert_eq!(status, NfsStat::MinorVersMismatch.code());
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_garbage_framing_is_badxdr() {
    let (dispatcher, conn, _io) = harness();
    let (status, count, _) = parse_res(dispatcher.process_compound(
        &conn,
        &call_header(),
        Bytes::from_static(&[0, 1]),
    ));
    assert_eq!(status, NfsStat::BadXdr.code());
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_empty_v41_compound_is_ok() {
    let (dispatcher, conn, _io) = harness();
    let (status, count, _) =
        parse_res(dispatcher.process_compound(&conn, &call_header(), compound(1, &[])));
    assert_eq!(status, NfsStat::Ok.code());
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_v40_path_has_no_sequence_gate() {
    let (dispatcher, conn, _io) = harness();
    let body = compound(
        0,
        &[
            op(OpCode::Putrootfh, |_| {}),
            op(OpCode::Getattr, getattr_mask()),
        ],
    );
    let (status, count, _) =
        parse_res(dispatcher.process_compound(&conn, &call_header(), body));
    assert_eq!(status, NfsStat::Ok.code());
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_v41_only_ops_rejected_on_v40_path() {
    let (dispatcher, conn, _io) = harness();
    let body = compound(0, &[sequence_op(SessionId([0; 16]), 0, 1, false)]);
    let (status, count, _) =
        parse_res(dispatcher.process_compound(&conn, &call_header(), body));
    assert_eq!(status, NfsStat::NotSupp.code());
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_first_op_must_be_sequence_or_exempt() {
    let (dispatcher, conn, _io) = harness();
    let body = compound(
        1,
        &[
            op(OpCode::Putrootfh, |_| {}),
            sequence_op(SessionId([0; 16]), 0, 1, false),
        ],
    );
    let res = dispatcher.process_compound(&conn, &call_header(), body);
    let (status, count, mut r) = parse_res(res);
    // Exactly one result: OP_NOT_IN_SESSION; nothing else ran.
    assert_eq!(status, NfsStat::OpNotInSession.code());
    assert_eq!(count, 1);
    assert_eq!(r.u32().expect("opnum"), OpCode::Putrootfh as u32);
    assert_eq!(r.u32().expect("op status"), NfsStat::OpNotInSession.code());
}

#[tokio::test]
async fn test_unknown_first_opcode_is_illegal() {
    let (dispatcher, conn, _io) = harness();
    let body = compound(1, &[(9999, Bytes::new())]);
    let (status, count, mut r) =
        parse_res(dispatcher.process_compound(&conn, &call_header(), body));
    assert_eq!(status, NfsStat::OpIllegal.code());
    assert_eq!(count, 1);
    assert_eq!(r.u32().expect("opnum"), OpCode::Illegal as u32);
}

#[tokio::test]
async fn test_sequence_past_first_position_is_sequence_pos() {
    let (dispatcher, conn, _io) = harness();
    let session = setup_session(&dispatcher, &conn);
    let body = compound(
        1,
        &[
            sequence_op(session, 0, 1, false),
            sequence_op(session, 0, 2, false),
        ],
    );
    let (status, count, mut r) =
        parse_res(dispatcher.process_compound(&conn, &call_header(), body));
    assert_eq!(status, NfsStat::SequencePos.code());
    assert_eq!(count, 2);
    // First result is the successful SEQUENCE, second the rejection.
    assert_eq!(r.u32().expect("opnum"), OpCode::Sequence as u32);
}

#[tokio::test]
async fn test_unknown_session_is_badsession() {
    let (dispatcher, conn, _io) = harness();
    let body = compound(1, &[sequence_op(SessionId([9; 16]), 0, 1, false)]);
    let (status, count, mut r) =
        parse_res(dispatcher.process_compound(&conn, &call_header(), body));
    assert_eq!(status, NfsStat::BadSession.code());
    assert_eq!(count, 1);
    assert_eq!(r.u32().expect("opnum"), OpCode::Sequence as u32);
    assert_eq!(r.u32().expect("op status"), NfsStat::BadSession.code());
}

#[tokio::test]
async fn test_sequenced_roundtrip_replay_and_misorder() {
    let (dispatcher, conn, _io) = harness();
    let session = setup_session(&dispatcher, &conn);

    let body = compound(
        1,
        &[
            sequence_op(session, 0, 1, true),
            op(OpCode::Putrootfh, |_| {}),
            op(OpCode::Getattr, getattr_mask()),
        ],
    );
    let first = dispatcher.process_compound(&conn, &call_header(), body.clone());
    {
        let (status, count, _) = parse_res(first.clone());
        assert_eq!(status, NfsStat::Ok.code());
        assert_eq!(count, 3);
    }

    // Replay of the same (slot, seqid): byte-identical, handlers not
    // re-run.
    let replay = dispatcher.process_compound(&conn, &call_header(), body);
    assert_eq!(replay, first);

    // Misordered seqid: one-op SEQ_MISORDERED result.
    let body = compound(1, &[sequence_op(session, 0, 3, false)]);
    let (status, count, _) =
        parse_res(dispatcher.process_compound(&conn, &call_header(), body));
    assert_eq!(status, NfsStat::SeqMisordered.code());
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_op_decode_failure_halts_with_badxdr() {
    let (dispatcher, conn, _io) = harness();
    let session = setup_session(&dispatcher, &conn);

    // GETATTR claims two bitmap words but carries none.
    let body = compound(
        1,
        &[
            sequence_op(session, 0, 1, true),
            op(OpCode::Getattr, |w| w.u32(2)),
        ],
    );
    let (status, count, mut r) =
        parse_res(dispatcher.process_compound(&conn, &call_header(), body));
    assert_eq!(status, NfsStat::BadXdr.code());
    assert_eq!(count, 2);
    assert_eq!(r.u32().expect("opnum"), OpCode::Sequence as u32);

    // The slot was still completed: the next seqid is accepted.
    let body = compound(1, &[sequence_op(session, 0, 2, false)]);
    let (status, _, _) =
        parse_res(dispatcher.process_compound(&conn, &call_header(), body));
    assert_eq!(status, NfsStat::Ok.code());
}

#[tokio::test]
async fn test_uncached_compound_replay_is_retry_uncached_rep() {
    let (dispatcher, conn, _io) = harness();
    let session = setup_session(&dispatcher, &conn);

    let body = compound(1, &[sequence_op(session, 0, 1, false)]);
    let (status, _, _) =
        parse_res(dispatcher.process_compound(&conn, &call_header(), body.clone()));
    assert_eq!(status, NfsStat::Ok.code());

    let (status, count, _) =
        parse_res(dispatcher.process_compound(&conn, &call_header(), body));
    assert_eq!(status, NfsStat::RetryUncachedRep.code());
    assert_eq!(count, 1);
}
