// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! End-to-end session establishment over a live read loop: EXCHANGE_ID,
//! CREATE_SESSION, a sequenced GETATTR round-trip, byte-identical replay
//! and the misorder / gating rejections.

use anyhow::Result;
use nfs41_server_rs::{
    handlers::fs::{FATTR4_SIZE, FATTR4_TYPE},
    cfg::config::Config,
    models::{opcode::OpCode, sequence::SequenceResOk, status::NfsStat},
};

use crate::integration_tests::common::{
    compound, op, parse_res, sequence_op, start,
};

fn getattr_op() -> (u32, bytes::Bytes) {
    op(OpCode::Getattr, |w| {
        w.u32(1);
        w.u32((1 << FATTR4_TYPE) | (1 << FATTR4_SIZE));
    })
}

#[tokio::test]
async fn test_session_setup_and_sequenced_getattr() -> Result<()> {
    let (_harness, mut client) = start(Config::default());

    let (clientid, sequence) = client.exchange_id(b"roundtrip-client").await?;
    assert_ne!(clientid, 0);
    let session = client.create_session(clientid, sequence, true).await?;

    let body = compound(
        1,
        &[
            sequence_op(session, 0, 1, true),
            op(OpCode::Putrootfh, |_| {}),
            getattr_op(),
        ],
    );
    let first = client.call(&body).await?;
    let (status, count, mut r) = parse_res(first.clone());
    assert_eq!(status, NfsStat::Ok.code());
    assert_eq!(count, 3);

    // SEQUENCE result carries our coordinates back.
    assert_eq!(r.u32()?, OpCode::Sequence as u32);
    let seq = SequenceResOk::decode(&mut r)?.expect("sequence ok");
    assert_eq!(seq.sessionid, session);
    assert_eq!(seq.sequenceid, 1);
    assert_eq!(seq.slotid, 0);
    assert_eq!(seq.highest_slotid, 15);

    // PUTROOTFH status-only, then GETATTR with attribute bytes.
    assert_eq!(r.u32()?, OpCode::Putrootfh as u32);
    assert_eq!(r.u32()?, NfsStat::Ok.code());
    assert_eq!(r.u32()?, OpCode::Getattr as u32);
    assert_eq!(r.u32()?, NfsStat::Ok.code());
    let nwords = r.u32()?;
    assert_eq!(nwords, 1);
    let granted = r.u32()?;
    assert_eq!(granted, (1 << FATTR4_TYPE) | (1 << FATTR4_SIZE));
    let vals = r.opaque_var(1024)?;
    assert!(!vals.is_empty());

    // Replay: byte-identical response from the slot cache.
    let replay = client.call(&body).await?;
    assert_eq!(replay, first);
    let replay_again = client.call(&body).await?;
    assert_eq!(replay_again, first);

    Ok(())
}

#[tokio::test]
async fn test_misordered_seqid_gets_one_op_reply() -> Result<()> {
    let (_harness, mut client) = start(Config::default());
    let (clientid, sequence) = client.exchange_id(b"misorder-client").await?;
    let session = client.create_session(clientid, sequence, false).await?;

    let ok = client
        .call(&compound(1, &[sequence_op(session, 0, 1, false)]))
        .await?;
    assert_eq!(parse_res(ok).0, NfsStat::Ok.code());

    // Slot sits at seqid 1; jumping to 3 is misordered and nothing after
    // SEQUENCE runs.
    let body = compound(
        1,
        &[sequence_op(session, 0, 3, false), op(OpCode::Putrootfh, |_| {})],
    );
    let res = client.call(&body).await?;
    let (status, count, mut r) = parse_res(res);
    assert_eq!(status, NfsStat::SeqMisordered.code());
    assert_eq!(count, 1);
    assert_eq!(r.u32()?, OpCode::Sequence as u32);
    assert_eq!(r.u32()?, NfsStat::SeqMisordered.code());
    Ok(())
}

#[tokio::test]
async fn test_sequence_first_gating_over_the_wire() -> Result<()> {
    let (_harness, mut client) = start(Config::default());

    let body = compound(1, &[op(OpCode::Putrootfh, |_| {})]);
    let res = client.call(&body).await?;
    let (status, count, mut r) = parse_res(res);
    assert_eq!(status, NfsStat::OpNotInSession.code());
    assert_eq!(count, 1);
    assert_eq!(r.u32()?, OpCode::Putrootfh as u32);
    Ok(())
}

#[tokio::test]
async fn test_destroy_session_after_sequence() -> Result<()> {
    let (harness, mut client) = start(Config::default());
    let (clientid, sequence) = client.exchange_id(b"destroy-client").await?;
    let session = client.create_session(clientid, sequence, false).await?;

    let body = compound(
        1,
        &[op(OpCode::DestroySession, |w| session.encode(w))],
    );
    let res = client.call(&body).await?;
    assert_eq!(parse_res(res).0, NfsStat::Ok.code());
    assert!(harness.state.get_session(&session).is_none());

    // A SEQUENCE on the destroyed session is BADSESSION.
    let res = client
        .call(&compound(1, &[sequence_op(session, 0, 1, false)]))
        .await?;
    assert_eq!(parse_res(res).0, NfsStat::BadSession.code());
    Ok(())
}
