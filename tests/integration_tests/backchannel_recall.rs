// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! CB_RECALL over the multiplexed fore-channel connection: the server
//! writes a CB_COMPOUND on the client's own TCP stream, the client
//! answers over the same stream, and the sender matches the reply by XID.

use anyhow::{Result, ensure};
use bytes::Bytes;
use nfs41_server_rs::{
    backchannel::send_cb_recall,
    cfg::config::Config,
    metrics,
    models::{
        callback::CbRecall,
        common::{CB_COMPOUND, FileHandle, StateId},
        opcode::CbOpCode,
        rpc::{AcceptStat, CallHeader, encode_accepted_reply},
        sequence::{CbSequenceArgs, CbSequenceResOk},
        status::NfsStat,
        xdr::XdrWriter,
    },
};

use crate::integration_tests::common::{TestClient, start};

/// Parse a CB_COMPOUND CALL record into (xid, CB_SEQUENCE args, CB_RECALL).
fn parse_cb_call(record: Bytes) -> Result<(u32, CbSequenceArgs, CbRecall)> {
    let (header, mut r) = CallHeader::parse(record)?;
    ensure!(header.prog == 0x4000_0000, "wrong callback program");
    ensure!(header.proc == CB_COMPOUND, "wrong procedure");

    let _tag = r.opaque_var(1024)?;
    ensure!(r.u32()? == 1, "cb minorversion");
    let _ident = r.u32()?;
    ensure!(r.u32()? == 2, "cb opcount");
    ensure!(r.u32()? == CbOpCode::CbSequence as u32, "first op");
    let seq = CbSequenceArgs::decode(&mut r)?;
    ensure!(r.u32()? == CbOpCode::CbRecall as u32, "second op");
    let recall = CbRecall::decode(&mut r)?;
    Ok((header.xid, seq, recall))
}

fn cb_reply_ok(xid: u32, seq: &CbSequenceArgs) -> Bytes {
    let mut w = XdrWriter::new();
    w.u32(NfsStat::Ok.code());
    w.opaque_var(b"");
    w.u32(2);
    w.u32(CbOpCode::CbSequence as u32);
    w.raw(
        &CbSequenceResOk {
            sessionid: seq.sessionid,
            sequenceid: seq.sequenceid,
            slotid: seq.slotid,
            highest_slotid: seq.highest_slotid,
            target_highest_slotid: seq.highest_slotid,
        }
        .encode(),
    );
    w.u32(CbOpCode::CbRecall as u32);
    w.u32(NfsStat::Ok.code());
    encode_accepted_reply(xid, AcceptStat::Success, &w.into_bytes())
}

async fn answer_one_callback(client: &mut TestClient) -> Result<(CbSequenceArgs, CbRecall)> {
    let record = client.read_callback().await?;
    let (xid, seq, recall) = parse_cb_call(record)?;
    let reply = cb_reply_ok(xid, &seq);
    client.write_record(&reply).await?;
    Ok((seq, recall))
}

#[tokio::test]
async fn test_cb_recall_round_trip() -> Result<()> {
    let (harness, mut client) = start(Config::default());
    let (clientid, sequence) = client.exchange_id(b"recall-client").await?;
    let session = client.create_session(clientid, sequence, true).await?;

    let stateid = StateId {
        seqid: 1,
        other: [0xaa; 12],
    };
    let fh = FileHandle(Bytes::from_static(b"delegated-file"));
    let completion = send_cb_recall(
        &harness.state,
        clientid,
        stateid,
        fh.clone(),
        false,
    )
    .expect("enqueue");

    let (seq, recall) = answer_one_callback(&mut client).await?;
    assert_eq!(seq.sessionid, session);
    assert_eq!(seq.slotid, 0);
    assert_eq!(seq.sequenceid, 1);
    assert!(!seq.cachethis);
    assert_eq!(recall.stateid, stateid);
    assert_eq!(recall.fh, fh);
    assert!(!recall.truncate);

    completion.wait().await.expect("callback completes ok");
    assert_eq!(harness.metrics.counter(metrics::CB_SENT), 1);
    assert_eq!(harness.metrics.counter(metrics::CB_FAILED), 0);

    // Callbacks of one session are serialized on slot 0: a second recall
    // advances the CB_SEQUENCE seqid.
    let completion = send_cb_recall(
        &harness.state,
        clientid,
        stateid,
        fh,
        true,
    )
    .expect("enqueue");
    let (seq, recall) = answer_one_callback(&mut client).await?;
    assert_eq!(seq.sequenceid, 2);
    assert!(recall.truncate);
    completion.wait().await.expect("second callback ok");
    assert_eq!(harness.metrics.counter(metrics::CB_SENT), 2);

    Ok(())
}

#[tokio::test]
async fn test_recall_without_backchannel_session_fails_fast() -> Result<()> {
    let (harness, mut client) = start(Config::default());
    let (clientid, sequence) = client.exchange_id(b"no-back-client").await?;
    let _session = client.create_session(clientid, sequence, false).await?;

    let err = send_cb_recall(
        &harness.state,
        clientid,
        StateId::default(),
        FileHandle(Bytes::from_static(b"fh")),
        false,
    )
    .expect_err("no backchannel-capable session");
    assert_eq!(
        err,
        nfs41_server_rs::backchannel::BackchannelError::NoBackchannel
    );
    Ok(())
}

#[tokio::test]
async fn test_recall_for_unknown_client_fails() {
    let (harness, _client) = start(Config::default());
    let err = send_cb_recall(
        &harness.state,
        0xdead,
        StateId::default(),
        FileHandle(Bytes::from_static(b"fh")),
        false,
    )
    .expect_err("unknown client");
    assert_eq!(
        err,
        nfs41_server_rs::backchannel::BackchannelError::NoBackchannel
    );
}
