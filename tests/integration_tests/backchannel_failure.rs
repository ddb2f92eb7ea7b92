// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Backchannel failure path: the client stops answering callbacks, the
//! sender exhausts its retry budget, and later SEQUENCE replies carry
//! BACKCHANNEL_FAULT.

use anyhow::Result;
use bytes::Bytes;
use nfs41_server_rs::{
    backchannel::{BackchannelError, send_cb_recall},
    cfg::config::Config,
    metrics,
    models::{
        common::{FileHandle, StateId},
        opcode::OpCode,
        sequence::{SeqStatusFlags, SequenceResOk},
        status::NfsStat,
    },
};
use serial_test::serial;
use tokio::time::{Duration, Instant};

use crate::integration_tests::common::{compound, parse_res, sequence_op, start};

/// Initial send plus two immediate retries; three deliveries hit the
/// wire before the terminal failure.
fn fast_retry_config() -> Config {
    let mut cfg = Config::default();
    cfg.backchannel.reply_timeout_seconds = 1;
    cfg.backchannel.retry_attempts = 2;
    cfg.backchannel.retry_backoff_seconds = 0;
    cfg
}

#[tokio::test]
#[serial]
async fn test_unanswered_recall_marks_backchannel_fault() -> Result<()> {
    let (harness, mut client) = start(fast_retry_config());
    let (clientid, sequence) = client.exchange_id(b"dead-client").await?;
    let session = client.create_session(clientid, sequence, true).await?;

    let completion = send_cb_recall(
        &harness.state,
        clientid,
        StateId {
            seqid: 1,
            other: [1; 12],
        },
        FileHandle(Bytes::from_static(b"fh")),
        false,
    )
    .expect("enqueue");

    // Swallow the CB_COMPOUND (and its retransmissions) without replying.
    let _first_attempt = client.read_callback().await?;

    let err = completion.wait().await.expect_err("delivery must fail");
    assert_eq!(err, BackchannelError::Timeout { attempts: 2 });
    assert!(harness.metrics.counter(metrics::CB_FAILED) >= 1);
    assert_eq!(harness.metrics.counter(metrics::CB_RETRIES), 2);

    // The fault is now visible in sa_status_flags of a later SEQUENCE.
    let res = client
        .call(&compound(1, &[sequence_op(session, 0, 1, false)]))
        .await?;
    let (status, _, mut r) = parse_res(res);
    assert_eq!(status, NfsStat::Ok.code());
    assert_eq!(r.u32()?, OpCode::Sequence as u32);
    let seq = SequenceResOk::decode(&mut r)?.expect("sequence ok");
    assert!(seq.status_flags.contains(SeqStatusFlags::BACKCHANNEL_FAULT));

    // A successful delivery clears the fault; here the session simply
    // reports it until then.
    Ok(())
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_default_budget_backs_off_three_times() -> Result<()> {
    // Stock configuration: 10 s reply timeout, 3 retries, 5 s base
    // backoff. The paused clock auto-advances through the waits, so the
    // full budget runs in milliseconds of real time.
    let (harness, mut client) = start(Config::default());
    let (clientid, sequence) = client.exchange_id(b"default-budget-client").await?;
    let _session = client.create_session(clientid, sequence, true).await?;

    let completion = send_cb_recall(
        &harness.state,
        clientid,
        StateId {
            seqid: 1,
            other: [2; 12],
        },
        FileHandle(Bytes::from_static(b"fh")),
        false,
    )
    .expect("enqueue");

    // Four deliveries hit the wire: the initial send plus three retries,
    // none of which we answer.
    let mut stamps = Vec::with_capacity(4);
    for _ in 0..4 {
        let _record = client.read_callback().await?;
        stamps.push(Instant::now());
    }

    // Each retry waits out the reply timeout plus its doubled backoff:
    // 10+5 s, 10+10 s, 10+20 s.
    for (i, want) in [15u64, 20, 30].into_iter().enumerate() {
        let gap = stamps[i + 1] - stamps[i];
        assert!(
            gap >= Duration::from_secs(want) && gap < Duration::from_secs(want + 1),
            "retry {} fired after {gap:?}, expected about {want} s",
            i + 1,
        );
    }

    let err = completion.wait().await.expect_err("delivery must fail");
    assert_eq!(err, BackchannelError::Timeout { attempts: 3 });
    assert_eq!(harness.metrics.counter(metrics::CB_RETRIES), 3);
    assert_eq!(harness.metrics.counter(metrics::CB_FAILED), 1);
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_queue_overflow_is_rejected_not_blocking() -> Result<()> {
    let mut cfg = fast_retry_config();
    cfg.backchannel.queue_depth = 1;
    let (harness, mut client) = start(cfg);
    let (clientid, sequence) = client.exchange_id(b"slow-client").await?;
    let _session = client.create_session(clientid, sequence, true).await?;

    let stateid = StateId::default();
    let fh = FileHandle(Bytes::from_static(b"fh"));

    // First recall occupies the sender; the queue holds one more; the
    // next enqueue must fail immediately instead of blocking the caller.
    let _inflight = send_cb_recall(&harness.state, clientid, stateid, fh.clone(), false)
        .expect("first enqueue");
    // Let the sender dequeue the first request and park on its reply.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let _queued = send_cb_recall(&harness.state, clientid, stateid, fh.clone(), false)
        .expect("second enqueue");
    let err = send_cb_recall(&harness.state, clientid, stateid, fh, false)
        .expect_err("queue full");
    assert_eq!(err, BackchannelError::QueueFull);
    Ok(())
}
