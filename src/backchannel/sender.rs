// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The per-session backchannel sender task.
//!
//! Callbacks of one session are totally ordered: the task dequeues one
//! request at a time and runs the full write / await-reply / retry cycle
//! before touching the next. Slot 0 of the back-channel table is
//! sufficient under this single-outstanding policy.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use rand::RngExt;
use tokio::{
    sync::mpsc,
    time::{Instant, sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    backchannel::{BackchannelError, BackchannelHandle, CallbackRequest},
    metrics,
    models::{
        callback::{CbCompoundRes, CbOp, encode_cb_compound},
        common::{CB_COMPOUND, SessionId},
        rpc::{AUTH_SYS, CallHeader, OpaqueAuth, ReplyHeader},
        sequence::CbSequenceArgs,
        session_ops::CallbackSecParms,
        status::NfsStat,
    },
    state::{manager::StateManager, session::Session},
};

/// Version of the callback program in the RPC CALL header.
const CB_PROGRAM_VERSION: u32 = 4;

/// The back-channel slot this sender drives.
const CB_SLOT: u32 = 0;

/// Why one delivery attempt failed, and whether another connection /
/// another attempt can still help.
#[derive(Debug)]
enum AttemptError {
    NoConnection,
    WriteFailed,
    Timeout,
    ConnectionClosed,
    Rpc(u32),
    Status(u32),
    Cancelled,
}

impl AttemptError {
    /// Transient failures are retried on the next attempt (possibly over
    /// a different connection); the rest end the delivery immediately.
    const fn transient(&self) -> bool {
        matches!(
            self,
            Self::WriteFailed | Self::Timeout | Self::ConnectionClosed
        )
    }
}

pub struct BackchannelSender {
    state: Arc<StateManager>,
    session_id: SessionId,
    next_xid: AtomicU32,
    cancel: CancellationToken,
}

impl BackchannelSender {
    /// Start the sender task for a session and hand back its queue.
    pub fn spawn(state: Arc<StateManager>, session_id: SessionId) -> BackchannelHandle {
        let depth = state.config().backchannel.queue_depth;
        let (tx, rx) = mpsc::channel(depth);
        let cancel = state.cancel_token().child_token();
        let sender = Self {
            state,
            session_id,
            // Random XID seed keeps the callback XID namespace disjoint
            // from other sessions on a shared connection.
            next_xid: AtomicU32::new(rand::rng().random::<u32>()),
            cancel: cancel.clone(),
        };
        tokio::spawn(sender.run(rx));
        BackchannelHandle { queue: tx, cancel }
    }

    async fn run(self, mut rx: mpsc::Receiver<CallbackRequest>) {
        debug!(session = ?self.session_id, "backchannel sender started");
        loop {
            let req = tokio::select! {
                _ = self.cancel.cancelled() => break,
                req = rx.recv() => match req {
                    Some(req) => req,
                    None => break,
                },
            };
            let res = self.deliver(&req.op).await;
            if let Err(e) = &res {
                warn!(session = ?self.session_id, "callback failed: {e}");
            }
            let _ = req.done.send(res);
        }
        // Shutdown: every queued waiter gets notified exactly once.
        rx.close();
        while let Ok(req) = rx.try_recv() {
            let _ = req.done.send(Err(BackchannelError::Shutdown));
        }
        debug!(session = ?self.session_id, "backchannel sender stopped");
    }

    async fn deliver(&self, op: &CbOp) -> Result<(), BackchannelError> {
        let Some(session) = self.state.get_session(&self.session_id) else {
            return Err(BackchannelError::Shutdown);
        };
        let Some(back) = session.back.as_ref() else {
            return Err(BackchannelError::NoBackchannel);
        };

        // One reservation per delivery: retries retransmit the same
        // CB_SEQUENCE seqid, as a retransmission must.
        let Some(seqid) = back.reserve_next(CB_SLOT) else {
            return Err(BackchannelError::Shutdown);
        };
        let started = Instant::now();
        let result = self.deliver_reserved(&session, seqid, op).await;
        back.finish_send(CB_SLOT);

        let metrics_sink = self.state.metrics();
        metrics_sink.observe_ms(
            metrics::CB_DURATION_MS,
            started.elapsed().as_millis() as u64,
        );
        match &result {
            Ok(()) => {
                session.set_backchannel_fault(false);
                metrics_sink.incr(metrics::CB_SENT, 1);
            },
            Err(BackchannelError::Cancelled) => {},
            Err(_) => {
                session.set_backchannel_fault(true);
                metrics_sink.incr(metrics::CB_FAILED, 1);
            },
        }
        result
    }

    async fn deliver_reserved(
        &self,
        session: &Arc<Session>,
        seqid: u32,
        op: &CbOp,
    ) -> Result<(), BackchannelError> {
        let retries = self.state.config().backchannel.retry_attempts;
        let base_backoff = self.state.config().cb_backoff();

        // One initial send plus `retries` backed-off retries; with the
        // default budget of 3 the waits run 5 s, 10 s, 20 s.
        let mut last_error = AttemptError::Timeout;
        for attempt in 0..=retries {
            if attempt > 0 {
                self.state.metrics().incr(metrics::CB_RETRIES, 1);
                let backoff = base_backoff * 2u32.pow(attempt - 1);
                debug!(
                    session = ?self.session_id,
                    attempt,
                    "callback attempt failed ({last_error:?}), backing off {backoff:?}"
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        return Err(BackchannelError::Cancelled);
                    },
                    _ = sleep(backoff) => {},
                }
            }
            match self.attempt_once(session, seqid, op).await {
                Ok(()) => return Ok(()),
                Err(AttemptError::NoConnection) => {
                    // CB_PATH_DOWN surfaces via status flags; the recall
                    // subsystem schedules revocation after its grace.
                    return Err(BackchannelError::NoBackchannel);
                },
                Err(AttemptError::Cancelled) => {
                    return Err(BackchannelError::Cancelled);
                },
                Err(AttemptError::Rpc(stat)) => {
                    return Err(BackchannelError::Rpc(stat));
                },
                Err(AttemptError::Status(stat)) => {
                    return Err(BackchannelError::Status(stat));
                },
                Err(e) if e.transient() && attempt < retries => {
                    last_error = e;
                },
                Err(AttemptError::ConnectionClosed) => {
                    return Err(BackchannelError::ConnectionClosed);
                },
                Err(_) => {
                    return Err(BackchannelError::Timeout { attempts: retries });
                },
            }
        }
        Err(BackchannelError::Timeout { attempts: retries })
    }

    async fn attempt_once(
        &self,
        session: &Arc<Session>,
        seqid: u32,
        op: &CbOp,
    ) -> Result<(), AttemptError> {
        let (conn_id, conn) = self
            .state
            .pick_back_connection(&self.session_id)
            .ok_or(AttemptError::NoConnection)?;

        let back = session.back.as_ref().ok_or(AttemptError::NoConnection)?;
        let security = session.security();
        let cred = callback_cred(&security.sec_parms);

        let seq = CbSequenceArgs {
            sessionid: self.session_id,
            sequenceid: seqid,
            slotid: CB_SLOT,
            highest_slotid: back.highest_slotid(),
            cachethis: false,
        };
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        let call = CallHeader {
            xid,
            prog: security.cb_program,
            vers: CB_PROGRAM_VERSION,
            proc: CB_COMPOUND,
            cred,
            verf: OpaqueAuth::none(),
        };
        let record = call.encode(&encode_cb_compound(&seq, op));

        // Waiter first, then the write: the reply can race the write
        // completing.
        let reply_rx = conn.register_callback_waiter(xid);
        if let Err(e) = conn.write_record(&record).await {
            debug!(conn = conn_id, xid, "callback write failed: {e}");
            conn.unregister_callback_waiter(xid);
            self.state.demote_backchannel(conn_id, &self.session_id);
            return Err(AttemptError::WriteFailed);
        }

        let reply_timeout = self.state.config().cb_reply_timeout();
        let reply = tokio::select! {
            _ = self.cancel.cancelled() => {
                conn.unregister_callback_waiter(xid);
                return Err(AttemptError::Cancelled);
            },
            res = timeout(reply_timeout, reply_rx) => match res {
                Err(_) => {
                    conn.unregister_callback_waiter(xid);
                    self.state.demote_backchannel(conn_id, &self.session_id);
                    return Err(AttemptError::Timeout);
                },
                Ok(Err(_)) => {
                    self.state.demote_backchannel(conn_id, &self.session_id);
                    return Err(AttemptError::ConnectionClosed);
                },
                Ok(Ok(record)) => record,
            },
        };

        let (header, mut body) =
            ReplyHeader::parse(reply).map_err(|_| AttemptError::Rpc(u32::MAX))?;
        debug_assert_eq!(header.xid, xid);
        if header.accept_stat != 0 {
            return Err(AttemptError::Rpc(header.accept_stat));
        }
        let res =
            CbCompoundRes::decode(&mut body).map_err(|_| AttemptError::Status(u32::MAX))?;
        if !res.is_ok() {
            let stat = if res.seq_status != NfsStat::Ok.code() {
                res.seq_status
            } else {
                res.op_status.unwrap_or(res.status)
            };
            return Err(AttemptError::Status(stat));
        }
        Ok(())
    }
}

/// Pick the RPC credential for a CB_COMPOUND from the session's stored
/// security parameters. GSS contexts would be established lazily here;
/// until then GSS entries fall back to AUTH_NONE.
fn callback_cred(sec_parms: &[CallbackSecParms]) -> OpaqueAuth {
    for parms in sec_parms {
        match parms {
            CallbackSecParms::Sys(sys) => {
                return OpaqueAuth {
                    flavor: AUTH_SYS,
                    body: sys.encode(),
                };
            },
            CallbackSecParms::None => return OpaqueAuth::none(),
            CallbackSecParms::Gss { .. } => continue,
        }
    }
    OpaqueAuth::none()
}
