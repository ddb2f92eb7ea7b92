// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server-originated callbacks over the client's own TCP connection.
//!
//! The recall trigger enqueues onto a per-session sender task; the task
//! writes CB_COMPOUND (CB_SEQUENCE + the callback op) on a back-bound
//! connection and matches the reply by XID through the connection's
//! pending-callback map. Completion is signalled exactly once per
//! enqueued request.

pub mod sender;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    models::{
        callback::{CbOp, CbRecall},
        common::{ClientId, FileHandle, StateId},
    },
    state::{client::MinorVersion, manager::StateManager},
};

/// Terminal disposition of one callback request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackchannelError {
    #[error("callback queue is full")]
    QueueFull,
    #[error("no back-bound connection or backchannel-capable session")]
    NoBackchannel,
    #[error("no reply after initial send and {attempts} retries")]
    Timeout { attempts: u32 },
    #[error("connection closed while awaiting reply")]
    ConnectionClosed,
    #[error("rpc layer rejected the callback (accept_stat {0})")]
    Rpc(u32),
    #[error("client answered the callback with status {0}")]
    Status(u32),
    #[error("sender shut down")]
    Shutdown,
    #[error("cancelled")]
    Cancelled,
    #[error("client is v4.0 and no dial-out path is registered")]
    DialOutUnavailable,
}

/// One queued callback: the pre-encoded op plus its completion channel.
#[derive(Debug)]
pub struct CallbackRequest {
    pub op: CbOp,
    pub done: oneshot::Sender<Result<(), BackchannelError>>,
}

/// Await side of a callback enqueue.
#[derive(Debug)]
pub struct CallbackCompletion(oneshot::Receiver<Result<(), BackchannelError>>);

impl CallbackCompletion {
    pub async fn wait(self) -> Result<(), BackchannelError> {
        self.0.await.unwrap_or(Err(BackchannelError::Shutdown))
    }
}

/// Enqueue side held by the session. Cloned freely; shutdown is
/// level-triggered through the cancel token.
#[derive(Debug, Clone)]
pub struct BackchannelHandle {
    pub(crate) queue: mpsc::Sender<CallbackRequest>,
    pub(crate) cancel: CancellationToken,
}

impl BackchannelHandle {
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn enqueue(&self, op: CbOp) -> Result<CallbackCompletion, BackchannelError> {
        let (tx, rx) = oneshot::channel();
        let req = CallbackRequest { op, done: tx };
        match self.queue.try_send(req) {
            Ok(()) => Ok(CallbackCompletion(rx)),
            Err(mpsc::error::TrySendError::Full(req)) => {
                let _ = req.done.send(Err(BackchannelError::QueueFull));
                Err(BackchannelError::QueueFull)
            },
            Err(mpsc::error::TrySendError::Closed(req)) => {
                let _ = req.done.send(Err(BackchannelError::Shutdown));
                Err(BackchannelError::Shutdown)
            },
        }
    }
}

/// Delegation recall entry point for the (external) delegation subsystem.
///
/// Routing is decided by the client's fixed version tag: v4.1 clients get
/// the multiplexed backchannel; v4.0 clients delegate to the dial-out
/// collaborator. Never blocks: queue overflow surfaces as
/// [`BackchannelError::QueueFull`] and the caller schedules revocation.
pub fn send_cb_recall(
    state: &Arc<StateManager>,
    client: ClientId,
    stateid: StateId,
    fh: FileHandle,
    truncate: bool,
) -> Result<CallbackCompletion, BackchannelError> {
    match state.client_minor_version(client) {
        None => Err(BackchannelError::NoBackchannel),
        Some(MinorVersion::V40) => {
            let (tx, rx) = oneshot::channel();
            if state.dial_out_recall(client, stateid, fh, truncate) {
                let _ = tx.send(Ok(()));
                Ok(CallbackCompletion(rx))
            } else {
                Err(BackchannelError::DialOutUnavailable)
            }
        },
        Some(MinorVersion::V41) => {
            let session = state
                .session_for_recall(client)
                .ok_or(BackchannelError::NoBackchannel)?;
            let handle = session.backchannel.get_or_init(|| {
                sender::BackchannelSender::spawn(Arc::clone(state), session.id)
            });
            handle.enqueue(CbOp::CbRecall(CbRecall {
                stateid,
                truncate,
                fh,
            }))
        },
    }
}
