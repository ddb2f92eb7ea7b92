// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! One accepted TCP connection.
//!
//! The read task pulls record-marked RPC messages and routes them by
//! `msg_type`: CALLs go to the COMPOUND dispatcher, REPLYs are answers to
//! our own CB_COMPOUNDs and are delivered into the XID-keyed
//! `pending_callbacks` map. The routing check happens before any CALL
//! header decoding; a reply must never surface as a malformed call.
//!
//! Fore-channel responses and backchannel callback writes share the
//! stream; both go through [`ServerConnection::write_record`], which
//! serializes on the writer mutex.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, bail};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::{Mutex, oneshot},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zerocopy::{FromBytes as ZFromBytes, IntoBytes};

use crate::{
    models::{common::ConnectionId, rpc::RecordMark},
    server::{common::io_with_timeout, dispatch::Dispatcher},
};

/// Hard cap on a single RPC record; larger claims are treated as a
/// framing error and kill the connection.
const MAX_RECORD_BYTES: u32 = 16 * 1024 * 1024;

/// Connection ids are process-unique and never reused.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type IoReader = Box<dyn AsyncRead + Send + Unpin>;
type IoWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct ServerConnection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    reader: Mutex<IoReader>,
    writer: Mutex<IoWriter>,
    /// XID → waiter for replies to server-originated CB_COMPOUNDs.
    pending_callbacks: DashMap<u32, oneshot::Sender<Bytes>>,
    cancel: CancellationToken,
    io_timeout: Duration,
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("pending_callbacks", &self.pending_callbacks.len())
            .finish()
    }
}

impl ServerConnection {
    pub fn from_tcp(
        stream: TcpStream,
        cancel: CancellationToken,
        io_timeout: Duration,
    ) -> Result<Arc<Self>> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (r, w) = stream.into_split();
        Ok(Self::from_io(Box::new(r), Box::new(w), peer, cancel, io_timeout))
    }

    /// Build a connection over arbitrary I/O halves. The integration
    /// tests feed `tokio::io::duplex` pipes through here.
    pub fn from_io(
        r: IoReader,
        w: IoWriter,
        peer: SocketAddr,
        cancel: CancellationToken,
        io_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            reader: Mutex::new(r),
            writer: Mutex::new(w),
            pending_callbacks: DashMap::new(),
            cancel,
            io_timeout,
        })
    }

    #[inline]
    pub fn cancel_now(&self) {
        self.cancel.cancel();
    }

    #[inline]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Read one full RPC record (all fragments). The wait for the first
    /// mark is unbounded — an idle mount is not an error — but once a
    /// record starts it must complete within the I/O timeout.
    pub async fn read_record(&self) -> Result<Bytes> {
        let mut record = BytesMut::new();
        let mut first = true;
        loop {
            let mut mark_buf = [0u8; 4];
            {
                let mut r = self.reader.lock().await;
                if first {
                    tokio::select! {
                        _ = self.cancel.cancelled() => bail!("cancelled"),
                        res = r.read_exact(&mut mark_buf) => { res?; },
                    }
                } else {
                    io_with_timeout(
                        "read record mark",
                        r.read_exact(&mut mark_buf),
                        self.io_timeout,
                        &self.cancel,
                    )
                    .await?;
                }
            }
            first = false;

            let mark = RecordMark::read_from_bytes(mark_buf.as_slice())
                .map_err(|_| anyhow::anyhow!("short record mark"))?;
            let len = mark.fragment_len();
            if len > MAX_RECORD_BYTES || record.len() as u32 + len > MAX_RECORD_BYTES {
                bail!("record of {len} bytes exceeds cap");
            }

            let old = record.len();
            record.resize(old + len as usize, 0);
            {
                let mut r = self.reader.lock().await;
                io_with_timeout(
                    "read record fragment",
                    r.read_exact(&mut record[old..]),
                    self.io_timeout,
                    &self.cancel,
                )
                .await?;
            }

            if mark.is_last() {
                return Ok(record.freeze());
            }
        }
    }

    /// Write one payload as a single last-fragment record. Holds the
    /// writer mutex for the duration of the write so fore-channel replies
    /// and callback calls never interleave.
    pub async fn write_record(&self, payload: &[u8]) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!("cancelled");
        }
        let mark = RecordMark::new(payload.len() as u32, true);
        let mut framed = BytesMut::with_capacity(4 + payload.len());
        framed.extend_from_slice(mark.as_bytes());
        framed.extend_from_slice(payload);

        let mut w = self.writer.lock().await;
        io_with_timeout(
            "write record",
            w.write_all(&framed),
            self.io_timeout,
            &self.cancel,
        )
        .await?;
        io_with_timeout("flush record", w.flush(), self.io_timeout, &self.cancel)
            .await?;
        Ok(())
    }

    /// Register interest in the reply to XID before writing the call.
    pub fn register_callback_waiter(&self, xid: u32) -> oneshot::Receiver<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.pending_callbacks.insert(xid, tx);
        rx
    }

    pub fn unregister_callback_waiter(&self, xid: u32) {
        self.pending_callbacks.remove(&xid);
    }

    fn deliver_callback_reply(&self, xid: u32, record: Bytes) {
        match self.pending_callbacks.remove(&xid) {
            Some((_, tx)) => {
                let _ = tx.send(record);
            },
            None => {
                warn!(conn = self.id, xid, "reply for unknown xid, dropping");
            },
        }
    }

    /// Drop every registered waiter; their receivers resolve with a
    /// channel-closed error, which the sender treats as a transient
    /// connection failure and retries elsewhere.
    pub fn fail_pending_callbacks(&self) {
        self.pending_callbacks.clear();
    }

    /// Connection main loop: register with the state manager, demultiplex
    /// records until EOF/cancel, then unwind.
    pub async fn serve(self: Arc<Self>, dispatcher: Arc<Dispatcher>) {
        dispatcher.state().register_connection(Arc::clone(&self));
        if let Err(e) = Arc::clone(&self).read_loop(&dispatcher).await {
            debug!(conn = self.id, peer = %self.peer, "read loop exited: {e}");
        }
        self.fail_pending_callbacks();
        dispatcher.state().remove_connection(self.id);
    }

    async fn read_loop(self: Arc<Self>, dispatcher: &Arc<Dispatcher>) -> Result<()> {
        use crate::models::rpc::{MsgType, peek_msg_type, peek_xid};
        loop {
            let record = self.read_record().await?;
            dispatcher.state().touch_connection(self.id);

            // Route on msg_type before any CALL decoding.
            match peek_msg_type(&record) {
                Some(MsgType::Reply) => {
                    if let Some(xid) = peek_xid(&record) {
                        self.deliver_callback_reply(xid, record);
                    }
                },
                Some(MsgType::Call) => {
                    if let Some(reply) = dispatcher.handle_call(&self, record) {
                        self.write_record(&reply).await?;
                    }
                },
                None => {
                    warn!(conn = self.id, "runt or unknown rpc record, dropping");
                },
            }
        }
    }
}
