// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The COMPOUND dispatcher: RPC-level routing, minor-version bifurcation,
//! SEQUENCE gating and slot lifecycle.
//!
//! Error shape, in order of checks:
//! * framing that cannot be decoded at all → `BADXDR`, zero results;
//! * minor version outside the configured window → `MINOR_VERS_MISMATCH`;
//! * v4.1 first op neither SEQUENCE nor session-exempt →
//!   `OP_NOT_IN_SESSION`, exactly one result;
//! * SEQUENCE anywhere past the first position → `SEQUENCE_POS`;
//! * per-op decode failure → `BADXDR` as that op's status, dispatch halts.
//!
//! The first non-OK op status halts dispatch and becomes the overall
//! status; partial results up to and including the failing op are
//! returned.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::{
    handlers::{
        OpContext, OpHandler, OpReply, Principal, fs::MetadataStore, operation_for,
        sequence::{SequenceStep, execute_sequence},
    },
    models::{
        common::{NFS_PROGRAM, NFS_VERSION, NFSPROC4_COMPOUND, NFSPROC4_NULL},
        compound::{
            CompoundHeader, CompoundReplyBuilder, MAX_OPS_PER_COMPOUND, single_op_reply,
            status_only_reply,
        },
        opcode::OpCode,
        rpc::{
            AcceptStat, CallHeader, encode_accepted_reply, encode_prog_mismatch,
            peek_xid,
        },
        sequence::SequenceArgs,
        status::NfsStat,
        xdr::{XdrError, XdrReader},
    },
    server::connection::ServerConnection,
    state::manager::StateManager,
};

pub struct Dispatcher {
    state: Arc<StateManager>,
    store: Arc<dyn MetadataStore>,
}

impl Dispatcher {
    pub fn new(state: Arc<StateManager>, store: Arc<dyn MetadataStore>) -> Arc<Self> {
        Arc::new(Self { state, store })
    }

    #[inline]
    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    /// Handle one RPC CALL record, returning the full reply record body
    /// (no record mark). `None` means the record was unusable and is
    /// dropped without a response.
    pub fn handle_call(
        &self,
        conn: &Arc<ServerConnection>,
        record: Bytes,
    ) -> Option<Bytes> {
        let (header, mut args) = match CallHeader::parse(record.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(conn = conn.id, "unparseable call: {e}");
                let xid = peek_xid(&record)?;
                return Some(encode_accepted_reply(xid, AcceptStat::GarbageArgs, b""));
            },
        };

        if header.prog != NFS_PROGRAM {
            return Some(encode_accepted_reply(
                header.xid,
                AcceptStat::ProgUnavail,
                b"",
            ));
        }
        if header.vers != NFS_VERSION {
            return Some(encode_prog_mismatch(header.xid, NFS_VERSION, NFS_VERSION));
        }

        match header.proc {
            NFSPROC4_NULL => {
                Some(encode_accepted_reply(header.xid, AcceptStat::Success, b""))
            },
            NFSPROC4_COMPOUND => {
                let body =
                    self.process_compound(conn, &header, args.take_rest());
                Some(encode_accepted_reply(header.xid, AcceptStat::Success, &body))
            },
            other => {
                debug!(conn = conn.id, proc = other, "unknown procedure");
                Some(encode_accepted_reply(header.xid, AcceptStat::ProcUnavail, b""))
            },
        }
    }

    /// Decode and execute one COMPOUND, returning the encoded
    /// COMPOUND4res body.
    pub fn process_compound(
        &self,
        conn: &Arc<ServerConnection>,
        call: &CallHeader,
        body: Bytes,
    ) -> Bytes {
        let mut r = XdrReader::new(body);
        let Ok(header) = CompoundHeader::decode(&mut r) else {
            return status_only_reply(NfsStat::BadXdr, b"");
        };

        let cfg = &self.state.config().server;
        if header.minorversion < cfg.min_minor_version
            || header.minorversion > cfg.max_minor_version
        {
            return status_only_reply(NfsStat::MinorVersMismatch, &header.tag);
        }
        if header.numops > MAX_OPS_PER_COMPOUND {
            return status_only_reply(NfsStat::TooManyOps, &header.tag);
        }

        let mut ctx = OpContext {
            peer: conn.peer,
            minor: header.minorversion,
            conn,
            state: &self.state,
            store: &self.store,
            principal: Principal::from_cred(&call.cred),
            v41: None,
            skip_owner_seqid: false,
            cfh: None,
        };

        if header.minorversion == 0 {
            let mut reply = CompoundReplyBuilder::new(header.tag.clone());
            let status =
                self.dispatch_ops(&mut ctx, &mut r, header.numops, &mut reply);
            return reply.build(status);
        }

        self.process_v41(&mut ctx, &header, &mut r)
    }

    fn process_v41(
        &self,
        ctx: &mut OpContext<'_>,
        header: &CompoundHeader,
        r: &mut XdrReader,
    ) -> Bytes {
        if header.numops == 0 {
            return CompoundReplyBuilder::new(header.tag.clone()).build(NfsStat::Ok);
        }
        let Ok(first_opnum) = r.u32() else {
            return status_only_reply(NfsStat::BadXdr, &header.tag);
        };
        let Ok(first_op) = OpCode::try_from(first_opnum) else {
            return single_op_reply(
                NfsStat::OpIllegal,
                &header.tag,
                OpCode::Illegal as u32,
            );
        };

        if first_op == OpCode::Sequence {
            return self.process_v41_sequenced(ctx, header, r);
        }

        if !first_op.is_session_exempt() {
            return single_op_reply(NfsStat::OpNotInSession, &header.tag, first_opnum);
        }

        // Session-exempt first op. Well-formed clients send these alone;
        // trailing ops are still processed, with no slot context.
        let mut reply = CompoundReplyBuilder::new(header.tag.clone());
        let mut status = self.dispatch_one(ctx, first_op, r, &mut reply);
        if status.is_ok() && header.numops > 1 {
            status = self.dispatch_ops(ctx, r, header.numops - 1, &mut reply);
        }
        reply.build(status)
    }

    fn process_v41_sequenced(
        &self,
        ctx: &mut OpContext<'_>,
        header: &CompoundHeader,
        r: &mut XdrReader,
    ) -> Bytes {
        let Ok(seq_args) = SequenceArgs::decode(r) else {
            return single_op_reply(NfsStat::BadXdr, &header.tag, OpCode::Sequence as u32);
        };

        match execute_sequence(&self.state, ctx.conn.id, &seq_args) {
            SequenceStep::Reject(stat) => {
                single_op_reply(stat, &header.tag, OpCode::Sequence as u32)
            },
            // Byte-identical replay of the whole COMPOUND; no handler
            // runs a second time.
            SequenceStep::Replay(bytes) => bytes,
            SequenceStep::Proceed {
                mut guard,
                result_body,
                v41,
            } => {
                ctx.v41 = Some(v41);
                let mut reply = CompoundReplyBuilder::new(header.tag.clone());
                reply.push(OpCode::Sequence as u32, result_body);
                let status = self.dispatch_ops(ctx, r, header.numops - 1, &mut reply);
                let bytes = reply.build(status);
                // Hand the response to the slot before returning it to
                // the wire, so a replay can never observe a bare slot.
                guard.set_reply(bytes.clone());
                drop(guard);
                bytes
            },
        }
    }

    /// Dispatch up to `nops` further operations, stopping at the first
    /// non-OK status.
    fn dispatch_ops(
        &self,
        ctx: &mut OpContext<'_>,
        r: &mut XdrReader,
        nops: u32,
        reply: &mut CompoundReplyBuilder,
    ) -> NfsStat {
        let mut status = NfsStat::Ok;
        for _ in 0..nops {
            let Ok(opnum) = r.u32() else {
                return NfsStat::BadXdr;
            };
            let Ok(op) = OpCode::try_from(opnum) else {
                reply.push(
                    OpCode::Illegal as u32,
                    OpReply::status_only(NfsStat::OpIllegal).body,
                );
                return NfsStat::OpIllegal;
            };
            status = self.dispatch_one(ctx, op, r, reply);
            if !status.is_ok() {
                break;
            }
        }
        status
    }

    fn dispatch_one(
        &self,
        ctx: &mut OpContext<'_>,
        op: OpCode,
        r: &mut XdrReader,
        reply: &mut CompoundReplyBuilder,
    ) -> NfsStat {
        let opnum = op as u32;

        if op == OpCode::Sequence {
            // SEQUENCE is only legal in the first position, which the
            // caller already consumed.
            reply.push(opnum, OpReply::status_only(NfsStat::SequencePos).body);
            return NfsStat::SequencePos;
        }
        if op == OpCode::Illegal {
            reply.push(opnum, OpReply::status_only(NfsStat::OpIllegal).body);
            return NfsStat::OpIllegal;
        }
        if ctx.minor == 0 && op.requires_v41() {
            reply.push(opnum, OpReply::status_only(NfsStat::NotSupp).body);
            return NfsStat::NotSupp;
        }

        // v4.1 replaces the open/lock-owner seqid with slot ordering; the
        // file-state handlers consult this flag.
        ctx.skip_owner_seqid = ctx.v41.is_some() && op.carries_owner_seqid();

        let Some(handler) = operation_for(op) else {
            reply.push(opnum, OpReply::status_only(NfsStat::NotSupp).body);
            return NfsStat::NotSupp;
        };

        match handler.handle(ctx, r) {
            Ok(rep) => {
                let status = rep.status;
                reply.push(opnum, rep.body);
                status
            },
            Err(e) => {
                let status = if e.downcast_ref::<XdrError>().is_some() {
                    NfsStat::BadXdr
                } else {
                    warn!(op = ?op, "handler failed: {e}");
                    NfsStat::ServerFault
                };
                reply.push(opnum, OpReply::status_only(status).body);
                status
            },
        }
    }
}
