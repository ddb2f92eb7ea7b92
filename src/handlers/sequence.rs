// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SEQUENCE (RFC 8881 § 18.46). Unlike the table-dispatched operations,
//! SEQUENCE is executed by the dispatcher itself: its outcome decides
//! whether the rest of the COMPOUND runs at all, and it owns the slot
//! lifecycle through the returned [`SlotCompletion`] guard.

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    handlers::V41Context,
    models::{
        common::ConnectionId,
        sequence::{SequenceArgs, SequenceResOk},
        status::NfsStat,
    },
    state::{
        manager::{SequenceOutcome, StateManager},
        slot::SlotCompletion,
    },
};

/// What the dispatcher does next.
#[derive(Debug)]
pub enum SequenceStep {
    /// New request: dispatch the remaining ops. The guard completes the
    /// slot on every exit path; `result_body` is the encoded SEQUENCE
    /// result to place first in the reply.
    Proceed {
        guard: SlotCompletion,
        result_body: Bytes,
        v41: V41Context,
    },
    /// Retransmission: answer with these bytes, dispatch nothing.
    Replay(Bytes),
    /// Validation failed: answer a one-op COMPOUND with this status.
    Reject(NfsStat),
}

/// Look up the session, validate the slot, renew the lease and compute
/// status flags.
pub fn execute_sequence(
    state: &Arc<StateManager>,
    conn_id: ConnectionId,
    args: &SequenceArgs,
) -> SequenceStep {
    match state.sequence_begin(conn_id, args) {
        SequenceOutcome::Reject(stat) => SequenceStep::Reject(stat),
        SequenceOutcome::Replay(bytes) => SequenceStep::Replay(bytes),
        SequenceOutcome::New {
            session,
            sequenceid,
            slotid,
            highest_slotid,
            target_highest_slotid,
            status_flags,
            cachethis,
        } => {
            let guard =
                SlotCompletion::new(Arc::clone(&session.fore), slotid, sequenceid, cachethis);
            let result_body = SequenceResOk {
                sessionid: args.sessionid,
                sequenceid,
                slotid,
                highest_slotid,
                target_highest_slotid,
                status_flags,
            }
            .encode();
            SequenceStep::Proceed {
                guard,
                result_body,
                v41: V41Context {
                    session_id: args.sessionid,
                    slot_id: slotid,
                    seqid: sequenceid,
                    cache_this: cachethis,
                },
            }
        },
    }
}
