// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-channel slot tables: the exactly-once machinery of RFC 8881 § 2.10.6.
//!
//! Each slot advances a 32-bit sequence id and keeps the previous reply
//! for byte-identical replay. Lock ordering: the slot-table mutex is the
//! innermost lock in the process (state > connection > slot); nothing is
//! ever awaited while it is held.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};

use bytes::Bytes;

use crate::models::{compound::status_only_reply, status::NfsStat};

/// One request slot.
///
/// While `in_use` is set, `seqid` is the id of the in-flight request and
/// `cached_reply` still holds the response to the previous request.
#[derive(Debug, Default)]
struct Slot {
    seqid: u32,
    in_use: bool,
    cached_reply: Bytes,
    reply_cached: bool,
}

/// Sequence ids wrap from 0xFFFF_FFFF to 1, never to 0 (a fresh slot sits
/// at 0 and the first legitimate request uses 1).
#[inline]
pub const fn next_seqid(cur: u32) -> u32 {
    let n = cur.wrapping_add(1);
    if n == 0 { 1 } else { n }
}

/// Outcome of validating one SEQUENCE (or CB_SEQUENCE) against a slot.
#[derive(Debug)]
pub enum SequenceDisposition {
    /// Fresh request: the slot is now held; the caller must eventually
    /// call [`SlotTable::complete`] (the dispatcher does so through a
    /// [`SlotCompletion`] guard).
    New,
    /// Retransmission with a cached response: return these bytes verbatim.
    Replay(Bytes),
    /// Anything else, expressed as the protocol status to put in the
    /// SEQUENCE result (`BADSLOT`, `SEQ_MISORDERED`, `DELAY`,
    /// `RETRY_UNCACHED_REP`).
    Reject(NfsStat),
}

/// Fixed-capacity slot table for one channel of one session.
#[derive(Debug)]
pub struct SlotTable {
    slots: Mutex<Vec<Slot>>,
    slot_count: u32,
    target_highest: AtomicU32,
}

impl SlotTable {
    pub fn new(slot_count: u32) -> Self {
        let mut slots = Vec::with_capacity(slot_count as usize);
        slots.resize_with(slot_count as usize, Slot::default);
        Self {
            slots: Mutex::new(slots),
            slot_count,
            target_highest: AtomicU32::new(slot_count.saturating_sub(1)),
        }
    }

    /// Number of slots. Wire-visible `highest_slotid` is this minus one.
    #[inline]
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    #[inline]
    pub fn highest_slotid(&self) -> u32 {
        self.slot_count.saturating_sub(1)
    }

    /// The server's hint to the client. Reported in every SEQUENCE result;
    /// actual downsizing is left to the client.
    #[inline]
    pub fn target_highest_slotid(&self) -> u32 {
        self.target_highest.load(Ordering::Relaxed)
    }

    pub fn set_target_highest_slotid(&self, v: u32) {
        self.target_highest.store(v, Ordering::Relaxed);
    }

    /// Validate `(slot, seqid)` and, for a new request, take the slot.
    pub fn validate_sequence(&self, slot_id: u32, seqid: u32) -> SequenceDisposition {
        if slot_id >= self.slot_count {
            return SequenceDisposition::Reject(NfsStat::BadSlot);
        }
        let mut slots = self.slots.lock().expect("slot table poisoned");
        let slot = &mut slots[slot_id as usize];

        if slot.in_use {
            // Retransmit of the in-flight request, or a client that ran
            // ahead without seeing a reply. Either way: come back later.
            return SequenceDisposition::Reject(NfsStat::Delay);
        }
        if seqid == next_seqid(slot.seqid) {
            slot.seqid = seqid;
            slot.in_use = true;
            return SequenceDisposition::New;
        }
        if seqid == slot.seqid {
            if slot.reply_cached {
                return SequenceDisposition::Replay(slot.cached_reply.clone());
            }
            return SequenceDisposition::Reject(NfsStat::RetryUncachedRep);
        }
        SequenceDisposition::Reject(NfsStat::SeqMisordered)
    }

    /// Finish the request occupying `slot_id`. With `cache_this` unset only
    /// the fact that a reply existed is retained, so a replay gets
    /// `RETRY_UNCACHED_REP`.
    pub fn complete(&self, slot_id: u32, seqid: u32, cache_this: bool, reply: Bytes) {
        let mut slots = self.slots.lock().expect("slot table poisoned");
        let Some(slot) = slots.get_mut(slot_id as usize) else {
            return;
        };
        if !slot.in_use || slot.seqid != seqid {
            // Slot reuse without completion is an invariant violation in
            // the dispatcher, not something we can repair here.
            tracing::error!(slot_id, seqid, cur = slot.seqid, "slot completion mismatch");
            return;
        }
        slot.in_use = false;
        if cache_this {
            slot.cached_reply = reply;
            slot.reply_cached = true;
        } else {
            slot.cached_reply = Bytes::new();
            slot.reply_cached = false;
        }
    }

    /// Reserve the next sequence id on `slot_id` for a server-originated
    /// callback. `None` while a callback is still outstanding on the slot.
    pub fn reserve_next(&self, slot_id: u32) -> Option<u32> {
        let mut slots = self.slots.lock().expect("slot table poisoned");
        let slot = slots.get_mut(slot_id as usize)?;
        if slot.in_use {
            return None;
        }
        slot.seqid = next_seqid(slot.seqid);
        slot.in_use = true;
        Some(slot.seqid)
    }

    /// Release a slot reserved with [`reserve_next`] once the callback
    /// round-trip concluded (successfully or not).
    pub fn finish_send(&self, slot_id: u32) {
        let mut slots = self.slots.lock().expect("slot table poisoned");
        if let Some(slot) = slots.get_mut(slot_id as usize) {
            slot.in_use = false;
        }
    }

    /// Current seqid of a slot. Test and metrics helper.
    pub fn seqid_of(&self, slot_id: u32) -> Option<u32> {
        let slots = self.slots.lock().expect("slot table poisoned");
        slots.get(slot_id as usize).map(|s| s.seqid)
    }

    pub fn in_use_count(&self) -> u32 {
        let slots = self.slots.lock().expect("slot table poisoned");
        slots.iter().filter(|s| s.in_use).count() as u32
    }

    /// Total bytes held by this table's replay cache.
    pub fn cached_bytes(&self) -> usize {
        let slots = self.slots.lock().expect("slot table poisoned");
        slots.iter().map(|s| s.cached_reply.len()).sum()
    }
}

/// Scoped slot release. Constructed by the dispatcher when SEQUENCE admits
/// a new request; on every exit path (including panic unwind) the slot is
/// completed. If no response was recorded, a status-only buffer is cached
/// so the slot does not stick in `in_use`.
#[derive(Debug)]
pub struct SlotCompletion {
    table: Arc<SlotTable>,
    slot_id: u32,
    seqid: u32,
    cache_this: bool,
    reply: Option<Bytes>,
}

impl SlotCompletion {
    pub fn new(
        table: Arc<SlotTable>,
        slot_id: u32,
        seqid: u32,
        cache_this: bool,
    ) -> Self {
        Self {
            table,
            slot_id,
            seqid,
            cache_this,
            reply: None,
        }
    }

    /// Record the encoded COMPOUND response for the replay cache.
    pub fn set_reply(&mut self, reply: Bytes) {
        self.reply = Some(reply);
    }
}

impl Drop for SlotCompletion {
    fn drop(&mut self) {
        let reply = self
            .reply
            .take()
            .unwrap_or_else(|| status_only_reply(NfsStat::ServerFault, b""));
        self.table
            .complete(self.slot_id, self.seqid, self.cache_this, reply);
    }
}
