// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The session record: slot tables, creation flags, backchannel security
//! parameters, and the lazily started backchannel sender.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use once_cell::sync::OnceCell;

use crate::{
    backchannel::BackchannelHandle,
    models::{
        common::{ClientId, SessionId},
        session_ops::{CallbackSecParms, CreateSessionFlags},
    },
    state::slot::SlotTable,
};

/// Mutable backchannel security envelope, replaced by BACKCHANNEL_CTL.
#[derive(Debug, Clone)]
pub struct BackchannelSecurity {
    pub cb_program: u32,
    pub sec_parms: Vec<CallbackSecParms>,
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub client: ClientId,
    pub flags: CreateSessionFlags,
    pub fore: Arc<SlotTable>,
    /// Present only when the session was created with a back channel.
    pub back: Option<Arc<SlotTable>>,
    security: Mutex<BackchannelSecurity>,
    /// Set after a callback exhausted its retry budget; cleared by the
    /// next successful delivery. Reported as BACKCHANNEL_FAULT.
    backchannel_fault: AtomicBool,
    /// Sender task handle, created on first callback enqueue.
    pub(crate) backchannel: OnceCell<BackchannelHandle>,
}

impl Session {
    pub fn new(
        id: SessionId,
        client: ClientId,
        flags: CreateSessionFlags,
        fore: SlotTable,
        back: Option<SlotTable>,
        cb_program: u32,
        sec_parms: Vec<CallbackSecParms>,
    ) -> Self {
        Self {
            id,
            client,
            flags,
            fore: Arc::new(fore),
            back: back.map(Arc::new),
            security: Mutex::new(BackchannelSecurity {
                cb_program,
                sec_parms,
            }),
            backchannel_fault: AtomicBool::new(false),
            backchannel: OnceCell::new(),
        }
    }

    #[inline]
    pub fn has_backchannel(&self) -> bool {
        self.back.is_some()
    }

    pub fn security(&self) -> BackchannelSecurity {
        self.security.lock().expect("session security poisoned").clone()
    }

    pub fn replace_security(&self, cb_program: u32, sec_parms: Vec<CallbackSecParms>) {
        let mut sec = self.security.lock().expect("session security poisoned");
        *sec = BackchannelSecurity {
            cb_program,
            sec_parms,
        };
    }

    #[inline]
    pub fn backchannel_fault(&self) -> bool {
        self.backchannel_fault.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_backchannel_fault(&self, faulted: bool) {
        self.backchannel_fault.store(faulted, Ordering::Relaxed);
    }

    /// Replay-cache footprint across both channels, for the metrics gauge.
    pub fn cached_reply_bytes(&self) -> usize {
        self.fore.cached_bytes()
            + self.back.as_ref().map_or(0, |t| t.cached_bytes())
    }
}
