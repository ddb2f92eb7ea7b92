// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Client registry records. A client is created unconfirmed at
//! EXCHANGE_ID, confirmed by its first CREATE_SESSION, and destroyed by
//! lease expiry or DESTROY_CLIENTID.

use std::collections::HashSet;

use bytes::Bytes;
use tokio::time::{Duration, Instant};

use crate::models::{
    common::{ClientId, SessionId},
    session_ops::ImplId,
};

/// Protocol generation of a client, fixed at registration. Callback
/// routing keys off this: v4.1 clients get the multiplexed backchannel,
/// v4.0 clients the dial-out path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinorVersion {
    V40,
    V41,
}

#[derive(Debug)]
pub struct ClientRecord {
    pub short_id: ClientId,
    /// Client-supplied long identifier; stable across client restarts.
    pub long_id: Bytes,
    /// Boot verifier. A changed verifier on re-EXCHANGE_ID means the
    /// client rebooted and its old state must go.
    pub verifier: [u8; 8],
    pub minor: MinorVersion,
    pub impl_id: Option<ImplId>,
    pub confirmed: bool,
    /// Sequence the next CREATE_SESSION must carry.
    pub create_session_seq: u32,
    pub lease_deadline: Instant,
    pub sessions: HashSet<SessionId>,
}

impl ClientRecord {
    pub fn new(
        short_id: ClientId,
        long_id: Bytes,
        verifier: [u8; 8],
        impl_id: Option<ImplId>,
        lease: Duration,
    ) -> Self {
        Self {
            short_id,
            long_id,
            verifier,
            minor: MinorVersion::V41,
            impl_id,
            confirmed: false,
            create_session_seq: 1,
            lease_deadline: Instant::now() + lease,
            sessions: HashSet::new(),
        }
    }

    #[inline]
    pub fn renew_lease(&mut self, lease: Duration) {
        self.lease_deadline = Instant::now() + lease;
    }

    #[inline]
    pub fn lease_expired(&self, now: Instant) -> bool {
        now > self.lease_deadline
    }
}
