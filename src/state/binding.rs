// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Connection-to-session binding: directions, negotiation, and the
//! per-connection record kept in the state manager's reverse indices.

use std::sync::Arc;

use tokio::time::Instant;

use crate::{models::common::ConnectionId, server::connection::ServerConnection};

/// `channel_dir_from_client4` wire values (what the client asks for).
pub const CDFC4_FORE: u32 = 0x1;
pub const CDFC4_BACK: u32 = 0x2;
pub const CDFC4_FORE_OR_BOTH: u32 = 0x3;
pub const CDFC4_BACK_OR_BOTH: u32 = 0x7;

/// `channel_dir_from_server4` wire values (what we grant).
pub const CDFS4_FORE: u32 = 0x1;
pub const CDFS4_BACK: u32 = 0x2;
pub const CDFS4_BOTH: u32 = 0x3;

/// Direction a connection is bound in. `Both` means the stream carries
/// fore-channel calls and our callbacks simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnDirection {
    #[default]
    Fore,
    Back,
    Both,
}

impl ConnDirection {
    #[inline]
    pub const fn includes_back(self) -> bool {
        matches!(self, Self::Back | Self::Both)
    }

    /// Merge a newly granted direction into an existing binding.
    pub const fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Fore, Self::Fore) => Self::Fore,
            (Self::Back, Self::Back) => Self::Back,
            _ => Self::Both,
        }
    }

    /// Strip the back-channel capability (lazy dead-path demotion).
    pub const fn without_back(self) -> Self {
        match self {
            Self::Back | Self::Fore => Self::Fore,
            Self::Both => Self::Fore,
        }
    }

    pub const fn to_wire(self) -> u32 {
        match self {
            Self::Fore => CDFS4_FORE,
            Self::Back => CDFS4_BACK,
            Self::Both => CDFS4_BOTH,
        }
    }

    /// Direction negotiation for BIND_CONN_TO_SESSION. This server always
    /// grants the `..OR_BOTH` forms as `Both`; a plain FORE or BACK
    /// request is granted as asked. Unknown words get `None`.
    pub const fn negotiate(requested: u32) -> Option<Self> {
        match requested {
            CDFC4_FORE => Some(Self::Fore),
            CDFC4_BACK => Some(Self::Back),
            CDFC4_FORE_OR_BOTH | CDFC4_BACK_OR_BOTH => Some(Self::Both),
            _ => None,
        }
    }
}

/// A live TCP connection as the state manager sees it.
#[derive(Debug, Clone)]
pub struct BoundConnection {
    pub id: ConnectionId,
    pub conn: Arc<ServerConnection>,
    pub direction: ConnDirection,
    pub last_activity: Instant,
    pub draining: bool,
}

impl BoundConnection {
    pub fn new(id: ConnectionId, conn: Arc<ServerConnection>) -> Self {
        Self {
            id,
            conn,
            direction: ConnDirection::Fore,
            last_activity: Instant::now(),
            draining: false,
        }
    }
}
