// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use rand::RngExt;

use crate::models::common::{SESSIONID_SIZE, SessionId};

/// Generate a fresh random session id. 16 bytes from the thread RNG;
/// ids are never reused within the process lifetime.
pub fn generate_session_id() -> SessionId {
    let mut id = [0u8; SESSIONID_SIZE];
    rand::rng().fill(&mut id);
    SessionId(id)
}

/// Generate an 8-byte verifier (for tests and the v4.0 registration path).
pub fn generate_verifier() -> [u8; 8] {
    let mut v = [0u8; 8];
    rand::rng().fill(&mut v);
    v
}
