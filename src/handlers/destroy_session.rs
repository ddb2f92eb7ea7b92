// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! DESTROY_SESSION (RFC 8881 § 18.37). Destroying an already-gone
//! session is a successful no-op.

use anyhow::Result;

use crate::{
    handlers::{OpContext, OpHandler, OpReply},
    models::{common::SessionId, xdr::XdrReader},
};

#[derive(Debug, Default)]
pub struct DestroySessionHandler;

impl OpHandler for DestroySessionHandler {
    fn handle(&self, ctx: &mut OpContext<'_>, args: &mut XdrReader) -> Result<OpReply> {
        let sessionid = SessionId::decode(args)?;
        let status = ctx.state.destroy_session(&sessionid);
        Ok(OpReply::status_only(status))
    }
}
