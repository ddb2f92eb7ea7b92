// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! DESTROY_CLIENTID (RFC 8881 § 18.50). Refused while the client still
//! owns sessions.

use anyhow::Result;

use crate::{
    handlers::{OpContext, OpHandler, OpReply},
    models::xdr::XdrReader,
};

#[derive(Debug, Default)]
pub struct DestroyClientidHandler;

impl OpHandler for DestroyClientidHandler {
    fn handle(&self, ctx: &mut OpContext<'_>, args: &mut XdrReader) -> Result<OpReply> {
        let clientid = args.u64()?;
        Ok(OpReply::status_only(ctx.state.destroy_clientid(clientid)))
    }
}
