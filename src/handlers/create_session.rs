// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! CREATE_SESSION (RFC 8881 § 18.36): allocate the slot tables, record
//! the backchannel parameters and bind the carrying connection.

use anyhow::Result;

use crate::{
    handlers::{OpContext, OpHandler, OpReply},
    models::{
        session_ops::{CreateSessionArgs, CreateSessionResOk},
        status::NfsStat,
        xdr::XdrReader,
    },
};

#[derive(Debug, Default)]
pub struct CreateSessionHandler;

impl OpHandler for CreateSessionHandler {
    fn handle(&self, ctx: &mut OpContext<'_>, args: &mut XdrReader) -> Result<OpReply> {
        let args = CreateSessionArgs::decode(args)?;
        match ctx.state.create_session(ctx.conn.id, &args) {
            Err(stat) => Ok(OpReply::status_only(stat)),
            Ok((session, sequence, flags, fore_attrs, back_attrs)) => {
                let res = CreateSessionResOk {
                    sessionid: session.id,
                    sequence,
                    flags,
                    fore_attrs,
                    back_attrs,
                };
                Ok(OpReply::new(NfsStat::Ok, res.encode()))
            },
        }
    }
}
