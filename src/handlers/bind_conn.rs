// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! BIND_CONN_TO_SESSION (RFC 8881 § 18.34): extend this connection's
//! binding to another session, negotiating the direction.

use anyhow::Result;

use crate::{
    handlers::{OpContext, OpHandler, OpReply},
    models::{
        session_ops::{BindConnArgs, BindConnResOk},
        status::NfsStat,
        xdr::XdrReader,
    },
};

#[derive(Debug, Default)]
pub struct BindConnHandler;

impl OpHandler for BindConnHandler {
    fn handle(&self, ctx: &mut OpContext<'_>, args: &mut XdrReader) -> Result<OpReply> {
        let args = BindConnArgs::decode(args)?;
        match ctx
            .state
            .bind_conn_to_session(ctx.conn.id, &args.sessionid, args.dir)
        {
            Err(stat) => Ok(OpReply::status_only(stat)),
            Ok(dir) => {
                let res = BindConnResOk {
                    sessionid: args.sessionid,
                    dir: dir.to_wire(),
                    rdma_mode: false,
                };
                Ok(OpReply::new(NfsStat::Ok, res.encode()))
            },
        }
    }
}
