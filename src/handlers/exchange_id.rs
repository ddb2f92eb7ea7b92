// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! EXCHANGE_ID (RFC 8881 § 18.35): register or rebind a client.

use anyhow::Result;

use crate::{
    handlers::{OpContext, OpHandler, OpReply},
    models::{
        session_ops::{ExchangeIdArgs, ExchangeIdResOk, ImplId, NfsTime, SP4_SSV},
        status::NfsStat,
        xdr::XdrReader,
    },
};

#[derive(Debug, Default)]
pub struct ExchangeIdHandler;

impl OpHandler for ExchangeIdHandler {
    fn handle(&self, ctx: &mut OpContext<'_>, args: &mut XdrReader) -> Result<OpReply> {
        let args = ExchangeIdArgs::decode(args)?;
        if args.state_protect == SP4_SSV {
            // SSV needs an SSV GSS mechanism this server does not carry.
            return Ok(OpReply::status_only(NfsStat::EncrAlgUnsupp));
        }

        let (clientid, sequenceid, flags) = match ctx.state.exchange_id(&args) {
            Ok(res) => res,
            Err(stat) => return Ok(OpReply::status_only(stat)),
        };

        let res = ExchangeIdResOk {
            clientid,
            sequenceid,
            flags,
            server_minor_id: 0,
            server_major_id: ctx.state.server_major_id(),
            server_scope: ctx.state.server_scope(),
            server_impl_id: Some(ImplId {
                domain: "rs".to_string(),
                name: concat!(
                    env!("CARGO_PKG_NAME"),
                    "/",
                    env!("CARGO_PKG_VERSION")
                )
                .to_string(),
                date: NfsTime::default(),
            }),
        };
        Ok(OpReply::new(NfsStat::Ok, res.encode()))
    }
}
