// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! BACKCHANNEL_CTL (RFC 8881 § 18.33): replace a session's callback
//! program and security parameters. Ordered after SEQUENCE; a session
//! without a back channel gets INVAL.

use anyhow::Result;

use crate::{
    handlers::{OpContext, OpHandler, OpReply},
    models::{session_ops::BackchannelCtlArgs, status::NfsStat, xdr::XdrReader},
};

#[derive(Debug, Default)]
pub struct BackchannelCtlHandler;

impl OpHandler for BackchannelCtlHandler {
    fn handle(&self, ctx: &mut OpContext<'_>, args: &mut XdrReader) -> Result<OpReply> {
        let args = BackchannelCtlArgs::decode(args)?;
        let Some(v41) = ctx.v41 else {
            return Ok(OpReply::status_only(NfsStat::OpNotInSession));
        };
        let status =
            ctx.state
                .backchannel_ctl(&v41.session_id, args.cb_program, args.sec_parms);
        Ok(OpReply::status_only(status))
    }
}
