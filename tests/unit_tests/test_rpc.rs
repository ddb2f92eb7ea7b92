// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use hex_literal::hex;
use nfs41_server_rs::models::{
    common::{NFS_PROGRAM, NFS_VERSION, NFSPROC4_COMPOUND},
    rpc::{
        AcceptStat, AuthSysParms, CallHeader, MsgType, OpaqueAuth, RecordMark,
        ReplyHeader, encode_accepted_reply, peek_msg_type, peek_xid,
    },
};
use zerocopy::{FromBytes, IntoBytes};

#[test]
fn test_record_mark_last_fragment_bit() {
    let mark = RecordMark::new(0x1234, true);
    assert_eq!(mark.as_bytes(), hex!("80001234"));
    assert!(mark.is_last());
    assert_eq!(mark.fragment_len(), 0x1234);

    let mark = RecordMark::read_from_bytes(&hex!("00000010")).expect("mark");
    assert!(!mark.is_last());
    assert_eq!(mark.fragment_len(), 16);
}

#[test]
fn test_call_header_round_trip() {
    let call = CallHeader {
        xid: 0x11223344,
        prog: NFS_PROGRAM,
        vers: NFS_VERSION,
        proc: NFSPROC4_COMPOUND,
        cred: OpaqueAuth::none(),
        verf: OpaqueAuth::none(),
    };
    let record = call.encode(b"args");
    assert_eq!(peek_msg_type(&record), Some(MsgType::Call));
    assert_eq!(peek_xid(&record), Some(0x11223344));

    let (parsed, mut rest) = CallHeader::parse(record).expect("parse");
    assert_eq!(parsed.xid, 0x11223344);
    assert_eq!(parsed.prog, NFS_PROGRAM);
    assert_eq!(parsed.vers, NFS_VERSION);
    assert_eq!(parsed.proc, NFSPROC4_COMPOUND);
    assert_eq!(parsed.cred.flavor, 0);
    assert_eq!(rest.take_rest(), Bytes::from_static(b"args"));
}

#[test]
fn test_reply_round_trip() {
    let reply = encode_accepted_reply(7, AcceptStat::Success, b"body");
    assert_eq!(peek_msg_type(&reply), Some(MsgType::Reply));
    assert_eq!(peek_xid(&reply), Some(7));

    let (header, mut rest) = ReplyHeader::parse(reply).expect("parse");
    assert_eq!(header.xid, 7);
    assert_eq!(header.accept_stat, AcceptStat::Success as u32);
    assert_eq!(rest.take_rest(), Bytes::from_static(b"body"));
}

#[test]
fn test_reply_is_not_a_parsable_call() {
    let reply = encode_accepted_reply(9, AcceptStat::Success, b"");
    assert!(CallHeader::parse(reply).is_err());
}

#[test]
fn test_auth_sys_parms_round_trip() {
    let parms = AuthSysParms {
        stamp: 1,
        machinename: "client-a".to_string(),
        uid: 1000,
        gid: 100,
        gids: vec![100, 4],
    };
    let decoded = AuthSysParms::decode(parms.encode()).expect("decode");
    assert_eq!(decoded.machinename, "client-a");
    assert_eq!(decoded.uid, 1000);
    assert_eq!(decoded.gids, vec![100, 4]);
}

#[test]
fn test_runt_record_has_no_msg_type() {
    assert_eq!(peek_msg_type(&hex!("00000001")), None);
    assert_eq!(peek_xid(&hex!("0000")), None);
}
