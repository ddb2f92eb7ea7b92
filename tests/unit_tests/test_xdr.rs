// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use hex_literal::hex;
use nfs41_server_rs::models::xdr::{XdrError, XdrReader, XdrWriter};

#[test]
fn test_primitives_round_trip() {
    let mut w = XdrWriter::new();
    w.u32(0xdead_beef);
    w.u64(0x0123_4567_89ab_cdef);
    w.bool(true);
    w.bool(false);
    w.i64(-42);

    let mut r = XdrReader::new(w.into_bytes());
    assert_eq!(r.u32().expect("u32"), 0xdead_beef);
    assert_eq!(r.u64().expect("u64"), 0x0123_4567_89ab_cdef);
    assert!(r.bool().expect("bool"));
    assert!(!r.bool().expect("bool"));
    assert_eq!(r.i64().expect("i64"), -42);
    assert_eq!(r.remaining(), 0);
}

#[test]
fn test_opaque_var_pads_to_four() {
    let mut w = XdrWriter::new();
    w.opaque_var(b"abcde");
    let bytes = w.into_bytes();
    // 4 length bytes + 5 payload + 3 pad.
    assert_eq!(bytes.len(), 12);
    assert_eq!(&bytes[..], &hex!("00000005 6162636465 000000")[..]);

    let mut r = XdrReader::new(bytes);
    assert_eq!(r.opaque_var(16).expect("opaque"), Bytes::from_static(b"abcde"));
    assert_eq!(r.remaining(), 0);
}

#[test]
fn test_string_round_trip() {
    let mut w = XdrWriter::new();
    w.string("nfs41");
    let mut r = XdrReader::new(w.into_bytes());
    assert_eq!(r.string(64).expect("string"), "nfs41");
}

#[test]
fn test_truncated_read_is_an_error() {
    let mut r = XdrReader::new(Bytes::from_static(&[0, 0]));
    match r.u32() {
        Err(XdrError::Truncated { need: 4, have: 2 }) => {},
        other => panic!("expected truncation, got {other:?}"),
    }
}

#[test]
fn test_opaque_over_limit_is_an_error() {
    let mut w = XdrWriter::new();
    w.opaque_var(&[0u8; 32]);
    let mut r = XdrReader::new(w.into_bytes());
    assert!(matches!(
        r.opaque_var(16),
        Err(XdrError::TooLong { len: 32, limit: 16 })
    ));
}

#[test]
fn test_strict_booleans() {
    let mut w = XdrWriter::new();
    w.u32(2);
    let mut r = XdrReader::new(w.into_bytes());
    assert!(matches!(r.bool(), Err(XdrError::InvalidBool(2))));
}

#[test]
fn test_take_rest_consumes_everything() {
    let mut r = XdrReader::new(Bytes::from_static(b"abcd1234"));
    assert_eq!(r.u32().expect("u32"), u32::from_be_bytes(*b"abcd"));
    assert_eq!(r.take_rest(), Bytes::from_static(b"1234"));
    assert_eq!(r.remaining(), 0);
}
