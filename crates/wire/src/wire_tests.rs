// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::Request;

#[test]
fn encode_prefixes_big_endian_length() {
    let frame = encode(&Request::Ping).unwrap();
    let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
    assert_eq!(len as usize, frame.len() - 4);

    let decoded: Request = decode(&frame[4..]).unwrap();
    assert_eq!(decoded, Request::Ping);
}

#[tokio::test]
async fn read_write_round_trip_over_a_duplex_pipe() {
    let (mut client, mut server) = tokio::io::duplex(1024);

    let sent = Request::Hello { version: "0.2.0".into() };
    write_message(&mut client, &sent).await.unwrap();

    let received: Request = read_message(&mut server).await.unwrap();
    assert_eq!(received, sent);
}

#[tokio::test]
async fn clean_eof_reports_closed() {
    let (client, mut server) = tokio::io::duplex(64);
    drop(client);

    let result: Result<Request, ProtocolError> = read_message(&mut server).await;
    assert!(matches!(result, Err(ProtocolError::Closed)));
}

#[tokio::test]
async fn oversized_frame_is_refused() {
    let (mut client, mut server) = tokio::io::duplex(64);
    let bogus = (MAX_FRAME_BYTES + 1).to_be_bytes();
    tokio::io::AsyncWriteExt::write_all(&mut client, &bogus).await.unwrap();

    let result: Result<Request, ProtocolError> = read_message(&mut server).await;
    assert!(matches!(result, Err(ProtocolError::FrameTooLarge(_))));
}
