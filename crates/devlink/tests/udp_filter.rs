// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! UDP: sender filtering, broadcast remotes, send / send_to.

mod common;

use common::{drain, init_logging, record_data};
use devlink::{Connection, UdpConfig, UdpConnection};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(3);

fn peer() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(TIMEOUT)).unwrap();
    socket
}

/// Loopback endpoint of the connection's bound socket.
fn loopback_of(conn: &UdpConnection) -> SocketAddr {
    let port = conn.local_addr().unwrap().port();
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[test]
fn test_datagrams_from_other_senders_are_dropped() {
    init_logging();
    let remote = peer();
    let stranger = peer();
    let conn = UdpConnection::new(UdpConfig::new(remote.local_addr().unwrap().to_string(), 0));
    let data = record_data(&conn);

    assert!(conn.open());
    let target = loopback_of(&conn);

    stranger.send_to(b"bad", target).unwrap();
    remote.send_to(b"good", target).unwrap();

    let received = drain(&data, Duration::from_millis(300));
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, remote.local_addr().unwrap().to_string());
    assert_eq!(received[0].1, b"good".to_vec());
    conn.close();
}

#[test]
fn test_broadcast_remote_hears_everyone() {
    init_logging();
    let a = peer();
    let b = peer();
    let conn = UdpConnection::new(UdpConfig::new("255.255.255.255:48555", 0));
    let data = record_data(&conn);

    assert!(conn.open());
    let target = loopback_of(&conn);
    a.send_to(b"a", target).unwrap();
    b.send_to(b"b", target).unwrap();

    let mut senders: Vec<String> = drain(&data, Duration::from_millis(300))
        .into_iter()
        .map(|(sender, _)| sender)
        .collect();
    senders.sort();
    let mut expected = vec![
        a.local_addr().unwrap().to_string(),
        b.local_addr().unwrap().to_string(),
    ];
    expected.sort();
    assert_eq!(senders, expected);
    conn.close();
}

#[test]
fn test_send_and_send_to() {
    init_logging();
    let remote = peer();
    let other = peer();
    let conn = UdpConnection::new(UdpConfig::new(remote.local_addr().unwrap().to_string(), 0));
    assert!(conn.open());

    assert!(conn.send(b"to-remote"));
    let mut buf = [0u8; 64];
    let (n, _) = remote.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"to-remote");

    assert!(conn.send_to(b"to-other", other.local_addr().unwrap()));
    let (n, _) = other.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"to-other");

    let stats = conn.stats();
    assert_eq!(stats.messages_sent, 2);
    conn.close();
    assert!(!conn.send(b"late"));
}
