// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Behaviour every transport shares through the `Connection` trait.

mod common;

use common::{drain, init_logging, record_data, record_status};
use devlink::{
    AlwaysReachable, Connection, LinkConfig, NullConnection, SerialConfig, SerialConnection,
    SerialDevice, TcpClientConfig, TcpClientConnection, TcpServerConfig, UdpConfig,
};
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Device that never has data and swallows writes.
struct IdleDevice;

impl SerialDevice for IdleDevice {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(0)
    }

    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }

    fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

fn idle_serial() -> SerialConnection {
    SerialConnection::with_opener(
        SerialConfig::new("ttyIDLE", 9600),
        |_config: &SerialConfig| -> devlink::Result<Box<dyn SerialDevice>> {
            Ok(Box::new(IdleDevice))
        },
    )
}

fn all_transports() -> Vec<Box<dyn Connection>> {
    vec![
        Box::new(NullConnection::new()),
        Box::new(idle_serial()),
        Box::new(TcpClientConnection::with_probe(
            TcpClientConfig::new("127.0.0.1:9"),
            AlwaysReachable,
        )),
        LinkConfig::TcpServer(
            TcpServerConfig::new(0).with_listen_address(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        )
        .build(),
        LinkConfig::Udp(UdpConfig::new("127.0.0.1:9", 0)).build(),
    ]
}

#[test]
fn test_send_before_open_is_rejected_everywhere() {
    init_logging();
    for conn in all_transports() {
        let data = record_data(conn.as_ref());
        assert!(!conn.send(b"early"), "{:?} accepted a send before open", conn);
        assert!(!conn.is_connected());
        assert!(drain(&data, Duration::from_millis(20)).is_empty());
    }
}

#[test]
fn test_close_is_idempotent_and_safe_before_open() {
    init_logging();
    for conn in all_transports() {
        conn.close();
        conn.close();
        assert!(!conn.is_connected(), "{:?}", conn);
    }
}

#[test]
fn test_status_notifications_match_flips() {
    init_logging();
    let conn = idle_serial();
    let status = record_status(&conn);

    for _ in 0..3 {
        assert!(conn.open());
        // Reopening an open link closes it first: one flip down, one up.
        assert!(conn.open());
        conn.close();
        conn.close();
    }

    let seen = drain(&status, Duration::from_millis(300));
    assert_eq!(seen, [true, false, true, false].repeat(3));
}

#[test]
fn test_unsubscribe_stops_notifications() {
    init_logging();
    let conn = idle_serial();
    let status = record_status(&conn);
    let id = conn.on_status_changed(Box::new(|_| {}));
    assert!(conn.unsubscribe(id));
    assert!(!conn.unsubscribe(id));
    assert_eq!(conn.events().observer_count(), (0, 1));

    assert!(conn.open());
    conn.close();
    assert_eq!(drain(&status, Duration::from_millis(300)), vec![true, false]);
}

#[test]
fn test_addresses() {
    let null = NullConnection::new();
    assert_eq!(null.address(), "");
    assert_eq!(idle_serial().address(), "ttyIDLE");
    let udp = LinkConfig::Udp(UdpConfig::new("127.0.0.1:7777", 0)).build();
    assert_eq!(udp.address(), "127.0.0.1:7777");
    let server = LinkConfig::TcpServer(TcpServerConfig::new(5050)).build();
    assert_eq!(server.address(), "0.0.0.0:5050");
}
