// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # devlink - device connections behind one contract
//!
//! Serial ports, TCP clients, TCP servers and UDP sockets exposed through a
//! single [`Connection`] trait: open/close, byte-oriented send, background
//! receive, connection-status notification and, for TCP clients, automatic
//! reconnection with an optional heartbeat.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use devlink::{Connection, TcpClientConfig, TcpClientConnection};
//! use std::time::Duration;
//!
//! let link = TcpClientConnection::new(
//!     TcpClientConfig::new("192.168.1.50:502")
//!         .with_heartbeat(vec![0x00], Duration::from_secs(1)),
//! );
//!
//! link.on_status_changed(Box::new(|connected| println!("connected: {connected}")));
//! link.on_data_received(Box::new(|from: &str, bytes: &[u8]| {
//!     println!("{from}: {bytes:02x?}")
//! }));
//!
//! // Returns at once; the link connects (and reconnects) in the background.
//! assert!(link.open());
//! link.send(&[0x01, 0x03, 0x00, 0x00]);
//! link.close();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        Connection (trait)                           |
//! |   open | close | send | start_receive | state | address | stats     |
//! +---------------------------------------------------------------------+
//! |  Null  |  Serial   |  TcpClient            |  TcpServer    |  Udp   |
//! |        |  poll +   |  receive + reconnect  |  accept (mio) |  recv  |
//! |        |  read     |  heartbeat            |  sessions     |  filter|
//! |        |           |  LivenessProbe        |  broadcast    |        |
//! +---------------------------------------------------------------------+
//! |     EventHub: state cell, data observers, status dispatcher         |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Connection`] | The capability set every transport implements |
//! | [`LinkConfig`] | Construction-time choice of transport |
//! | [`EventHub`] | State cell plus observer lists |
//! | [`LivenessProbe`] | Reachability check used before reconnecting |
//! | [`LinkError`] | Configuration and open errors |
//!
//! ## Features
//!
//! - `config-files` - load a [`LinkConfig`] from TOML

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod metrics;
pub mod probe;
pub mod registry;
pub mod sync;
pub mod transport;

pub use config::{
    HeartbeatConfig, LinkConfig, Parity, SerialConfig, StopBits, TcpClientConfig,
    TcpServerConfig, UdpConfig,
};
pub use connection::Connection;
pub use error::{LinkError, Result};
pub use events::{ConnectionState, DataCallback, EventHub, StatusCallback, SubscriptionId};
pub use metrics::{LinkMetrics, LinkStatsSnapshot};
pub use probe::{AlwaysReachable, IcmpProbe, LivenessProbe, DEFAULT_PROBE_TIMEOUT};
pub use registry::{SessionHandle, SessionRegistry};
pub use transport::{
    NullConnection, SerialConnection, SerialDevice, SerialOpener, SystemSerialOpener,
    TcpClientConnection, TcpServerConnection, UdpConnection,
};
