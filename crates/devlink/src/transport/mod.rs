// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport variants behind the [`Connection`](crate::Connection) contract.
//!
//! | Variant                 | Address            | Background threads                   |
//! |-------------------------|--------------------|--------------------------------------|
//! | [`NullConnection`]      | `""`               | none                                 |
//! | [`SerialConnection`]    | port name          | receive                              |
//! | [`TcpClientConnection`] | remote endpoint    | receive + reconnect, heartbeat       |
//! | [`TcpServerConnection`] | bound endpoint     | accept, one per session, broadcast   |
//! | [`UdpConnection`]       | remote endpoint    | receive                              |

pub mod null;
pub mod serial;
pub mod tcp_client;
pub mod tcp_server;
pub mod udp;

pub use null::NullConnection;
pub use serial::{SerialConnection, SerialDevice, SerialOpener, SystemSerialOpener};
pub use tcp_client::TcpClientConnection;
pub use tcp_server::TcpServerConnection;
pub use udp::UdpConnection;

use crate::error::{LinkError, Result};
use std::net::{SocketAddr, ToSocketAddrs};

/// Resolve a `host:port` string to its first socket address.
pub(crate) fn resolve_endpoint(endpoint: &str) -> Result<SocketAddr> {
    let mut addrs = endpoint
        .to_socket_addrs()
        .map_err(|e| LinkError::invalid_address(endpoint, e))?;
    addrs
        .next()
        .ok_or_else(|| LinkError::invalid_address(endpoint, "no address resolved"))
}
