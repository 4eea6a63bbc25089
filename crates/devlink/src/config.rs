// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport configuration.
//!
//! Provides one configuration struct per transport plus [`LinkConfig`],
//! the construction-time choice between them:
//! - [`SerialConfig`] - port name, line settings, poll interval
//! - [`TcpClientConfig`] - remote endpoint, reconnect and heartbeat policy
//! - [`TcpServerConfig`] - listen endpoint and session socket options
//! - [`UdpConfig`] - remote endpoint and local port
//!
//! With the `config-files` feature, a [`LinkConfig`] can be loaded from TOML:
//!
//! ```toml
//! transport = "tcp-client"
//! remote = "192.168.1.50:502"
//! reconnect_interval = 3000   # milliseconds
//!
//! [heartbeat]
//! enabled = true
//! payload = [0xAA, 0x55]
//! interval = 1000
//! ```
//!
//! # Example
//!
//! ```
//! use devlink::TcpClientConfig;
//! use std::time::Duration;
//!
//! let config = TcpClientConfig::new("127.0.0.1:9000")
//!     .with_reconnect_interval(Duration::from_millis(500))
//!     .with_heartbeat(vec![0x00], Duration::from_secs(1));
//! assert!(config.validate().is_ok());
//! ```

use crate::connection::Connection;
use crate::error::{LinkError, Result};
use crate::transport::{
    NullConnection, SerialConnection, TcpClientConnection, TcpServerConnection, UdpConnection,
};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

#[cfg(feature = "config-files")]
use serde::{Deserialize, Serialize};

/// Default application receive buffer, per read.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 1024;

// ============================================================================
// Serial
// ============================================================================

/// Serial parity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config-files", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-files", serde(rename_all = "lowercase"))]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial stop bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config-files", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-files", serde(rename_all = "lowercase"))]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Serial port configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config-files", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-files", serde(default))]
pub struct SerialConfig {
    /// Device name (`/dev/ttyUSB0`, `COM3`); also the connection address
    pub port_name: String,

    pub baud_rate: u32,

    pub parity: Parity,

    /// Data bits per character (5-8)
    pub data_bits: u8,

    pub stop_bits: StopBits,

    /// Upper bound for a single read
    pub receive_buffer_size: usize,

    /// Sleep between "bytes available" polls when the port is idle
    #[cfg_attr(feature = "config-files", serde(with = "duration_ms"))]
    pub poll_interval: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 9600,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: StopBits::One,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl SerialConfig {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.port_name.trim().is_empty() {
            return Err(LinkError::InvalidConfig("port_name must not be empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(LinkError::InvalidConfig("baud_rate must be > 0".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(LinkError::InvalidConfig(format!(
                "data_bits must be 5-8, got {}",
                self.data_bits
            )));
        }
        if self.receive_buffer_size == 0 {
            return Err(LinkError::InvalidConfig("receive_buffer_size must be > 0".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(LinkError::InvalidConfig("poll_interval must be > 0".into()));
        }
        Ok(())
    }
}

// ============================================================================
// TCP client
// ============================================================================

/// Keep-alive payload sent periodically by a TCP client.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config-files", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-files", serde(default))]
pub struct HeartbeatConfig {
    pub enabled: bool,

    /// Bytes sent on every tick (may be empty)
    pub payload: Vec<u8>,

    #[cfg_attr(feature = "config-files", serde(with = "duration_ms"))]
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            payload: Vec::new(),
            interval: Duration::from_millis(1000),
        }
    }
}

/// TCP client configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config-files", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-files", serde(default))]
pub struct TcpClientConfig {
    /// Remote endpoint (`host:port`); also the connection address
    pub remote: String,

    /// Local port to bind before connecting (0 = ephemeral)
    pub local_port: u16,

    /// Wait between reconnect attempts
    #[cfg_attr(feature = "config-files", serde(with = "duration_ms"))]
    pub reconnect_interval: Duration,

    #[cfg_attr(feature = "config-files", serde(with = "duration_ms"))]
    pub connect_timeout: Duration,

    /// Socket write timeout
    #[cfg_attr(feature = "config-files", serde(with = "duration_ms"))]
    pub send_timeout: Duration,

    pub receive_buffer_size: usize,

    /// Enable TCP_NODELAY
    pub nodelay: bool,

    pub heartbeat: HeartbeatConfig,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self {
            remote: String::new(),
            local_port: 0,
            reconnect_interval: Duration::from_millis(3000),
            connect_timeout: Duration::from_secs(3),
            send_timeout: Duration::from_secs(3),
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            nodelay: true,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl TcpClientConfig {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            ..Default::default()
        }
    }

    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable the heartbeat with the given payload and interval.
    pub fn with_heartbeat(mut self, payload: Vec<u8>, interval: Duration) -> Self {
        self.heartbeat = HeartbeatConfig {
            enabled: true,
            payload,
            interval,
        };
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote.trim().is_empty() {
            return Err(LinkError::InvalidConfig("remote must not be empty".into()));
        }
        if self.reconnect_interval.is_zero() {
            return Err(LinkError::InvalidConfig("reconnect_interval must be > 0".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(LinkError::InvalidConfig("connect_timeout must be > 0".into()));
        }
        if self.send_timeout.is_zero() {
            return Err(LinkError::InvalidConfig("send_timeout must be > 0".into()));
        }
        if self.receive_buffer_size == 0 {
            return Err(LinkError::InvalidConfig("receive_buffer_size must be > 0".into()));
        }
        if self.heartbeat.enabled && self.heartbeat.interval.is_zero() {
            return Err(LinkError::InvalidConfig("heartbeat.interval must be > 0".into()));
        }
        Ok(())
    }
}

// ============================================================================
// TCP server
// ============================================================================

/// TCP server configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config-files", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-files", serde(default))]
pub struct TcpServerConfig {
    /// Address to bind (0.0.0.0 = all interfaces)
    pub listen_address: IpAddr,

    /// Listen port (0 = ephemeral, see `TcpServerConnection::address`)
    pub listen_port: u16,

    /// Pending connection queue size
    pub backlog: i32,

    pub receive_buffer_size: usize,

    /// Per-session write timeout, so one stalled peer cannot hold up a broadcast
    #[cfg_attr(feature = "config-files", serde(with = "duration_ms"))]
    pub send_timeout: Duration,

    pub nodelay: bool,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: 0,
            backlog: 100,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            send_timeout: Duration::from_secs(3),
            nodelay: true,
        }
    }
}

impl TcpServerConfig {
    pub fn new(listen_port: u16) -> Self {
        Self {
            listen_port,
            ..Default::default()
        }
    }

    pub fn with_listen_address(mut self, addr: IpAddr) -> Self {
        self.listen_address = addr;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.backlog <= 0 {
            return Err(LinkError::InvalidConfig("backlog must be > 0".into()));
        }
        if self.send_timeout.is_zero() {
            return Err(LinkError::InvalidConfig("send_timeout must be > 0".into()));
        }
        if self.receive_buffer_size == 0 {
            return Err(LinkError::InvalidConfig("receive_buffer_size must be > 0".into()));
        }
        Ok(())
    }
}

// ============================================================================
// UDP
// ============================================================================

/// UDP configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config-files", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-files", serde(default))]
pub struct UdpConfig {
    /// Remote endpoint; `255.255.255.255:port` accepts datagrams from anyone
    pub remote: String,

    /// Local port to bind (0 = ephemeral)
    pub local_port: u16,

    /// Largest datagram delivered in one notification
    pub receive_buffer_size: usize,

    /// Receive timeout used to re-check the running flag
    #[cfg_attr(feature = "config-files", serde(with = "duration_ms"))]
    pub read_timeout: Duration,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            remote: String::new(),
            local_port: 0,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            read_timeout: Duration::from_millis(100),
        }
    }
}

impl UdpConfig {
    pub fn new(remote: impl Into<String>, local_port: u16) -> Self {
        Self {
            remote: remote.into(),
            local_port,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote.trim().is_empty() {
            return Err(LinkError::InvalidConfig("remote must not be empty".into()));
        }
        if self.receive_buffer_size == 0 {
            return Err(LinkError::InvalidConfig("receive_buffer_size must be > 0".into()));
        }
        if self.read_timeout.is_zero() {
            return Err(LinkError::InvalidConfig("read_timeout must be > 0".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Link selection
// ============================================================================

/// Construction-time choice of transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config-files", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "config-files",
    serde(tag = "transport", rename_all = "kebab-case")
)]
pub enum LinkConfig {
    #[default]
    Null,
    Serial(SerialConfig),
    TcpClient(TcpClientConfig),
    TcpServer(TcpServerConfig),
    Udp(UdpConfig),
}

impl LinkConfig {
    /// Short transport name, as used in config files.
    pub fn kind(&self) -> &'static str {
        match self {
            LinkConfig::Null => "null",
            LinkConfig::Serial(_) => "serial",
            LinkConfig::TcpClient(_) => "tcp-client",
            LinkConfig::TcpServer(_) => "tcp-server",
            LinkConfig::Udp(_) => "udp",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            LinkConfig::Null => Ok(()),
            LinkConfig::Serial(c) => c.validate(),
            LinkConfig::TcpClient(c) => c.validate(),
            LinkConfig::TcpServer(c) => c.validate(),
            LinkConfig::Udp(c) => c.validate(),
        }
    }

    /// Create the (unopened) connection.
    pub fn build(self) -> Box<dyn Connection> {
        match self {
            LinkConfig::Null => Box::new(NullConnection::new()),
            LinkConfig::Serial(c) => Box::new(SerialConnection::new(c)),
            LinkConfig::TcpClient(c) => Box::new(TcpClientConnection::new(c)),
            LinkConfig::TcpServer(c) => Box::new(TcpServerConnection::new(c)),
            LinkConfig::Udp(c) => Box::new(UdpConnection::new(c)),
        }
    }

    /// Parse a link description from TOML.
    #[cfg(feature = "config-files")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: LinkConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a link description from a TOML file.
    #[cfg(feature = "config-files")]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// Durations as integer milliseconds in config files.
#[cfg(feature = "config-files")]
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
