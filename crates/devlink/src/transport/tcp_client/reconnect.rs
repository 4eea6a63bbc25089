// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconnect supervisor.
//!
//! Runs on the receive thread whenever no stream is installed:
//!
//! ```text
//!   drop stale stream (Disconnected)
//!   loop while running:
//!     attempt += 1
//!     probe(remote.ip)  --unreachable-->  wait interval
//!     connect(remote)   --failed------->  wait interval
//!     install stream, Connected, return reader
//! ```
//!
//! The wait is a [`Signal`](crate::sync::Signal), so `close()` ends it
//! immediately. Attempts are unbounded.

use super::{ClientShared, TAG};
use crate::config::TcpClientConfig;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream};

impl ClientShared {
    /// Block until connected or stopped. Returns the read side of the new
    /// connection, or `None` once the session is over.
    pub(super) fn reconnect(&self, remote: SocketAddr, generation: u64) -> Option<TcpStream> {
        self.drop_connection();

        while self.is_current(generation) {
            let attempt = self.metrics.record_connect_attempt();

            if !self.probe.is_reachable(remote.ip()) {
                log::debug!("[{}] {} unreachable (attempt {})", TAG, remote, attempt);
            } else {
                match connect_once(&self.config, remote) {
                    Ok(stream) => {
                        if let Some(reader) = self.install(stream, remote, generation) {
                            return Some(reader);
                        }
                    }
                    Err(e) => {
                        log::debug!(
                            "[{}] connect to {} failed (attempt {}): {}",
                            TAG,
                            remote,
                            attempt,
                            e
                        );
                    }
                }
            }

            let interval = *self.reconnect_interval.lock();
            self.reconnect_wake.wait_timeout(interval);
        }
        None
    }

    /// Publish a freshly connected stream and flip to Connected.
    ///
    /// The running check and the install happen under the stream lock, so
    /// a concurrent `close()` either sees the stream and shuts it down, or
    /// this call sees the cleared flag and discards it.
    fn install(&self, stream: TcpStream, remote: SocketAddr, generation: u64) -> Option<TcpStream> {
        let reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(e) => {
                log::warn!("[{}] cannot clone stream to {}: {}", TAG, remote, e);
                let _ = stream.shutdown(Shutdown::Both);
                return None;
            }
        };

        let mut slot = self.stream.lock();
        if !self.is_current(generation) {
            let _ = stream.shutdown(Shutdown::Both);
            return None;
        }
        *slot = Some(stream);
        self.metrics.record_connection_established();
        self.events.set_connected(true);
        drop(slot);

        log::info!("[{}] connected to {}", TAG, remote);
        Some(reader)
    }
}

/// One connect attempt on a fresh socket.
fn connect_once(config: &TcpClientConfig, remote: SocketAddr) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(remote), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;

    if config.local_port != 0 {
        let unspecified = match remote.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        socket.bind(&SocketAddr::new(unspecified, config.local_port).into())?;
    }

    socket.connect_timeout(&remote.into(), config.connect_timeout)?;
    socket.set_nodelay(config.nodelay)?;
    socket.set_write_timeout(Some(config.send_timeout))?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    #[test]
    fn test_connect_once_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = TcpClientConfig::new(addr.to_string());

        let stream = connect_once(&config, addr).unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        assert!(stream.nodelay().unwrap());
        assert_eq!(stream.write_timeout().unwrap(), Some(config.send_timeout));
    }

    #[test]
    fn test_connect_once_refused() {
        // Bind then drop to get a port with no listener.
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let config =
            TcpClientConfig::new(addr.to_string()).with_connect_timeout(Duration::from_millis(500));
        assert!(connect_once(&config, addr).is_err());
    }
}
