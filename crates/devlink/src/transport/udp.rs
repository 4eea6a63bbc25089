// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP transport.
//!
//! A bound datagram socket paired with one configured remote endpoint:
//! - datagrams from any other sender are dropped, unless the remote is the
//!   IPv4 broadcast address, in which case everyone is heard
//! - `send` targets the remote; `send_to` targets any endpoint
//! - the state is Connected from `open()` until `close()`, since there is
//!   no session to lose

use crate::config::UdpConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::events::EventHub;
use crate::metrics::{LinkMetrics, LinkStatsSnapshot};
use crate::sync::{Worker, SHUTDOWN_GRACE};
use crate::transport::resolve_endpoint;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const TAG: &str = "UDP";

struct UdpShared {
    config: UdpConfig,
    events: EventHub,
    metrics: LinkMetrics,
    running: AtomicBool,
    generation: AtomicU64,
    remote: Mutex<Option<SocketAddr>>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    receiver: Mutex<Option<Worker>>,
}

/// Datagram connection to one remote endpoint.
pub struct UdpConnection {
    inner: Arc<UdpShared>,
}

/// Whether a datagram from `from` is meant for a link to `remote`.
fn accepts_sender(remote: SocketAddr, from: SocketAddr) -> bool {
    is_broadcast(remote) || from == remote
}

fn is_broadcast(addr: SocketAddr) -> bool {
    addr.ip() == IpAddr::V4(Ipv4Addr::BROADCAST)
}

fn bind_socket(config: &UdpConfig, remote: SocketAddr) -> io::Result<UdpSocket> {
    let unspecified = match remote.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let socket = Socket::new(Domain::for_address(remote), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if is_broadcast(remote) {
        socket.set_broadcast(true)?;
    }
    socket.bind(&SocketAddr::new(unspecified, config.local_port).into())?;
    socket.set_read_timeout(Some(config.read_timeout))?;
    Ok(socket.into())
}

impl UdpConnection {
    pub fn new(config: UdpConfig) -> Self {
        Self {
            inner: Arc::new(UdpShared {
                config,
                events: EventHub::new(TAG),
                metrics: LinkMetrics::new(),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                remote: Mutex::new(None),
                socket: Mutex::new(None),
                receiver: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &UdpConfig {
        &self.inner.config
    }

    /// Bound local endpoint, while open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .socket
            .lock()
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    /// Send one datagram to an arbitrary endpoint.
    pub fn send_to(&self, payload: &[u8], target: SocketAddr) -> bool {
        self.inner.send_datagram(payload, target)
    }

    fn try_open(&self) -> Result<SocketAddr> {
        let inner = &self.inner;
        inner.config.validate()?;
        let remote = resolve_endpoint(&inner.config.remote)?;
        let socket = bind_socket(&inner.config, remote)?;
        let local = socket.local_addr()?;

        *inner.remote.lock() = Some(remote);
        *inner.socket.lock() = Some(Arc::new(socket));
        inner.generation.fetch_add(1, Ordering::AcqRel);
        inner.running.store(true, Ordering::Release);
        inner.events.set_connected(true);
        Ok(local)
    }
}

impl UdpShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::Acquire) == generation
    }

    fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> bool {
        if !self.is_running() {
            return false;
        }
        let socket = self.socket.lock();
        let Some(socket) = socket.as_ref() else {
            return false;
        };
        match socket.send_to(payload, target) {
            Ok(n) => {
                self.metrics.record_sent(n);
                true
            }
            Err(e) => {
                log::warn!("[{}] send to {} failed: {}", TAG, target, e);
                self.metrics.record_send_failure();
                false
            }
        }
    }

    fn receive_loop(&self, socket: Arc<UdpSocket>, remote: SocketAddr, generation: u64) {
        let mut buf = vec![0u8; self.config.receive_buffer_size];
        log::debug!("[{}] receive loop started for {}", TAG, remote);

        while self.is_current(generation) {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if !accepts_sender(remote, from) {
                        log::trace!("[{}] dropping {} bytes from {}", TAG, n, from);
                        continue;
                    }
                    log::trace!("[{}] {} bytes from {}", TAG, n, from);
                    self.metrics.record_received(n);
                    self.events.dispatch_data(&from.to_string(), &buf[..n]);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                // ICMP port-unreachable for an earlier send surfaces here on some stacks.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    log::debug!("[{}] {} reported unreachable: {}", TAG, remote, e);
                }
                Err(e) => {
                    if self.is_current(generation) {
                        log::warn!("[{}] receive failed: {}", TAG, e);
                        self.metrics.record_recv_error();
                        self.events.set_connected(false);
                    }
                    break;
                }
            }
        }

        log::debug!("[{}] receive loop exited for {}", TAG, remote);
    }
}

impl Connection for UdpConnection {
    fn address(&self) -> String {
        self.inner.config.remote.clone()
    }

    fn open(&self) -> bool {
        self.close();
        match self.try_open() {
            Ok(local) => {
                log::info!(
                    "[{}] bound {} for remote {}",
                    TAG,
                    local,
                    self.inner.config.remote
                );
                self.start_receive();
                true
            }
            Err(e) => {
                log::warn!("[{}] cannot open: {}", TAG, e);
                false
            }
        }
    }

    fn close(&self) {
        let inner = &self.inner;
        let was_running = inner.running.swap(false, Ordering::AcqRel);
        inner.socket.lock().take();

        // The read timeout bounds how long the loop takes to notice.
        let receiver = inner.receiver.lock().take();
        if let Some(worker) = receiver {
            worker.stop(SHUTDOWN_GRACE);
        }

        inner.events.set_connected(false);
        if was_running {
            log::info!("[{}] link to {} closed", TAG, inner.config.remote);
        }
    }

    fn send(&self, payload: &[u8]) -> bool {
        let Some(remote) = *self.inner.remote.lock() else {
            return false;
        };
        self.inner.send_datagram(payload, remote)
    }

    fn start_receive(&self) {
        let inner = &self.inner;
        if !inner.is_running() {
            return;
        }
        let Some(remote) = *inner.remote.lock() else {
            return;
        };
        let Some(socket) = inner.socket.lock().clone() else {
            return;
        };

        let mut slot = inner.receiver.lock();
        if slot.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }

        let generation = inner.generation.load(Ordering::Acquire);
        let shared = Arc::clone(inner);
        match Worker::spawn("devlink-udp-rx", move || {
            shared.receive_loop(socket, remote, generation);
        }) {
            Ok(worker) => *slot = Some(worker),
            Err(e) => log::warn!("[{}] failed to spawn receive loop: {}", TAG, e),
        }
    }

    fn events(&self) -> &EventHub {
        &self.inner.events
    }

    fn stats(&self) -> LinkStatsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl Drop for UdpConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for UdpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpConnection")
            .field("remote", &self.inner.config.remote)
            .field("local", &self.local_addr())
            .field("state", &self.inner.events.state())
            .finish()
    }
}
