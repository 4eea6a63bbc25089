// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Self-healing TCP client transport.
//!
//! # State machine
//!
//! ```text
//!              open()
//!                |
//!                v
//!   +---------------------+   probe ok + connect ok   +-----------+
//!   |    Disconnected     | ------------------------> | Connected |
//!   | (reconnect loop:    | <------------------------ |           |
//!   |  probe, connect,    |   read 0 / read error /   +-----------+
//!   |  wait interval)     |   write error
//!   +---------------------+
//!                |  close() from any state
//!                v
//!             stopped
//! ```
//!
//! One receive thread runs the reconnect supervisor inline whenever no
//! stream is installed, then blocks in `read` on its own clone of the
//! stream. Writes go through the shared stream under a mutex. The optional
//! heartbeat thread periodically sends a fixed payload through the same
//! path.
//!
//! `close()` wakes the reconnect and heartbeat waits, shuts the socket down
//! (aborting a blocked read) and waits at most [`SHUTDOWN_GRACE`] for each
//! loop.

mod heartbeat;
mod reconnect;

use crate::config::{HeartbeatConfig, TcpClientConfig};
use crate::connection::Connection;
use crate::events::EventHub;
use crate::metrics::{LinkMetrics, LinkStatsSnapshot};
use crate::probe::{IcmpProbe, LivenessProbe};
use crate::sync::{Signal, Worker, SHUTDOWN_GRACE};
use crate::transport::resolve_endpoint;
use heartbeat::HeartbeatState;
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TAG: &str = "TCP-CLIENT";

struct ClientShared {
    config: TcpClientConfig,
    events: EventHub,
    metrics: LinkMetrics,
    probe: Box<dyn LivenessProbe>,

    running: AtomicBool,

    /// Bumped by every open(); loops from an earlier session stop once it moves
    generation: AtomicU64,

    /// Resolved remote endpoint of the current session
    remote: Mutex<Option<SocketAddr>>,

    /// Write side of the live connection (the receive loop reads a clone)
    stream: Mutex<Option<TcpStream>>,

    reconnect_interval: Mutex<Duration>,
    reconnect_wake: Signal,

    heartbeat: Mutex<HeartbeatState>,
    heartbeat_wake: Signal,

    receiver: Mutex<Option<Worker>>,
    heartbeat_worker: Mutex<Option<Worker>>,
}

/// TCP client with automatic reconnection and an optional heartbeat.
pub struct TcpClientConnection {
    inner: Arc<ClientShared>,
}

impl TcpClientConnection {
    /// Client using the ICMP echo probe.
    pub fn new(config: TcpClientConfig) -> Self {
        Self::with_probe(config, IcmpProbe::default())
    }

    /// Client with a custom liveness probe.
    pub fn with_probe(config: TcpClientConfig, probe: impl LivenessProbe + 'static) -> Self {
        let reconnect_interval = config.reconnect_interval;
        let heartbeat = HeartbeatState::new(config.heartbeat.clone());
        Self {
            inner: Arc::new(ClientShared {
                config,
                events: EventHub::new(TAG),
                metrics: LinkMetrics::new(),
                probe: Box::new(probe),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                remote: Mutex::new(None),
                stream: Mutex::new(None),
                reconnect_interval: Mutex::new(reconnect_interval),
                reconnect_wake: Signal::new(),
                heartbeat: Mutex::new(heartbeat),
                heartbeat_wake: Signal::new(),
                receiver: Mutex::new(None),
                heartbeat_worker: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &TcpClientConfig {
        &self.inner.config
    }

    /// Connect attempts made since construction.
    pub fn reconnect_attempts(&self) -> u64 {
        self.inner.metrics.connect_attempts()
    }

    pub fn reconnect_interval(&self) -> Duration {
        *self.inner.reconnect_interval.lock()
    }

    /// Change the wait between connect attempts. Takes effect from the next
    /// wait. Zero is rejected.
    pub fn set_reconnect_interval(&self, interval: Duration) -> bool {
        if interval.is_zero() {
            log::warn!("[{}] ignoring zero reconnect interval", TAG);
            return false;
        }
        *self.inner.reconnect_interval.lock() = interval;
        true
    }

    /// Current heartbeat settings.
    pub fn heartbeat(&self) -> HeartbeatConfig {
        self.inner.heartbeat.lock().config.clone()
    }

    /// Enable, disable or reconfigure the heartbeat.
    ///
    /// Enabling starts the heartbeat thread if the connection is open.
    /// Returns `false` if `enabled` is set with a zero interval.
    pub fn set_heartbeat(&self, enabled: bool, payload: Vec<u8>, interval: Duration) -> bool {
        if enabled && interval.is_zero() {
            log::warn!("[{}] ignoring heartbeat with zero interval", TAG);
            return false;
        }
        self.inner.heartbeat.lock().config = HeartbeatConfig {
            enabled,
            payload,
            interval,
        };
        if enabled {
            self.inner.start_heartbeat();
        } else {
            self.inner.heartbeat_wake.set();
        }
        true
    }
}

#[cfg(test)]
impl TcpClientConnection {
    /// Mark the link open with `stream` installed and no receive loop.
    fn open_with_stream(config: TcpClientConfig, stream: TcpStream) -> Self {
        let conn = Self::with_probe(config, crate::probe::AlwaysReachable);
        conn.inner.running.store(true, Ordering::Release);
        *conn.inner.stream.lock() = Some(stream);
        conn.inner.events.set_connected(true);
        conn
    }
}

impl ClientShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether a loop started for `generation` should keep going.
    fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::Acquire) == generation
    }

    /// Shut down and forget the live stream, if any.
    fn drop_connection(&self) {
        let stale = self.stream.lock().take();
        if let Some(stream) = stale {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                log::debug!("[{}] shutdown of stale stream: {}", TAG, e);
            }
        }
        self.events.set_connected(false);
    }

    fn send(&self, payload: &[u8]) -> bool {
        if !self.is_running() {
            return false;
        }

        let mut slot = self.stream.lock();
        let Some(stream) = slot.as_mut() else {
            return false;
        };
        match stream.write_all(payload) {
            Ok(()) => {
                self.metrics.record_sent(payload.len());
                true
            }
            Err(e) => {
                log::warn!("[{}] write to {} failed: {}", TAG, self.config.remote, e);
                self.metrics.record_send_failure();
                if let Some(stream) = slot.take() {
                    let _ = stream.shutdown(Shutdown::Both);
                }
                drop(slot);
                self.events.set_connected(false);
                false
            }
        }
    }

    fn receive_loop(&self, remote: SocketAddr, generation: u64) {
        let mut buf = vec![0u8; self.config.receive_buffer_size];
        let mut reader: Option<TcpStream> = None;
        log::debug!("[{}] receive loop started for {}", TAG, remote);

        while self.is_current(generation) {
            if reader.is_none() {
                match self.reconnect(remote, generation) {
                    Some(stream) => reader = Some(stream),
                    None => break,
                }
                continue;
            }
            let Some(stream) = reader.as_mut() else {
                continue;
            };

            match stream.read(&mut buf) {
                Ok(0) => {
                    if self.is_current(generation) {
                        log::info!("[{}] {} closed the connection", TAG, remote);
                    }
                    reader = None;
                    self.drop_connection();
                }
                Ok(n) => {
                    log::trace!("[{}] {} bytes from {}", TAG, n, remote);
                    self.metrics.record_received(n);
                    self.events.dispatch_data(&self.config.remote, &buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    if self.is_current(generation) {
                        log::warn!("[{}] read from {} failed: {}", TAG, remote, e);
                        self.metrics.record_recv_error();
                    }
                    reader = None;
                    self.drop_connection();
                }
            }
        }

        log::debug!("[{}] receive loop exited for {}", TAG, remote);
    }
}

impl Connection for TcpClientConnection {
    fn address(&self) -> String {
        self.inner.config.remote.clone()
    }

    /// Starts the reconnect loop and returns without waiting for the
    /// connection: the state flips to Connected once the remote answers.
    fn open(&self) -> bool {
        self.close();

        let inner = &self.inner;
        if let Err(e) = inner.config.validate() {
            log::warn!("[{}] cannot open: {}", TAG, e);
            return false;
        }
        let remote = match resolve_endpoint(&inner.config.remote) {
            Ok(remote) => remote,
            Err(e) => {
                log::warn!("[{}] cannot open: {}", TAG, e);
                return false;
            }
        };

        *inner.remote.lock() = Some(remote);
        inner.generation.fetch_add(1, Ordering::AcqRel);
        inner.reconnect_wake.reset();
        inner.heartbeat_wake.reset();
        inner.running.store(true, Ordering::Release);
        log::info!("[{}] opening link to {}", TAG, remote);

        self.start_receive();
        if inner.heartbeat.lock().config.enabled {
            inner.start_heartbeat();
        }
        true
    }

    fn close(&self) {
        let inner = &self.inner;
        let was_running = inner.running.swap(false, Ordering::AcqRel);
        inner.reconnect_wake.set();
        inner.heartbeat_wake.set();

        // Aborts the blocking read in the receive loop.
        let stream = inner.stream.lock().take();
        if let Some(stream) = stream {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                log::debug!("[{}] shutdown on close: {}", TAG, e);
            }
        }

        let receiver = inner.receiver.lock().take();
        if let Some(worker) = receiver {
            worker.stop(SHUTDOWN_GRACE);
        }
        let heartbeat = inner.heartbeat_worker.lock().take();
        if let Some(worker) = heartbeat {
            worker.stop(SHUTDOWN_GRACE);
        }

        inner.events.set_connected(false);
        if was_running {
            log::info!("[{}] link to {} closed", TAG, inner.config.remote);
        }
    }

    fn send(&self, payload: &[u8]) -> bool {
        self.inner.send(payload)
    }

    fn start_receive(&self) {
        let inner = &self.inner;
        if !inner.is_running() {
            return;
        }
        let Some(remote) = *inner.remote.lock() else {
            return;
        };

        let mut slot = inner.receiver.lock();
        if slot.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }

        let generation = inner.generation.load(Ordering::Acquire);
        let shared = Arc::clone(inner);
        match Worker::spawn("devlink-tcp-client-rx", move || {
            shared.receive_loop(remote, generation);
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

impl Drop for TcpClientConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TcpClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClientConnection")
            .field("remote", &self.inner.config.remote)
            .field("state", &self.inner.events.state())
            .field("attempts", &self.reconnect_attempts())
            .finish()
    }
}
