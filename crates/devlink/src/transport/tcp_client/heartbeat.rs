// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Heartbeat emitter.
//!
//! Sends the configured payload every interval while the link is open and
//! the heartbeat is enabled. A failed heartbeat goes through the regular
//! send-failure path (socket shut down, Disconnected); the receive loop
//! then reconnects.

use super::{ClientShared, TAG};
use crate::config::HeartbeatConfig;
use crate::sync::Worker;
use std::sync::Arc;

/// Heartbeat settings plus the "loop is alive" flag.
///
/// Both live under one lock: the loop decides to exit and clears `active`
/// in the same critical section in which `start_heartbeat` checks it, so a
/// re-enable can never be lost to an exiting loop.
pub(super) struct HeartbeatState {
    pub(super) config: HeartbeatConfig,
    active: bool,
}

impl HeartbeatState {
    pub(super) fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            active: false,
        }
    }
}

impl ClientShared {
    /// Start the heartbeat thread, or wake the running one so it picks up
    /// new settings.
    pub(super) fn start_heartbeat(self: &Arc<Self>) {
        if !self.is_running() {
            return;
        }

        {
            let mut state = self.heartbeat.lock();
            if !state.config.enabled {
                return;
            }
            if state.active {
                drop(state);
                self.heartbeat_wake.set();
                return;
            }
            state.active = true;
        }

        let shared = Arc::clone(self);
        match Worker::spawn("devlink-tcp-heartbeat", move || shared.heartbeat_loop()) {
            Ok(worker) => {
                let previous = self.heartbeat_worker.lock().replace(worker);
                // A previous loop that already exited; nothing to wait for.
                drop(previous);
            }
            Err(e) => {
                log::warn!("[{}] failed to spawn heartbeat: {}", TAG, e);
                self.heartbeat.lock().active = false;
            }
        }
    }

    fn heartbeat_loop(&self) {
        log::debug!("[{}] heartbeat started", TAG);
        loop {
            let (payload, interval) = {
                let mut state = self.heartbeat.lock();
                if !self.is_running() || !state.config.enabled {
                    state.active = false;
                    break;
                }
                (state.config.payload.clone(), state.config.interval)
            };

            if self.events.state().is_connected() && !self.send(&payload) {
                log::debug!("[{}] heartbeat send failed", TAG);
            }

            self.heartbeat_wake.wait_timeout(interval);
        }
        log::debug!("[{}] heartbeat stopped", TAG);
    }
}

#[cfg(test)]
mod tests {
    use super::super::TcpClientConnection;
    use crate::config::TcpClientConfig;
    use crate::connection::Connection;
    use crate::probe::AlwaysReachable;
    use std::io::Read;
    use std::net::{Shutdown, TcpListener, TcpStream};
    use std::time::{Duration, Instant};

    #[test]
    fn test_heartbeat_reaches_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = TcpClientConfig::new(addr.to_string())
            .with_reconnect_interval(Duration::from_millis(50))
            .with_heartbeat(vec![0xAA, 0x55], Duration::from_millis(20));
        let conn = TcpClientConnection::with_probe(config, AlwaysReachable);

        assert!(conn.open());
        let (mut peer, _) = listener.accept().unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xAA, 0x55, 0xAA, 0x55]);

        conn.close();
        assert!(!conn.inner.heartbeat.lock().active);
    }

    #[test]
    fn test_disable_stops_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = TcpClientConfig::new(addr.to_string())
            .with_heartbeat(vec![0x01], Duration::from_millis(10));
        let conn = TcpClientConnection::with_probe(config, AlwaysReachable);
        assert!(conn.open());

        assert!(conn.set_heartbeat(false, Vec::new(), Duration::from_millis(10)));
        let deadline = Instant::now() + Duration::from_secs(2);
        while conn.inner.heartbeat.lock().active && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!conn.inner.heartbeat.lock().active);

        // Re-enable restarts it.
        assert!(conn.set_heartbeat(true, vec![0x02], Duration::from_millis(10)));
        assert!(conn.inner.heartbeat.lock().active);
        conn.close();
    }

    #[test]
    fn test_failed_heartbeat_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let _peer = listener.accept().unwrap();
        stream.shutdown(Shutdown::Write).unwrap();

        let config = TcpClientConfig::new(addr.to_string())
            .with_heartbeat(vec![0x01], Duration::from_millis(10));
        let conn = TcpClientConnection::open_with_stream(config, stream);
        conn.inner.start_heartbeat();

        let deadline = Instant::now() + Duration::from_secs(2);
        while conn.is_connected() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!conn.is_connected());
        assert!(conn.inner.stream.lock().is_none());

        // Skipped while disconnected: no further failures pile up.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(conn.stats().send_failures, 1);
        assert!(conn.inner.heartbeat.lock().active);

        conn.close();
        assert!(!conn.inner.heartbeat.lock().active);
    }
}
