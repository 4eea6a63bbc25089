// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection counters.
//!
//! Every transport records into a [`LinkMetrics`] instance:
//! - Message and byte throughput (sent, received)
//! - Send failures and receive errors
//! - Connect attempts and established connections (TCP client)
//! - Accepted and closed sessions (TCP server)
//!
//! # Example
//!
//! ```
//! use devlink::LinkMetrics;
//!
//! let metrics = LinkMetrics::new();
//! metrics.record_sent(16);
//! metrics.record_received(4);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.bytes_sent, 16);
//! assert_eq!(snapshot.messages_received, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Atomic counters for one connection.
#[derive(Debug)]
pub struct LinkMetrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,

    /// Writes that failed (and degraded the state)
    send_failures: AtomicU64,

    /// Reads that failed while the loop was running
    recv_errors: AtomicU64,

    /// TCP client: connect attempts made by the reconnect supervisor
    connect_attempts: AtomicU64,

    /// TCP client: successful connects
    connections_established: AtomicU64,

    /// TCP server: sessions admitted into the registry
    sessions_accepted: AtomicU64,

    /// TCP server: sessions removed from the registry
    sessions_closed: AtomicU64,

    start_time: Instant,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            recv_errors: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            sessions_accepted: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recv_error(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connect attempt and return the attempt number (1-based).
    pub fn record_connect_attempt(&self) -> u64 {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_accepted(&self) {
        self.sessions_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            sessions_accepted: self.sessions_accepted.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`LinkMetrics`].
#[derive(Clone, Debug, Default)]
pub struct LinkStatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_failures: u64,
    pub recv_errors: u64,
    pub connect_attempts: u64,
    pub connections_established: u64,
    pub sessions_accepted: u64,
    pub sessions_closed: u64,
    /// Seconds since the connection object was created
    pub uptime_secs: f64,
}

impl LinkStatsSnapshot {
    /// Received bytes per second over the object's lifetime.
    pub fn receive_rate(&self) -> f64 {
        if self.uptime_secs > 0.0 {
            self.bytes_received as f64 / self.uptime_secs
        } else {
            0.0
        }
    }
}
