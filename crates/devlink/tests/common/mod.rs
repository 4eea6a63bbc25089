// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for the integration tests.

#![allow(dead_code)] // Each test binary uses a subset

use crossbeam::channel::{self, Receiver};
use devlink::Connection;
use std::time::{Duration, Instant};

/// Route `log` output through the test harness (`RUST_LOG=debug`).
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `cond` every few milliseconds until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Status notifications delivered to an observer, in order.
pub fn record_status(conn: &dyn Connection) -> Receiver<bool> {
    let (tx, rx) = channel::unbounded();
    conn.on_status_changed(Box::new(move |connected| {
        let _ = tx.send(connected);
    }));
    rx
}

/// Data notifications delivered to an observer, in order.
pub fn record_data(conn: &dyn Connection) -> Receiver<(String, Vec<u8>)> {
    let (tx, rx) = channel::unbounded();
    conn.on_data_received(Box::new(move |sender: &str, bytes: &[u8]| {
        let _ = tx.send((sender.to_string(), bytes.to_vec()));
    }));
    rx
}

/// Everything received until the channel stays quiet for `quiet`.
pub fn drain<T>(rx: &Receiver<T>, quiet: Duration) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.recv_timeout(quiet) {
        out.push(item);
    }
    out
}
