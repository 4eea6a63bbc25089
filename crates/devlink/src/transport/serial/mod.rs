// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serial port transport.
//!
//! # Receive loop
//!
//! ```text
//!   loop while running:
//!     bytes_to_read() == 0  -> wait poll_interval (close wakes it)
//!     bytes_to_read() == n  -> read n, dispatch(port_name, bytes)
//!     I/O error             -> release device, Disconnected, exit
//! ```
//!
//! The device lock is held only around the poll/read pair, never while
//! observers run, so an observer may call `send()` or `close()`.

mod device;

pub use device::{SerialDevice, SerialOpener, SystemSerialOpener};

use crate::config::SerialConfig;
use crate::connection::Connection;
use crate::events::EventHub;
use crate::metrics::{LinkMetrics, LinkStatsSnapshot};
use crate::sync::{Signal, Worker, SHUTDOWN_GRACE};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const TAG: &str = "SERIAL";

struct SerialShared {
    config: SerialConfig,
    opener: Box<dyn SerialOpener>,
    events: EventHub,
    metrics: LinkMetrics,
    running: AtomicBool,
    /// Bumped by every open(); a loop detached by an earlier close stops once it moves
    generation: AtomicU64,
    device: Mutex<Option<Box<dyn SerialDevice>>>,
    /// Interrupts the idle poll wait
    wake: Signal,
    receiver: Mutex<Option<Worker>>,
}

/// Connection over a serial port.
pub struct SerialConnection {
    inner: Arc<SerialShared>,
}

impl SerialConnection {
    /// Serial connection using the system TTY backend.
    pub fn new(config: SerialConfig) -> Self {
        Self::with_opener(config, SystemSerialOpener)
    }

    /// Serial connection with a custom device backend.
    pub fn with_opener(config: SerialConfig, opener: impl SerialOpener + 'static) -> Self {
        Self {
            inner: Arc::new(SerialShared {
                config,
                opener: Box::new(opener),
                events: EventHub::new(TAG),
                metrics: LinkMetrics::new(),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                device: Mutex::new(None),
                wake: Signal::new(),
                receiver: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.inner.config
    }
}

impl SerialShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::Acquire) == generation
    }

    /// Drop the device after an I/O failure; the owner decides whether to reopen.
    fn release_device(&self) {
        self.device.lock().take();
        self.events.set_connected(false);
    }

    /// Poll for buffered bytes and read them, under the device lock.
    fn poll_read(&self, buf: &mut [u8]) -> Option<io::Result<usize>> {
        let mut guard = self.device.lock();
        let device = guard.as_mut()?;
        let result = match device.bytes_to_read() {
            Ok(0) => Ok(0),
            Ok(available) => {
                let want = available.min(buf.len());
                device.read(&mut buf[..want])
            }
            Err(e) => Err(e),
        };
        Some(result)
    }

    fn receive_loop(&self, generation: u64) {
        let mut buf = vec![0u8; self.config.receive_buffer_size];
        log::debug!("[{}] receive loop started on {}", TAG, self.config.port_name);

        while self.is_current(generation) {
            match self.poll_read(&mut buf) {
                None => break,
                Some(Ok(0)) => {
                    self.wake.wait_timeout(self.config.poll_interval);
                }
                Some(Ok(n)) => {
                    log::trace!("[{}] {} bytes from {}", TAG, n, self.config.port_name);
                    self.metrics.record_received(n);
                    self.events.dispatch_data(&self.config.port_name, &buf[..n]);
                }
                Some(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {}
                Some(Err(e)) => {
                    if self.is_current(generation) {
                        log::warn!("[{}] read error on {}: {}", TAG, self.config.port_name, e);
                        self.metrics.record_recv_error();
                        self.release_device();
                    }
                    break;
                }
            }
        }

        log::debug!("[{}] receive loop exited on {}", TAG, self.config.port_name);
    }
}

impl Connection for SerialConnection {
    fn address(&self) -> String {
        self.inner.config.port_name.clone()
    }

    fn open(&self) -> bool {
        self.close();

        let inner = &self.inner;
        if let Err(e) = inner.config.validate() {
            log::warn!("[{}] cannot open: {}", TAG, e);
            return false;
        }

        let device = match inner.opener.open(&inner.config) {
            Ok(device) => device,
            Err(e) => {
                log::warn!("[{}] failed to open {}: {}", TAG, inner.config.port_name, e);
                return false;
            }
        };
        *inner.device.lock() = Some(device);

        inner.generation.fetch_add(1, Ordering::AcqRel);
        inner.wake.reset();
        inner.running.store(true, Ordering::Release);
        inner.events.set_connected(true);
        log::info!(
            "[{}] {} opened at {} baud",
            TAG,
            inner.config.port_name,
            inner.config.baud_rate
        );

        self.start_receive();
        true
    }

    fn close(&self) {
        let inner = &self.inner;
        inner.running.store(false, Ordering::Release);
        inner.wake.set();

        let worker = inner.receiver.lock().take();
        if let Some(worker) = worker {
            worker.stop(SHUTDOWN_GRACE);
        }

        let released = inner.device.lock().take().is_some();
        inner.events.set_connected(false);
        if released {
            log::info!("[{}] {} closed", TAG, inner.config.port_name);
        }
    }

    fn send(&self, payload: &[u8]) -> bool {
        let inner = &self.inner;
        if !inner.is_running() {
            return false;
        }

        let mut guard = inner.device.lock();
        let Some(device) = guard.as_mut() else {
            return false;
        };
        match device.write_all(payload) {
            Ok(()) => {
                inner.metrics.record_sent(payload.len());
                true
            }
            Err(e) => {
                log::warn!("[{}] write error on {}: {}", TAG, inner.config.port_name, e);
                inner.metrics.record_send_failure();
                guard.take();
                drop(guard);
                inner.events.set_connected(false);
                false
            }
        }
    }

    fn start_receive(&self) {
        if !self.inner.is_running() {
            return;
        }

        let mut slot = self.inner.receiver.lock();
        if slot.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }

        let generation = self.inner.generation.load(Ordering::Acquire);
        let shared = Arc::clone(&self.inner);
        match Worker::spawn("devlink-serial-rx", move || shared.receive_loop(generation)) {
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

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SerialConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialConnection")
            .field("port", &self.inner.config.port_name)
            .field("state", &self.inner.events.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LinkError, Result};
    use crossbeam::channel;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Default)]
    struct MockPort {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
        fail_reads: bool,
        fail_writes: bool,
    }

    struct MockDevice {
        port: Arc<Mutex<MockPort>>,
    }

    impl SerialDevice for MockDevice {
        fn bytes_to_read(&mut self) -> io::Result<usize> {
            let port = self.port.lock();
            if port.fail_reads {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            Ok(port.rx.len())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut port = self.port.lock();
            let n = buf.len().min(port.rx.len());
            for slot in buf.iter_mut().take(n) {
                *slot = port.rx.pop_front().unwrap_or_default();
            }
            Ok(n)
        }

        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            let mut port = self.port.lock();
            if port.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            port.tx.extend_from_slice(data);
            Ok(())
        }
    }

    fn mock_connection() -> (SerialConnection, Arc<Mutex<MockPort>>) {
        let port = Arc::new(Mutex::new(MockPort::default()));
        let p = Arc::clone(&port);
        let opener = move |_config: &SerialConfig| -> Result<Box<dyn SerialDevice>> {
            Ok(Box::new(MockDevice {
                port: Arc::clone(&p),
            }))
        };
        let config = SerialConfig::new("COM7", 9600).with_poll_interval(Duration::from_millis(5));
        (SerialConnection::with_opener(config, opener), port)
    }

    #[test]
    fn test_send_before_open_fails() {
        let (conn, port) = mock_connection();
        assert!(!conn.send(b"hi"));
        assert!(port.lock().tx.is_empty());
        assert_eq!(conn.address(), "COM7");
    }

    #[test]
    fn test_open_send_receive() {
        let (conn, port) = mock_connection();
        let (tx, rx) = channel::unbounded();
        conn.events().on_data_received(move |sender, data| {
            let _ = tx.send((sender.to_string(), data.to_vec()));
        });

        assert!(conn.open());
        assert!(conn.is_connected());

        assert!(conn.send(&[0x01, 0x02]));
        assert_eq!(port.lock().tx, vec![0x01, 0x02]);

        port.lock().rx.extend([0xAA, 0xBB, 0xCC]);
        let (sender, data) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(sender, "COM7");
        assert_eq!(data, vec![0xAA, 0xBB, 0xCC]);

        conn.close();
        assert!(!conn.is_connected());
        assert!(!conn.send(b"late"));

        let stats = conn.stats();
        assert_eq!(stats.bytes_sent, 2);
        assert_eq!(stats.bytes_received, 3);
    }

    #[test]
    fn test_read_error_releases_device() {
        let (conn, port) = mock_connection();
        let (tx, rx) = channel::unbounded();
        conn.events().on_status_changed(move |connected| {
            let _ = tx.send(connected);
        });

        assert!(conn.open());
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());

        port.lock().fail_reads = true;
        assert!(!rx.recv_timeout(Duration::from_secs(2)).unwrap());
        assert!(!conn.send(b"x"));
        assert_eq!(conn.stats().recv_errors, 1);
    }

    #[test]
    fn test_write_error_disconnects() {
        let (conn, port) = mock_connection();
        assert!(conn.open());
        port.lock().fail_writes = true;
        assert!(!conn.send(b"x"));
        assert!(!conn.is_connected());
        assert_eq!(conn.stats().send_failures, 1);
    }

    #[test]
    fn test_reopen_after_close() {
        let (conn, port) = mock_connection();
        assert!(conn.open());
        conn.close();
        assert!(conn.open());
        assert!(conn.send(b"again"));
        assert_eq!(port.lock().tx, b"again".to_vec());
    }

    #[test]
    fn test_open_failure_returns_false() {
        let opener = |_config: &SerialConfig| -> Result<Box<dyn SerialDevice>> {
            Err(LinkError::Unsupported("no ports here"))
        };
        let conn = SerialConnection::with_opener(SerialConfig::new("COM1", 9600), opener);
        assert!(!conn.open());
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let (conn, _port) = {
            let port = Arc::new(Mutex::new(MockPort::default()));
            let p = Arc::clone(&port);
            let opener = move |_c: &SerialConfig| -> Result<Box<dyn SerialDevice>> {
                Ok(Box::new(MockDevice {
                    port: Arc::clone(&p),
                }))
            };
            (SerialConnection::with_opener(SerialConfig::default(), opener), port)
        };
        assert!(!conn.open());
    }

    #[test]
    fn test_close_from_data_observer() {
        let (conn, port) = mock_connection();
        let conn = Arc::new(conn);
        let (tx, rx) = channel::unbounded();
        {
            let weak = Arc::downgrade(&conn);
            conn.events().on_data_received(move |_, _| {
                if let Some(c) = weak.upgrade() {
                    c.close();
                }
                let _ = tx.send(());
            });
        }

        assert!(conn.open());
        port.lock().rx.push_back(1);
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(!conn.is_connected());
    }
}
