// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wake signals and owned background threads.
//!
//! - [`Signal`] is an auto-reset event: `set()` wakes one pending
//!   `wait_timeout()` (or the next one, if nobody is waiting yet).
//! - [`Worker`] owns a named background thread plus an exit latch, so that
//!   `close()` can wait a bounded time for a loop to acknowledge shutdown
//!   instead of joining a thread that may still sit in a blocking call.

use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long `close()` waits for a background loop to acknowledge shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// Signal
// ============================================================================

/// Auto-reset wake signal.
#[derive(Debug, Default)]
pub struct Signal {
    /// Set flag, cleared by the waiter that consumes it
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake one waiter (or arm the signal for the next wait).
    pub fn set(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.condvar.notify_one();
    }

    /// Clear a pending wake without waiting.
    pub fn reset(&self) {
        *self.pending.lock() = false;
    }

    /// Wait until signalled or until `timeout` elapses.
    ///
    /// Returns `true` if the signal was set, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while !*pending {
            if self.condvar.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *pending, false)
    }
}

// ============================================================================
// Worker
// ============================================================================

/// A named background thread that acknowledges its own exit.
#[derive(Debug)]
pub struct Worker {
    name: String,
    handle: Option<JoinHandle<()>>,
    exited: Arc<Signal>,
    finished: Arc<AtomicBool>,
}

/// Sets the exit latch even if the loop body panics.
struct ExitGuard {
    exited: Arc<Signal>,
    finished: Arc<AtomicBool>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.finished.store(true, Ordering::Release);
        self.exited.set();
    }
}

impl Worker {
    /// Spawn `body` on a new thread called `name`.
    pub fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let exited = Arc::new(Signal::new());
        let finished = Arc::new(AtomicBool::new(false));
        let guard = ExitGuard {
            exited: Arc::clone(&exited),
            finished: Arc::clone(&finished),
        };

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = guard;
                body();
            })?;

        Ok(Self {
            name: name.to_string(),
            handle: Some(handle),
            exited,
            finished,
        })
    }

    /// Whether the thread body has returned.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Whether the calling thread is this worker's thread.
    pub fn is_current(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }

    /// Wait up to `grace` for the loop to exit, then join or detach it.
    ///
    /// Returns `true` if the thread acknowledged shutdown in time. Calling
    /// this from the worker's own thread returns immediately: the loop will
    /// observe the cleared running flag once the current callback returns.
    pub fn stop(mut self, grace: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        if handle.thread().id() == thread::current().id() {
            log::debug!("[{}] stop requested from own thread, detaching", self.name);
            return false;
        }

        if self.is_finished() || self.exited.wait_timeout(grace) {
            if handle.join().is_err() {
                log::warn!("[{}] background thread panicked", self.name);
            }
            true
        } else {
            log::debug!(
                "[{}] did not acknowledge shutdown within {:?}, detaching",
                self.name,
                grace
            );
            false
        }
    }
}
