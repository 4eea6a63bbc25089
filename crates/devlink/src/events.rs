// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Observer registration and event dispatch.
//!
//! Every connection owns one [`EventHub`], which holds:
//! - the connection [`ConnectionState`] and its flip-only change rule,
//! - an ordered list of data-received observers,
//! - an ordered list of status-changed observers.
//!
//! # Dispatch
//!
//! ```text
//!  receive thread ──dispatch_data()──> data observers (same thread)
//!
//!  any thread ──set_state()──┐
//!                            │  (flip + enqueue inside the state lock)
//!                            v
//!                   crossbeam channel ──> status dispatcher thread
//!                                              └──> status observers
//! ```
//!
//! Data observers run on the reading thread, so notifications are ordered
//! per session. Status observers run on a dedicated dispatcher thread, so a
//! slow observer never stalls the thread that changed the state, and the
//! single consumer keeps notifications in flip order.

use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// Callback invoked with `(sender_address, payload)`.
pub type DataCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Callback invoked with the new connected flag.
pub type StatusCallback = Arc<dyn Fn(bool) + Send + Sync>;

type StatusList = Arc<RwLock<Vec<(SubscriptionId, StatusCallback)>>>;

// ============================================================================
// Connection State
// ============================================================================

/// Observable connection state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No live transport
    #[default]
    Disconnected,

    /// Transport is up (for servers: at least one session is registered)
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub(crate) fn from_connected(connected: bool) -> Self {
        if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connected => "Connected",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Subscription handle
// ============================================================================

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// ============================================================================
// Event Hub
// ============================================================================

/// Per-connection state cell plus observer lists.
pub struct EventHub {
    /// Tag used in log lines ("TCP-CLIENT", "UDP", ...)
    tag: &'static str,

    next_id: AtomicU64,

    state: Mutex<ConnectionState>,

    data_observers: RwLock<Vec<(SubscriptionId, DataCallback)>>,

    status_observers: StatusList,

    /// Feeds the status dispatcher thread (spawned on first flip)
    status_tx: Mutex<Option<Sender<bool>>>,
}

impl EventHub {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            next_id: AtomicU64::new(1),
            state: Mutex::new(ConnectionState::Disconnected),
            data_observers: RwLock::new(Vec::new()),
            status_observers: Arc::new(RwLock::new(Vec::new())),
            status_tx: Mutex::new(None),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a data-received observer.
    pub fn on_data_received<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.data_observers.write().push((id, Arc::new(callback)));
        id
    }

    /// Register a status-changed observer.
    pub fn on_status_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.status_observers.write().push((id, Arc::new(callback)));
        id
    }

    /// Remove an observer of either kind. Returns `false` if unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        {
            let mut data = self.data_observers.write();
            if let Some(pos) = data.iter().position(|(sid, _)| *sid == id) {
                data.remove(pos);
                return true;
            }
        }
        let mut status = self.status_observers.write();
        if let Some(pos) = status.iter().position(|(sid, _)| *sid == id) {
            status.remove(pos);
            return true;
        }
        false
    }

    /// Number of registered observers (data, status).
    pub fn observer_count(&self) -> (usize, usize) {
        (
            self.data_observers.read().len(),
            self.status_observers.read().len(),
        )
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Set the state; notifies observers only if the value flips.
    ///
    /// Returns `true` if the state changed.
    pub(crate) fn set_state(&self, new_state: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if *state == new_state {
            return false;
        }
        *state = new_state;
        log::debug!("[{}] state -> {}", self.tag, new_state);
        // Enqueue while still holding the state lock so flips are delivered
        // in the order they happened.
        self.enqueue_status(new_state.is_connected());
        true
    }

    pub(crate) fn set_connected(&self, connected: bool) -> bool {
        self.set_state(ConnectionState::from_connected(connected))
    }

    fn enqueue_status(&self, connected: bool) {
        let mut tx = self.status_tx.lock();
        if tx.is_none() {
            *tx = self.spawn_dispatcher();
        }
        let delivered = tx
            .as_ref()
            .is_some_and(|sender| sender.send(connected).is_ok());
        if !delivered {
            log::warn!("[{}] status dispatcher unavailable, dropping notification", self.tag);
            *tx = None;
        }
    }

    fn spawn_dispatcher(&self) -> Option<Sender<bool>> {
        let (tx, rx) = channel::unbounded::<bool>();
        let observers = Arc::clone(&self.status_observers);
        let tag = self.tag;
        let spawned = thread::Builder::new()
            .name(format!("devlink-{}-status", tag.to_lowercase()))
            .spawn(move || {
                // Exits once the hub (and with it the sender) is dropped.
                for connected in rx.iter() {
                    let snapshot: Vec<StatusCallback> =
                        observers.read().iter().map(|(_, cb)| Arc::clone(cb)).collect();
                    for callback in snapshot {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| callback(connected)));
                        if result.is_err() {
                            log::warn!("[{}] status observer panicked", tag);
                        }
                    }
                }
            });
        match spawned {
            Ok(_) => Some(tx),
            Err(e) => {
                log::warn!("[{}] failed to spawn status dispatcher: {}", tag, e);
                None
            }
        }
    }

    /// Deliver a received payload to every data observer on this thread.
    pub(crate) fn dispatch_data(&self, sender: &str, payload: &[u8]) {
        let snapshot: Vec<DataCallback> = self
            .data_observers
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(sender, payload)));
            if result.is_err() {
                log::warn!("[{}] data observer panicked (sender={})", self.tag, sender);
            }
        }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (data, status) = self.observer_count();
        f.debug_struct("EventHub")
            .field("tag", &self.tag)
            .field("state", &self.state())
            .field("data_observers", &data)
            .field("status_observers", &status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn recorder(hub: &EventHub) -> channel::Receiver<bool> {
        let (tx, rx) = channel::unbounded();
        hub.on_status_changed(move |connected| {
            let _ = tx.send(connected);
        });
        rx
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::default().is_connected());
    }

    #[test]
    fn test_notifications_only_on_flip() {
        let hub = EventHub::new("TEST");
        let rx = recorder(&hub);

        let sequence = [false, true, true, true, false, false, true, false, false];
        let mut expected = Vec::new();
        let mut current = false;
        for &value in &sequence {
            let changed = hub.set_connected(value);
            assert_eq!(changed, value != current);
            if value != current {
                expected.push(value);
                current = value;
            }
        }

        let mut seen = Vec::new();
        while let Ok(v) = rx.recv_timeout(Duration::from_millis(500)) {
            seen.push(v);
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_concurrent_flips_stay_ordered_and_alternating() {
        let hub = Arc::new(EventHub::new("TEST"));
        let rx = recorder(&hub);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let hub = Arc::clone(&hub);
                thread::spawn(move || {
                    for n in 0..200 {
                        hub.set_connected((n + i) % 2 == 0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut last = false;
        let mut count = 0;
        while let Ok(v) = rx.recv_timeout(Duration::from_millis(500)) {
            assert_ne!(v, last, "two identical notifications in a row");
            last = v;
            count += 1;
        }
        assert_eq!(last, hub.state().is_connected());
        assert!(count > 0);
    }

    #[test]
    fn test_data_dispatch_and_unsubscribe() {
        let hub = EventHub::new("TEST");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        let id = hub.on_data_received(move |sender, data| {
            s.lock().push((sender.to_string(), data.to_vec()));
        });
        hub.dispatch_data("COM1", &[1, 2, 3]);

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.dispatch_data("COM1", &[4]);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("COM1".to_string(), vec![1, 2, 3]));
    }

    #[test]
    fn test_panicking_observer_does_not_stop_others() {
        let hub = EventHub::new("TEST");
        let hits = Arc::new(AtomicU64::new(0));

        hub.on_data_received(|_, _| panic!("observer failure"));
        let h = Arc::clone(&hits);
        hub.on_data_received(move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        hub.dispatch_data("peer", b"x");
        hub.dispatch_data("peer", b"y");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_observer_count() {
        let hub = EventHub::new("TEST");
        hub.on_data_received(|_, _| {});
        let id = hub.on_status_changed(|_| {});
        assert_eq!(hub.observer_count(), (1, 1));
        hub.unsubscribe(id);
        assert_eq!(hub.observer_count(), (1, 0));
    }
}
