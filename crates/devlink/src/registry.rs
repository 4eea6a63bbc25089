// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Concurrent session registry for the TCP server.
//!
//! Maps the peer address of every accepted stream to its shared handle.
//! Only whole operations are exposed (add, remove, snapshot, clear), each
//! one a single critical section that also recomputes the owner's
//! connection state:
//!
//! ```text
//! +---------------------------------------------+
//! |              SessionRegistry                |
//! |   Mutex<HashMap<SocketAddr, Arc<Handle>>>   |
//! |                     |                       |
//! |   after every mutation, same lock:          |
//! |     state = Connected  iff  !map.is_empty() |
//! +---------------------------------------------+
//! ```

use crate::events::{ConnectionState, EventHub};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

/// A session handle that can be shut down while shared.
pub trait SessionHandle: Send + Sync {
    /// Release the underlying resource. Must be idempotent.
    fn close(&self);
}

impl SessionHandle for TcpStream {
    fn close(&self) {
        if let Err(e) = self.shutdown(Shutdown::Both) {
            // NotConnected once the peer already went away
            log::debug!("[REGISTRY] shutdown failed: {}", e);
        }
    }
}

/// Peer address to session handle map, bound to a state cell.
pub struct SessionRegistry<H: SessionHandle> {
    sessions: Mutex<HashMap<SocketAddr, Arc<H>>>,
    events: Arc<EventHub>,
    #[cfg(test)]
    flips: std::sync::atomic::AtomicUsize,
}

impl<H: SessionHandle> SessionRegistry<H> {
    pub fn new(events: Arc<EventHub>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            events,
            #[cfg(test)]
            flips: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    fn sync_state(&self, sessions: &HashMap<SocketAddr, Arc<H>>) {
        let state = if sessions.is_empty() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Connected
        };
        if self.events.set_state(state) {
            #[cfg(test)]
            self.flips.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    /// Register a session. Returns `false` (and leaves the map untouched)
    /// if a session with the same peer address is already present.
    pub fn add(&self, peer: SocketAddr, handle: Arc<H>) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&peer) {
            return false;
        }
        sessions.insert(peer, handle);
        self.sync_state(&sessions);
        true
    }

    /// Remove a session by peer address and close its handle.
    ///
    /// Unconditional, unlike [`remove_handle`](Self::remove_handle): meant
    /// for owners that evict a peer on their own initiative rather than
    /// from a loop that holds the handle.
    pub fn remove(&self, peer: &SocketAddr) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock();
            let removed = sessions.remove(peer);
            if removed.is_some() {
                self.sync_state(&sessions);
            }
            removed
        };
        match removed {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Remove a session only if it still maps to `handle`.
    ///
    /// A receive loop and the broadcaster may both decide to drop the same
    /// peer; the pointer check keeps a late caller from evicting a newer
    /// session that reused the address.
    pub fn remove_handle(&self, peer: &SocketAddr, handle: &Arc<H>) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock();
            let matches = sessions
                .get(peer)
                .is_some_and(|current| Arc::ptr_eq(current, handle));
            if matches {
                sessions.remove(peer);
                self.sync_state(&sessions);
            }
            matches
        };
        if removed {
            handle.close();
        }
        removed
    }

    /// Copy of the current sessions, for iteration outside the lock.
    pub fn snapshot(&self) -> Vec<(SocketAddr, Arc<H>)> {
        self.sessions
            .lock()
            .iter()
            .map(|(peer, handle)| (*peer, Arc::clone(handle)))
            .collect()
    }

    /// Remove and close every session. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<(SocketAddr, Arc<H>)> = {
            let mut sessions = self.sessions.lock();
            let drained = sessions.drain().collect();
            self.sync_state(&sessions);
            drained
        };
        for (peer, handle) in &drained {
            log::debug!("[REGISTRY] closing session {}", peer);
            handle.close();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Whether a session for `peer` is registered.
    pub fn contains(&self, peer: &SocketAddr) -> bool {
        self.sessions.lock().contains_key(peer)
    }

    /// Registered peer addresses (unordered).
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.sessions.lock().keys().copied().collect()
    }

    /// Check the state/registry invariant under the lock.
    #[cfg(test)]
    fn assert_consistent(&self) {
        let sessions = self.sessions.lock();
        assert_eq!(
            self.events.state().is_connected(),
            !sessions.is_empty(),
            "state out of sync with {} sessions",
            sessions.len()
        );
    }
}

impl<H: SessionHandle> std::fmt::Debug for SessionRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[derive(Default)]
    struct MockHandle {
        closed: AtomicBool,
    }

    impl SessionHandle for MockHandle {
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn registry() -> SessionRegistry<MockHandle> {
        SessionRegistry::new(Arc::new(EventHub::new("TEST")))
    }

    #[test]
    fn test_add_rejects_duplicate_peer() {
        let reg = registry();
        let first = Arc::new(MockHandle::default());
        let second = Arc::new(MockHandle::default());

        assert!(reg.add(peer(1000), Arc::clone(&first)));
        assert!(!reg.add(peer(1000), Arc::clone(&second)));
        assert_eq!(reg.len(), 1);

        let snapshot = reg.snapshot();
        assert!(Arc::ptr_eq(&snapshot[0].1, &first));
        // The rejected handle is left to the caller.
        assert!(!second.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_state_follows_emptiness() {
        let reg = registry();
        assert!(!reg.events.state().is_connected());

        reg.add(peer(1), Arc::new(MockHandle::default()));
        assert!(reg.events.state().is_connected());
        reg.add(peer(2), Arc::new(MockHandle::default()));

        assert!(reg.remove(&peer(1)));
        assert!(reg.events.state().is_connected());
        assert!(reg.remove(&peer(2)));
        assert!(!reg.events.state().is_connected());
        assert!(!reg.remove(&peer(2)));
    }

    #[test]
    fn test_remove_closes_handle() {
        let reg = registry();
        let handle = Arc::new(MockHandle::default());
        reg.add(peer(7), Arc::clone(&handle));
        reg.remove(&peer(7));
        assert!(handle.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_remove_handle_ignores_replaced_session() {
        let reg = registry();
        let old = Arc::new(MockHandle::default());
        let new = Arc::new(MockHandle::default());

        reg.add(peer(9), Arc::clone(&old));
        assert!(reg.remove_handle(&peer(9), &old));
        reg.add(peer(9), Arc::clone(&new));

        // A stale removal for the old handle must not evict the new one.
        assert!(!reg.remove_handle(&peer(9), &old));
        assert!(reg.contains(&peer(9)));
        assert!(!new.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_clear_closes_all() {
        let reg = registry();
        let handles: Vec<_> = (0..5).map(|_| Arc::new(MockHandle::default())).collect();
        for (i, h) in handles.iter().enumerate() {
            reg.add(peer(2000 + i as u16), Arc::clone(h));
        }

        assert_eq!(reg.clear(), 5);
        assert!(reg.is_empty());
        assert!(handles.iter().all(|h| h.closed.load(Ordering::SeqCst)));
        assert!(!reg.events.state().is_connected());
        assert_eq!(reg.clear(), 0);
    }

    #[test]
    fn test_concurrent_mutation_keeps_invariants() {
        let reg = Arc::new(registry());
        let (tx, rx) = crossbeam::channel::unbounded();
        reg.events.on_status_changed(move |connected| {
            let _ = tx.send(connected);
        });

        let workers: Vec<_> = (0..8u64)
            .map(|seed| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    let mut rng = fastrand::Rng::with_seed(seed);
                    for _ in 0..500 {
                        let p = peer(3000 + rng.u16(0..16));
                        match rng.u8(0..4) {
                            0 | 1 => {
                                reg.add(p, Arc::new(MockHandle::default()));
                            }
                            2 => {
                                reg.remove(&p);
                            }
                            _ => {
                                let snap = reg.snapshot();
                                let mut keys: Vec<_> = snap.iter().map(|(k, _)| *k).collect();
                                keys.sort();
                                keys.dedup();
                                assert_eq!(keys.len(), snap.len());
                            }
                        }
                        reg.assert_consistent();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        reg.assert_consistent();
        reg.clear();
        reg.assert_consistent();

        // One notification per real flip, alternating, starting from Disconnected.
        let mut seen = Vec::new();
        while let Ok(connected) = rx.recv_timeout(std::time::Duration::from_millis(500)) {
            seen.push(connected);
        }
        assert_eq!(seen.len(), reg.flips.load(Ordering::SeqCst));
        assert!(!seen.is_empty());
        for (i, connected) in seen.iter().enumerate() {
            assert_eq!(*connected, i % 2 == 0, "notification {} out of order", i);
        }
        assert_eq!(seen.last(), Some(&false));
    }
}
