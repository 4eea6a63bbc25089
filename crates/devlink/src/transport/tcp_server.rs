// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multi-client TCP server transport.
//!
//! # Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                     TcpServerConnection                      |
//! |                                                              |
//! |  accept thread            session threads (one per peer)     |
//! |  +----------------+       +-------------------------------+  |
//! |  | mio::Poll      |       | blocking read                 |  |
//! |  |  - listener    | ----> |  n > 0  -> dispatch(peer, ..) |  |
//! |  |  - waker       | admit |  0/err  -> remove own session |  |
//! |  +----------------+       +-------------------------------+  |
//! |          |                               |                   |
//! |          v                               v                   |
//! |  +--------------------------------------------------------+  |
//! |  |        SessionRegistry (state = non-empty)             |  |
//! |  +--------------------------------------------------------+  |
//! |          ^                                                   |
//! |          | snapshot                                          |
//! |  broadcast thread <---- crossbeam channel <---- send()       |
//! +--------------------------------------------------------------+
//! ```
//!
//! `send()` never writes on the caller's thread: payloads are queued and a
//! single broadcast thread writes them, in order, to every registered
//! session. A write failure drops only that session.

use crate::config::TcpServerConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::events::EventHub;
use crate::metrics::{LinkMetrics, LinkStatsSnapshot};
use crate::registry::{SessionHandle, SessionRegistry};
use crate::sync::{Worker, SHUTDOWN_GRACE};
use crossbeam::channel::{self, Receiver, Sender};
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TAG: &str = "TCP-SERVER";

/// Token for the listening socket
const LISTENER_TOKEN: Token = Token(0);

/// Token for the shutdown waker
const WAKER_TOKEN: Token = Token(1);

/// Upper bound on a poll wait; the waker normally ends it sooner
const ACCEPT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

const MAX_EVENTS: usize = 16;

struct ServerShared {
    config: TcpServerConfig,
    events: Arc<EventHub>,
    metrics: LinkMetrics,
    registry: SessionRegistry<TcpStream>,

    running: AtomicBool,
    generation: AtomicU64,

    /// Bound endpoint while listening
    local_addr: Mutex<Option<SocketAddr>>,

    waker: Mutex<Option<Waker>>,
    broadcast_tx: Mutex<Option<Sender<Vec<u8>>>>,

    acceptor: Mutex<Option<Worker>>,
    broadcaster: Mutex<Option<Worker>>,
    sessions: Mutex<Vec<Worker>>,
}

/// TCP server broadcasting to every connected client.
///
/// The connection state is Connected while at least one client session is
/// registered.
pub struct TcpServerConnection {
    inner: Arc<ServerShared>,
}

impl TcpServerConnection {
    pub fn new(config: TcpServerConfig) -> Self {
        let events = Arc::new(EventHub::new(TAG));
        Self {
            inner: Arc::new(ServerShared {
                config,
                registry: SessionRegistry::new(Arc::clone(&events)),
                events,
                metrics: LinkMetrics::new(),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                local_addr: Mutex::new(None),
                waker: Mutex::new(None),
                broadcast_tx: Mutex::new(None),
                acceptor: Mutex::new(None),
                broadcaster: Mutex::new(None),
                sessions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &TcpServerConfig {
        &self.inner.config
    }

    /// Bound endpoint, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Number of registered client sessions.
    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Peer addresses of the registered sessions.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.inner.registry.peers()
    }
}

fn bind_listener(config: &TcpServerConfig) -> io::Result<TcpListener> {
    let addr = SocketAddr::new(config.listen_address, config.listen_port);
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(config.backlog)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

fn configure_session(stream: &TcpStream, config: &TcpServerConfig) -> io::Result<()> {
    // BSD-derived stacks hand out accepted sockets in the listener's mode.
    stream.set_nonblocking(false)?;
    stream.set_nodelay(config.nodelay)?;
    stream.set_write_timeout(Some(config.send_timeout))?;
    Ok(())
}

impl ServerShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::Acquire) == generation
    }

    /// Bind, listen and start the accept and broadcast threads.
    fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let listener = bind_listener(&self.config)?;
        let local = listener.local_addr()?;

        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let mut readiness = mio::net::TcpListener::from_std(listener.try_clone()?);
        poll.registry()
            .register(&mut readiness, LISTENER_TOKEN, Interest::READABLE)?;

        let (tx, rx) = channel::unbounded::<Vec<u8>>();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.running.store(true, Ordering::Release);
        *self.local_addr.lock() = Some(local);
        *self.waker.lock() = Some(waker);
        *self.broadcast_tx.lock() = Some(tx);

        let shared = Arc::clone(self);
        let broadcaster = Worker::spawn("devlink-tcp-server-tx", move || {
            shared.broadcast_loop(rx);
        });
        let shared = Arc::clone(self);
        let acceptor = Worker::spawn("devlink-tcp-server-accept", move || {
            shared.accept_loop(poll, readiness, listener, generation);
        });

        match (broadcaster, acceptor) {
            (Ok(broadcaster), Ok(acceptor)) => {
                *self.broadcaster.lock() = Some(broadcaster);
                *self.acceptor.lock() = Some(acceptor);
                Ok(local)
            }
            (broadcaster, acceptor) => {
                if let Ok(worker) = broadcaster {
                    *self.broadcaster.lock() = Some(worker);
                }
                if let Ok(worker) = acceptor {
                    *self.acceptor.lock() = Some(worker);
                }
                Err(io::Error::other("failed to spawn server threads").into())
            }
        }
    }

    fn accept_loop(
        self: &Arc<Self>,
        mut poll: Poll,
        _readiness: mio::net::TcpListener,
        listener: TcpListener,
        generation: u64,
    ) {
        let mut events = Events::with_capacity(MAX_EVENTS);
        log::debug!("[{}] accept loop started", TAG);

        while self.is_current(generation) {
            if let Err(e) = poll.poll(&mut events, Some(ACCEPT_POLL_TIMEOUT)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    log::warn!("[{}] poll failed: {}", TAG, e);
                }
                continue;
            }
            // The waker only ends the wait; the loop condition does the rest.
            if events.iter().any(|event| event.token() == LISTENER_TOKEN) {
                self.accept_pending(&listener, generation);
            }
        }

        log::debug!("[{}] accept loop exited", TAG);
    }

    fn accept_pending(self: &Arc<Self>, listener: &TcpListener, generation: u64) {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer, generation),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // Listener failures are logged only; existing sessions stay up.
                    log::warn!("[{}] accept failed: {}", TAG, e);
                    break;
                }
            }
        }
    }

    fn admit(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr, generation: u64) {
        if let Err(e) = configure_session(&stream, &self.config) {
            log::warn!("[{}] cannot configure session {}: {}", TAG, peer, e);
            stream.close();
            return;
        }
        let reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(e) => {
                log::warn!("[{}] cannot clone session {}: {}", TAG, peer, e);
                stream.close();
                return;
            }
        };

        let handle = Arc::new(stream);
        if !self.is_current(generation) {
            handle.close();
            return;
        }
        if !self.registry.add(peer, Arc::clone(&handle)) {
            log::warn!("[{}] duplicate session for {}, rejecting", TAG, peer);
            handle.close();
            return;
        }
        self.metrics.record_session_accepted();
        log::info!(
            "[{}] peer {} connected ({} sessions)",
            TAG,
            peer,
            self.registry.len()
        );

        let shared = Arc::clone(self);
        let spawned = Worker::spawn("devlink-tcp-session", {
            let handle = Arc::clone(&handle);
            move || shared.session_loop(reader, peer, handle)
        });
        match spawned {
            Ok(worker) => {
                let mut sessions = self.sessions.lock();
                sessions.retain(|w| !w.is_finished());
                sessions.push(worker);
            }
            Err(e) => {
                log::warn!("[{}] failed to spawn session for {}: {}", TAG, peer, e);
                if self.registry.remove_handle(&peer, &handle) {
                    self.metrics.record_session_closed();
                }
            }
        }
    }

    fn session_loop(&self, mut reader: TcpStream, peer: SocketAddr, handle: Arc<TcpStream>) {
        let mut buf = vec![0u8; self.config.receive_buffer_size];
        let sender = peer.to_string();

        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    log::trace!("[{}] {} bytes from {}", TAG, n, peer);
                    self.metrics.record_received(n);
                    self.events.dispatch_data(&sender, &buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    if self.is_running() {
                        log::debug!("[{}] read from {} failed: {}", TAG, peer, e);
                        self.metrics.record_recv_error();
                    }
                    break;
                }
            }
        }

        if self.registry.remove_handle(&peer, &handle) {
            self.metrics.record_session_closed();
            log::info!(
                "[{}] peer {} disconnected ({} sessions left)",
                TAG,
                peer,
                self.registry.len()
            );
        }
    }

    fn broadcast_loop(&self, rx: Receiver<Vec<u8>>) {
        // Ends when close() drops the sender.
        for payload in rx.iter() {
            for (peer, handle) in self.registry.snapshot() {
                match (&*handle).write_all(&payload) {
                    Ok(()) => self.metrics.record_sent(payload.len()),
                    Err(e) => {
                        log::warn!("[{}] write to {} failed: {}", TAG, peer, e);
                        self.metrics.record_send_failure();
                        if self.registry.remove_handle(&peer, &handle) {
                            self.metrics.record_session_closed();
                        }
                    }
                }
            }
        }
        log::debug!("[{}] broadcast loop exited", TAG);
    }
}

impl Connection for TcpServerConnection {
    /// Bound endpoint while listening, configured endpoint otherwise.
    fn address(&self) -> String {
        match self.local_addr() {
            Some(addr) => addr.to_string(),
            None => SocketAddr::new(self.inner.config.listen_address, self.inner.config.listen_port)
                .to_string(),
        }
    }

    fn open(&self) -> bool {
        self.close();

        if let Err(e) = self.inner.config.validate() {
            log::warn!("[{}] cannot open: {}", TAG, e);
            return false;
        }
        match self.inner.start() {
            Ok(local) => {
                log::info!("[{}] listening on {}", TAG, local);
                true
            }
            Err(e) => {
                log::warn!("[{}] cannot listen: {}", TAG, e);
                self.close();
                false
            }
        }
    }

    fn close(&self) {
        let inner = &self.inner;
        let was_running = inner.running.swap(false, Ordering::AcqRel);

        let waker = inner.waker.lock().take();
        if let Some(waker) = waker {
            if let Err(e) = waker.wake() {
                log::debug!("[{}] wake on close: {}", TAG, e);
            }
        }
        let acceptor = inner.acceptor.lock().take();
        if let Some(worker) = acceptor {
            worker.stop(SHUTDOWN_GRACE);
        }

        // No admits after the acceptor is gone; closing the handles ends the
        // session reads.
        let closed = inner.registry.clear();
        for _ in 0..closed {
            inner.metrics.record_session_closed();
        }

        inner.broadcast_tx.lock().take();
        let broadcaster = inner.broadcaster.lock().take();
        if let Some(worker) = broadcaster {
            worker.stop(SHUTDOWN_GRACE);
        }

        let sessions: Vec<Worker> = inner.sessions.lock().drain(..).collect();
        for worker in sessions {
            worker.stop(SHUTDOWN_GRACE);
        }

        inner.local_addr.lock().take();
        inner.events.set_connected(false);
        if was_running {
            log::info!("[{}] closed ({} sessions dropped)", TAG, closed);
        }
    }

    /// Queue `payload` for every connected client. Returns `false` when the
    /// server is not listening or has no clients.
    fn send(&self, payload: &[u8]) -> bool {
        let inner = &self.inner;
        if !inner.is_running() || inner.registry.is_empty() {
            return false;
        }
        let tx = inner.broadcast_tx.lock();
        tx.as_ref()
            .is_some_and(|tx| tx.send(payload.to_vec()).is_ok())
    }

    /// Bind and start accepting, if not already listening.
    fn start_receive(&self) {
        if self.inner.is_running() {
            return;
        }
        if let Err(e) = self.inner.start() {
            log::warn!("[{}] cannot listen: {}", TAG, e);
            self.close();
        }
    }

    fn events(&self) -> &EventHub {
        &self.inner.events
    }

    fn stats(&self) -> LinkStatsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl Drop for TcpServerConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TcpServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServerConnection")
            .field("address", &self.address())
            .field("sessions", &self.session_count())
            .finish()
    }
}
