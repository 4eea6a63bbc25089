// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The capability set shared by every transport.

use crate::events::{ConnectionState, EventHub, SubscriptionId};
use crate::metrics::LinkStatsSnapshot;

/// A byte-oriented device connection.
///
/// All methods take `&self`: connections are shared between the owner, the
/// background loops and observer callbacks, so state lives behind interior
/// locks. Errors never cross this boundary; operations report `bool` and
/// log the cause.
///
/// # Lifecycle
///
/// ```text
///   new() --open()--> running --close()--> closed
///                       |  ^
///                       |  +-- open() again closes first, then restarts
///                       v
///          receive loop / reconnect / heartbeat threads
/// ```
pub trait Connection: Send + Sync {
    /// Transport-specific address: port name, remote endpoint or local
    /// listen endpoint. Empty for [`NullConnection`](crate::NullConnection).
    fn address(&self) -> String;

    /// Open the transport and start receiving.
    ///
    /// Any previous session is closed first. Returns `false` on
    /// configuration or bind errors.
    fn open(&self) -> bool;

    /// Stop all background loops and release handles.
    ///
    /// Safe to call at any time, repeatedly, and from observer callbacks.
    fn close(&self);

    /// Send raw bytes. Returns `false` if not connected or the write failed.
    fn send(&self, payload: &[u8]) -> bool;

    /// Start the background receive loop. Called by [`open`](Self::open).
    fn start_receive(&self);

    /// Event hub holding the state and the observer lists.
    fn events(&self) -> &EventHub;

    /// Counter snapshot.
    fn stats(&self) -> LinkStatsSnapshot;

    fn state(&self) -> ConnectionState {
        self.events().state()
    }

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Register a data-received observer: `(sender_address, payload)`.
    fn on_data_received(
        &self,
        callback: Box<dyn Fn(&str, &[u8]) + Send + Sync>,
    ) -> SubscriptionId {
        self.events().on_data_received(callback)
    }

    /// Register a status-changed observer: `connected`.
    fn on_status_changed(&self, callback: Box<dyn Fn(bool) + Send + Sync>) -> SubscriptionId {
        self.events().on_status_changed(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events().unsubscribe(id)
    }
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address())
            .field("state", &self.state())
            .finish()
    }
}
