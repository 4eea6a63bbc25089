// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Placeholder transport.

use crate::connection::Connection;
use crate::events::EventHub;
use crate::metrics::LinkStatsSnapshot;

/// A connection that never connects. Useful as a default before the real
/// transport is configured.
#[derive(Debug)]
pub struct NullConnection {
    events: EventHub,
}

impl NullConnection {
    pub fn new() -> Self {
        Self {
            events: EventHub::new("NULL"),
        }
    }
}

impl Default for NullConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for NullConnection {
    fn address(&self) -> String {
        String::new()
    }

    fn open(&self) -> bool {
        false
    }

    fn close(&self) {}

    fn send(&self, _payload: &[u8]) -> bool {
        false
    }

    fn start_receive(&self) {}

    fn events(&self) -> &EventHub {
        &self.events
    }

    fn stats(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_everything_is_a_no_op() {
        let conn = NullConnection::new();
        assert_eq!(conn.address(), "");
        assert!(!conn.open());
        assert!(!conn.send(b"hello"));
        conn.start_receive();
        conn.close();
        conn.close();
        assert!(!conn.is_connected());
    }
}
