// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by all transports.
//!
//! Errors never cross the [`Connection`](crate::Connection) boundary: the
//! public contract reports `bool` and logs the [`LinkError`] description.
//! The type is public because configuration loading and the serial backend
//! return it directly.

use std::io;
use thiserror::Error;

/// Errors raised while configuring or opening a link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),

    #[cfg(feature = "config-files")]
    #[error("config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),
}

impl LinkError {
    pub(crate) fn invalid_address(addr: &str, reason: impl ToString) -> Self {
        Self::InvalidAddress {
            addr: addr.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience alias for results carrying a [`LinkError`].
pub type Result<T> = std::result::Result<T, LinkError>;
