// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fleetd-core.
//!
//! Errors stay on the boot/infrastructure path. Per-frame failures never
//! become `CoreError`s: malformed payloads are logged and dropped by the
//! router, protocol violations force-close the connection, and dispatch
//! failures surface through the RPC result callback instead.

use crate::config::ConfigError;

/// Result type using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while booting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Listener could not be created or the accept loop failed fatally.
    #[error("bind error: {0}")]
    Bind(#[from] std::io::Error),

    /// The world map could not be built from its source.
    #[error("map error ({source_desc}): {reason}")]
    MapLoad {
        /// Where the map was supposed to come from (file path or mode).
        source_desc: String,
        reason: String,
    },

    /// Configuration was missing or unparseable.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl CoreError {
    pub(crate) fn map_load(source_desc: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::MapLoad {
            source_desc: source_desc.into(),
            reason: reason.into(),
        }
    }
}
