// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// How the world map is produced at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Built-in 10x10 bordered map.
    Default,
    /// Load from a whitespace-separated grid file.
    File,
    /// Random obstacles from a seedable RNG.
    Random,
}

/// Map settings; `path` applies to `File`, the rest to `Random`.
#[derive(Debug, Clone)]
pub struct MapConfig {
    pub mode: MapMode,
    pub path: String,
    pub width: i32,
    pub height: i32,
    pub ratio: f64,
    /// Fixed seed for reproducible random maps; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            mode: MapMode::Default,
            path: String::new(),
            width: 50,
            height: 50,
            ratio: 0.1,
            seed: None,
        }
    }
}

/// Fleetd server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP listen address for vehicle connections.
    pub bind_addr: SocketAddr,
    /// Idle connections older than this are evicted by the 1 Hz tick.
    pub tcp_timeout: Duration,
    /// Pending server-originated RPCs older than this fail with "Timeout".
    pub rpc_timeout: Duration,
    /// Tokio runtime worker threads (the I/O side).
    pub io_threads: usize,
    /// Compute pool width for path planning and dispatch rounds.
    pub worker_threads: usize,
    pub map: MapConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8888".parse().unwrap(),
            tcp_timeout: Duration::from_secs(60),
            rpc_timeout: Duration::from_millis(5_000),
            io_threads: 2,
            worker_threads: 2,
            map: MapConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// Optional variables:
    /// - `FLEETD_IP`: listen address (default: 0.0.0.0)
    /// - `FLEETD_PORT`: listen port (default: 8888)
    /// - `FLEETD_TCP_TIMEOUT_S`: idle-connection timeout in seconds (default: 60)
    /// - `FLEETD_RPC_TIMEOUT_MS`: pending-RPC timeout in ms (default: 5000)
    /// - `FLEETD_IO_THREADS`: runtime worker threads (default: 2)
    /// - `FLEETD_WORKER_THREADS`: compute pool width (default: 2)
    /// - `FLEETD_MAP_TYPE`: DEFAULT | FILE | RANDOM (default: DEFAULT)
    /// - `FLEETD_MAP_PATH`: grid file for FILE mode
    /// - `FLEETD_MAP_WIDTH` / `FLEETD_MAP_HEIGHT`: RANDOM dimensions (default: 50)
    /// - `FLEETD_MAP_RATIO`: RANDOM obstacle ratio (default: 0.1)
    /// - `FLEETD_MAP_SEED`: fixed RNG seed for RANDOM mode
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();

        let ip: IpAddr = match std::env::var("FLEETD_IP") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid("FLEETD_IP", "must be an IP address"))?,
            Err(_) => default.bind_addr.ip(),
        };
        let port: u16 = match std::env::var("FLEETD_PORT") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid("FLEETD_PORT", "must be a valid port number"))?,
            Err(_) => default.bind_addr.port(),
        };

        let tcp_timeout_s: u64 = parse_or("FLEETD_TCP_TIMEOUT_S", 60)?;
        let rpc_timeout_ms: u64 = parse_or("FLEETD_RPC_TIMEOUT_MS", 5_000)?;
        let io_threads: usize = parse_or("FLEETD_IO_THREADS", 2)?;
        let worker_threads: usize = parse_or("FLEETD_WORKER_THREADS", 2)?;

        if io_threads == 0 {
            return Err(ConfigError::Invalid("FLEETD_IO_THREADS", "must be >= 1"));
        }
        if worker_threads == 0 {
            return Err(ConfigError::Invalid("FLEETD_WORKER_THREADS", "must be >= 1"));
        }

        let mode = match std::env::var("FLEETD_MAP_TYPE").as_deref() {
            Ok("FILE") => MapMode::File,
            Ok("RANDOM") => MapMode::Random,
            _ => MapMode::Default,
        };

        let map = MapConfig {
            mode,
            path: std::env::var("FLEETD_MAP_PATH").unwrap_or_default(),
            width: parse_or("FLEETD_MAP_WIDTH", 50)?,
            height: parse_or("FLEETD_MAP_HEIGHT", 50)?,
            ratio: parse_or("FLEETD_MAP_RATIO", 0.1)?,
            seed: match std::env::var("FLEETD_MAP_SEED") {
                Ok(v) => Some(
                    v.parse()
                        .map_err(|_| ConfigError::Invalid("FLEETD_MAP_SEED", "must be a u64"))?,
                ),
                Err(_) => None,
            },
        };

        if mode == MapMode::File && map.path.is_empty() {
            return Err(ConfigError::Missing("FLEETD_MAP_PATH"));
        }

        Ok(Self {
            bind_addr: SocketAddr::new(ip, port),
            tcp_timeout: Duration::from_secs(tcp_timeout_s),
            rpc_timeout: Duration::from_millis(rpc_timeout_ms),
            io_threads,
            worker_threads,
            map,
        })
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| ConfigError::Invalid(name, "unparseable value")),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
