// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP server for fleetd.
//!
//! Accepts vehicle connections and hands each one to the connection engine.
//! A 1 Hz tick drives the two periodic sweeps: idle-connection eviction and
//! the RPC timeout scan.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connection::serve_connection;
use crate::error::CoreError;
use crate::state::SharedState;

pub struct FleetServer {
    listener: TcpListener,
    state: SharedState,
}

impl FleetServer {
    /// Bind the listen socket from the state's configuration.
    pub async fn bind(state: SharedState) -> Result<Self, CoreError> {
        let listener = TcpListener::bind(state.config.bind_addr).await?;
        info!(
            addr = %state.config.bind_addr,
            io_threads = state.config.io_threads,
            workers = state.workers.capacity(),
            tcp_timeout_s = state.config.tcp_timeout.as_secs(),
            rpc_timeout_ms = state.config.rpc_timeout.as_millis() as u64,
            "fleet server bound"
        );
        Ok(Self { listener, state })
    }

    /// The actual bound address (relevant when the port was 0).
    pub fn local_addr(&self) -> Result<SocketAddr, CoreError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run until `shutdown` fires: accept loop plus the maintenance tick.
    pub async fn run(self, shutdown: CancellationToken) {
        let tick_state = self.state.clone();
        let tick_cancel = shutdown.clone();
        let tick = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        tick_state.sessions.evict_idle(tick_state.config.tcp_timeout);
                        tick_state
                            .sessions
                            .check_all_timeouts(tick_state.config.rpc_timeout.as_millis() as i64);
                    }
                }
            }
        });

        info!("fleet server running");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, accept loop stopping");
                    break;
                }

                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let state = self.state.clone();
                        tokio::spawn(async move {
                            serve_connection(state, stream, peer).await;
                        });
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                        warn!("accept interrupted, retrying");
                        continue;
                    }
                    Err(e) => {
                        // Fatal accept error: nothing sensible to do but let
                        // the operator restart the process.
                        error!(error = %e, "fatal accept error, server exiting");
                        break;
                    }
                }
            }
        }

        let _ = tick.await;
        info!("fleet server stopped");
    }
}
