// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for fleetd-core E2E tests.
//!
//! Provides a TestContext that boots a real server on an ephemeral port and
//! connects protocol clients to it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use fleetd_core::config::Config;
use fleetd_core::map::GridMap;
use fleetd_core::server::FleetServer;
use fleetd_core::state::{ServerState, SharedState};
use fleetd_protocol::client::{FleetClient, FleetClientConfig};
use fleetd_protocol::messages::Point;

/// Test context that manages server state and client connections.
pub struct TestContext {
    pub state: SharedState,
    pub addr: SocketAddr,
    shutdown: CancellationToken,
}

impl TestContext {
    /// Boot a server on 127.0.0.1:0 with the default 10x10 bordered map.
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Boot a server with test-specific configuration tweaks.
    pub async fn start_with(tweak: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        tweak(&mut config);

        let state = ServerState::new(config, GridMap::default_bordered());
        let server = FleetServer::bind(state.clone())
            .await
            .expect("failed to bind test server");
        let addr = server.local_addr().expect("no local addr");

        let shutdown = CancellationToken::new();
        tokio::spawn(server.run(shutdown.clone()));

        Self {
            state,
            addr,
            shutdown,
        }
    }

    /// Connect a raw client.
    pub async fn client(&self) -> FleetClient {
        FleetClient::connect(FleetClientConfig {
            server_addr: self.addr,
            ..Default::default()
        })
        .await
        .expect("failed to connect test client")
    }

    /// Connect and log in as `agv_id` at `pos`, asserting success.
    pub async fn login(&self, agv_id: i32, pos: Point) -> FleetClient {
        let mut client = self.client().await;
        let resp = client
            .login(agv_id, "123456", pos)
            .await
            .expect("login call failed");
        assert!(resp.success, "login rejected: {}", resp.message);
        client
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll `cond` until it holds or `timeout` elapses; returns the final state.
pub async fn wait_until(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
