// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E tests for server lifecycle: idle eviction and graceful shutdown.

mod common;

use std::time::Duration;

use common::{TestContext, wait_until};
use fleetd_protocol::client::ClientError;
use fleetd_protocol::messages::{AgvStatus, Point};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_idle_connection_is_evicted() {
    let ctx = TestContext::start_with(|config| {
        config.tcp_timeout = Duration::from_millis(500);
    })
    .await;

    let mut client = ctx.login(101, Point::new(1, 1)).await;
    assert_eq!(ctx.state.world.online_count(), 1);

    // Send nothing. The 1 Hz tick notices the idle connection and closes
    // it, which also logs the vehicle out of the world.
    let state = ctx.state.clone();
    assert!(
        wait_until(
            move || state.sessions.connection_count() == 0,
            Duration::from_secs(4)
        )
        .await,
        "idle connection survived the eviction sweep"
    );
    assert_eq!(ctx.state.world.online_count(), 0);

    let next = client.recv_within(2_000).await;
    assert!(matches!(
        next,
        Err(ClientError::Frame(_)) | Err(ClientError::Io(_))
    ));
}

#[tokio::test]
async fn test_active_connection_survives_eviction_sweeps() {
    let ctx = TestContext::start_with(|config| {
        config.tcp_timeout = Duration::from_millis(800);
    })
    .await;

    let mut client = ctx.login(101, Point::new(1, 1)).await;

    // Heartbeat faster than the timeout for a few sweep cycles.
    for _ in 0..8 {
        client
            .send_heartbeat(101, AgvStatus::Idle, Point::new(1, 1), 95.0)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            ctx.state.sessions.connection_count(),
            1,
            "live connection was evicted"
        );
    }
    assert_eq!(ctx.state.world.online_count(), 1);
}

#[tokio::test]
async fn test_graceful_shutdown_stops_accepting() {
    use fleetd_core::config::Config;
    use fleetd_core::map::GridMap;
    use fleetd_core::server::FleetServer;
    use fleetd_core::state::ServerState;
    use fleetd_protocol::client::{FleetClient, FleetClientConfig};

    let config = Config {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    };
    let state = ServerState::new(config, GridMap::default_bordered());
    let server = FleetServer::bind(state.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.run(shutdown.clone()));

    // Server accepts while running.
    let client = FleetClient::connect(FleetClientConfig {
        server_addr: addr,
        ..Default::default()
    })
    .await;
    assert!(client.is_ok());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop after shutdown")
        .unwrap();

    // The listener is gone; fresh connections are refused or time out.
    let refused = FleetClient::connect(FleetClientConfig {
        server_addr: addr,
        connect_timeout_ms: 500,
        ..Default::default()
    })
    .await;
    assert!(refused.is_err());
}
