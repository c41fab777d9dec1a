// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleetd - AGV Fleet Control Server
//!
//! Boot order: logging, configuration, world map, state wiring, listener.
//! SIGINT/SIGTERM trigger a graceful shutdown; a failure anywhere during
//! boot exits non-zero.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fleetd_core::config::Config;
use fleetd_core::map::GridMap;
use fleetd_core::server::FleetServer;
use fleetd_core::state::ServerState;

fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleetd_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting fleetd");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        addr = %config.bind_addr,
        io_threads = config.io_threads,
        worker_threads = config.worker_threads,
        map_mode = ?config.map.mode,
        "Configuration loaded"
    );

    // The configured I/O thread count sizes the runtime itself; worker
    // threads are bounded separately by the compute pool.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.io_threads)
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let map = build_map(&config);
    let state = ServerState::new(config, map);

    let server = FleetServer::bind(state.clone()).await?;
    info!(addr = %server.local_addr()?, "fleetd listening");

    let shutdown = CancellationToken::new();
    let server_handle = tokio::spawn(server.run(shutdown.clone()));

    wait_for_signal().await?;

    info!("Shutting down...");
    shutdown.cancel();
    let _ = server_handle.await;

    info!("Shutdown complete");
    Ok(())
}

fn build_map(config: &Config) -> GridMap {
    let map = GridMap::from_config(&config.map);
    info!(
        width = map.width(),
        height = map.height(),
        mode = ?config.map.mode,
        "world map initialized"
    );
    // Small maps get a console preview; anything bigger would flood the log.
    if map.width() <= 20 && map.height() <= 20 {
        info!("map preview:\n{}", map.render());
    }
    map
}

async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("SIGINT received");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received");
        }
    }
    Ok(())
}
