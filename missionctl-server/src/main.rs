//! Mission control server.
//!
//! An axum WebSocket server holding tasks, agents, comments and the
//! activity feed in memory and pushing live board snapshots to clients.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9400
//! cargo run --bin missionctl-server
//!
//! # Run on custom address
//! cargo run --bin missionctl-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! MISSIONCTL_ADDR=127.0.0.1:8080 cargo run --bin missionctl-server
//! ```

use std::sync::Arc;

use clap::Parser;
use missionctl_server::activity::ActivityFeed;
use missionctl_server::config::{ServerCliArgs, ServerConfig};
use missionctl_server::server::{self, ServerState};
use missionctl_server::service::MissionControl;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting mission control server");

    let mission = MissionControl::with_activity(ActivityFeed::with_capacity(
        config.activity_capacity,
    ));
    let state = Arc::new(ServerState::with_config(config.max_payload_size, mission));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
