//! Rendezvous relay server -- room-scoped signaling for peer-to-peer sessions.
//!
//! An axum WebSocket server that lets peers discover each other inside named
//! rooms and exchange opaque signaling payloads. The relay never interprets
//! the payloads it forwards.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8080
//! cargo run --bin rendezvous-relay
//!
//! # Run on custom address
//! cargo run --bin rendezvous-relay -- --bind 127.0.0.1:9000
//!
//! # Or via environment variable
//! RENDEZVOUS_ADDR=127.0.0.1:9000 cargo run --bin rendezvous-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use rendezvous_relay::config::{RelayCliArgs, RelayConfig};
use rendezvous_relay::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting rendezvous relay");

    let state = Arc::new(RelayState::with_config(&config));

    match relay::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
        Ok((bound_addr, mut handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            tokio::select! {
                result = &mut handle => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "relay server task failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested, closing connections");
                    state.close_all_connections().await;
                    // Let writer tasks flush the close frames.
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    handle.abort();
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
