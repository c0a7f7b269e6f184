//! Conquest multiplayer game server.

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod room;
mod server;

use config::ServerConfig;
use server::ServerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;

    info!("Starting Conquest server...");

    let maps = config.load_maps()?;
    info!(maps = maps.len(), seeded = config.seed.is_some(), "maps ready");

    let state = Arc::new(ServerState::new(maps, config.seed));

    if config.demo_game {
        let id = state.create_game("alpha")?;
        info!(game = %id, "demo lobby open on the alpha map");
    }

    server::run_server(config.addr, state).await
}
