//! Dealbox Game Server
//!
//! Authoritative server for a Deal-or-No-Deal-style party game.
//! All state is in-memory; a restart discards rooms, chat and the
//! global leaderboard.

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use dealbox::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Dealbox Server v{}", VERSION);

    let config = ServerConfig::from_env();
    info!("Starting WebSocket server on {}", config.bind_addr);

    let server = GameServer::new(config);
    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
    }
}
