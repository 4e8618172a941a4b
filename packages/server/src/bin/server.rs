//! Kaigi signaling server.
//!
//! Relays WebRTC signaling and chat messages between the participants of a meeting.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin kaigi-server -- --open-meetings
//! cargo run --bin kaigi-server -- --host 0.0.0.0 --port 3000 --meeting standup --meeting retro
//! ```

use std::sync::Arc;

use clap::Parser;
use kaigi_server::{config::ServerConfig, ui::Server};
use kaigi_shared::{logger::setup_logger, time::SystemClock};

#[tokio::main]
async fn main() {
    let config = ServerConfig::parse();

    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), &config.log_level);

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let server = match Server::from_config(&config, Arc::new(SystemClock)) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
