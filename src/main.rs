//! Room Relay - Entry Point
//!
//! Runs a small room chat on top of the relay: joins and leaves are
//! announced to the room and every message is relayed as `user: text`.

use std::env;

use tracing::info;
use tracing_subscriber::EnvFilter;

use room_relay::config::DEFAULT_PORT;
use room_relay::{Hooks, LoopContext, Relay, Server, ServerConfig};

/// Room chat hooks
struct RoomChat;

impl Hooks for RoomChat {
    fn on_connect(&self, ctx: &mut LoopContext<'_>, user: &str, room: &str) {
        info!("{} joined {} ({} here)", user, room, ctx.room_count(room));
        ctx.send_to_room(room, format!("* {} joined\n", user));
    }

    fn on_disconnect(&self, ctx: &mut LoopContext<'_>, user: &str, room: &str) {
        ctx.send_to_room(room, format!("* {} left\n", user));
    }

    fn on_message(&self, ctx: &mut LoopContext<'_>, user: &str, room: &str, message: &str) {
        ctx.send_to_room(room, format!("{}: {}\n", user, message));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // e.g., RUST_LOG=debug or RUST_LOG=room_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("room_relay=info")),
        )
        .init();

    // Port from command line or default
    let port = match env::args().nth(1) {
        Some(arg) => arg.parse::<u16>()?,
        None => DEFAULT_PORT,
    };
    let debug = env::var("RELAY_DEBUG").is_ok_and(|v| v == "1");

    let mut config = ServerConfig::with_port(port);
    if debug {
        info!("debug mode: auth deadline disabled");
        config = config.with_debug(true);
    }

    Server::start_with_config_and_wait_for_signal(config, RoomChat).await?;

    Ok(())
}
