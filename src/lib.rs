//! Embeddable TCP Room Relay
//!
//! Groups connected clients into named rooms and lets the embedding
//! application react to joins, leaves and messages, and push bytes or
//! disconnects back into the connection set.
//!
//! # Wire protocol
//! - First line: `a <user> <room>`, within the auth deadline
//! - Every later line: one message, trimmed, handed to `on_message`
//! - Server → client: raw bytes as supplied by the embedder
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `EventLoop` is the single owner of the client registry
//! - Each connection has a `handler` task forwarding events to the loop
//! - Hooks run on the loop and act through a `LoopContext`; other tasks use
//!   a `ServerHandle`, whose commands are queued by helper tasks
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use room_relay::{Hooks, LoopContext, Relay, Server};
//!
//! struct Echo;
//!
//! impl Hooks for Echo {
//!     fn on_message(&self, ctx: &mut LoopContext<'_>, user: &str, _room: &str, msg: &str) {
//!         ctx.send_to_user(user, msg.to_string());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = Server::start(4009, Echo).await.unwrap();
//!     server.send_to_room("lobby", "hello\n");
//!     server.stop().await;
//! }
//! ```

pub mod acceptor;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod hooks;
pub mod lifecycle;
pub mod message;
pub mod registry;
pub mod relay;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use client::Client;
pub use config::ServerConfig;
pub use error::{AuthError, ServerError};
pub use hooks::{DefaultHooks, Hooks};
pub use lifecycle::{Lifecycle, Server};
pub use registry::Registry;
pub use relay::{LoopContext, Relay, ServerHandle};
pub use server::{Event, EventLoop, Stats};
pub use types::ClientId;
