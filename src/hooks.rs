//! Embedder extension points
//!
//! The relay calls into a [`Hooks`] implementation supplied at construction
//! time. Every method has a default: auth parses `a <user> <room>`, the
//! other three log a warning and do nothing.

use tracing::warn;

use crate::error::AuthError;
use crate::message;
use crate::relay::LoopContext;

/// Callbacks invoked by the relay
///
/// `on_auth` runs on the connection's own task. The other three run on the
/// event loop and get a [`LoopContext`] that acts on the registry directly.
/// They must not block: the whole relay waits for them to return.
pub trait Hooks: Send + Sync + 'static {
    /// Turn the auth line into `(user, room)`
    fn on_auth(&self, line: &str) -> Result<(String, String), AuthError> {
        message::parse_auth(line)
    }

    fn on_connect(&self, _ctx: &mut LoopContext<'_>, user: &str, room: &str) {
        warn!("OnConnect default handler ({} in {})", user, room);
    }

    fn on_disconnect(&self, _ctx: &mut LoopContext<'_>, user: &str, room: &str) {
        warn!("OnDisconnect default handler ({} in {})", user, room);
    }

    fn on_message(&self, _ctx: &mut LoopContext<'_>, user: &str, room: &str, message: &str) {
        warn!(
            "OnMessage default handler ({} in {}: {} bytes)",
            user,
            room,
            message.len()
        );
    }
}

/// Hooks with every default in place
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl Hooks for DefaultHooks {}
