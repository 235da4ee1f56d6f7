//! Error types for the relay
//!
//! Server-level errors (start, stop, talking to the event loop) and
//! per-connection authentication errors. Uses thiserror for ergonomic
//! error definitions.

use std::net::SocketAddr;

use thiserror::Error;

/// Server-level errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listening socket could not be bound (fatal - server does not start)
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The event loop has exited and no longer accepts events
    #[error("event loop closed")]
    LoopClosed,

    /// The server already went through shutdown
    #[error("server already stopped")]
    AlreadyStopped,
}

/// Authentication handshake errors
///
/// Any of these closes the connection without raising an event.
#[derive(Debug, Error)]
pub enum AuthError {
    /// First line did not match `a <user> <room>`
    #[error("malformed auth request <{0}>")]
    Malformed(String),

    /// No auth line arrived within the deadline
    #[error("auth timed out")]
    Timeout,

    /// Peer closed the connection before authenticating
    #[error("connection closed before auth")]
    Closed,

    /// IO error while reading the auth line
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Another connected client already uses this name
    #[error("user {0} is already connected")]
    UserTaken(String),

    /// Event loop is gone (server shutting down)
    #[error("server closed")]
    ServerClosed,
}
