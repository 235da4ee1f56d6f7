//! Client struct definition
//!
//! An admitted connection as seen by the event loop: identity, room, the
//! outbound byte channel and the token that closes the connection.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::ClientId;

/// Connected client
///
/// Owned by the registry from admission until removal. The connection task
/// keeps only the socket's read half and the receiving ends of `outbox`
/// and `closer`.
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for this client
    pub id: ClientId,
    /// User name, unique while connected
    pub user: String,
    /// Room assigned at auth time, fixed for the client's lifetime
    pub room: String,
    /// Server → client bytes, drained into the socket by the connection task
    outbox: mpsc::UnboundedSender<Bytes>,
    /// Cancelled when the event loop closes this client
    closer: CancellationToken,
}

impl Client {
    /// Create a new client with the given identity and stream handles
    pub fn new(
        id: ClientId,
        user: String,
        room: String,
        outbox: mpsc::UnboundedSender<Bytes>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            id,
            user,
            room,
            outbox,
            closer,
        }
    }

    /// Queue bytes for this client
    ///
    /// Best effort: returns false if the connection's writer is already gone.
    pub fn send(&self, bytes: Bytes) -> bool {
        self.outbox.send(bytes).is_ok()
    }

    /// Close the client's stream
    ///
    /// Consumes the client: the outbox is dropped so the writer flushes what
    /// is queued and shuts the socket, and the reader is cancelled.
    pub fn close(self) {
        self.closer.cancel();
    }
}
