//! Connection handler
//!
//! One task per accepted socket: reads the auth line under a deadline,
//! asks the event loop to admit the client, then forwards every message it
//! reads while draining the client's outbox into the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::Client;
use crate::error::AuthError;
use crate::hooks::Hooks;
use crate::message::{split_first_line, split_messages, ChunkDecoder};
use crate::server::Event;
use crate::types::ClientId;

/// Everything a connection task needs from the server
#[derive(Clone)]
pub struct ConnectionContext {
    pub hooks: Arc<dyn Hooks>,
    pub events: mpsc::Sender<Event>,
    /// Server-wide shutdown flag
    pub shutdown: CancellationToken,
    /// `None` disables the auth deadline
    pub auth_timeout: Option<Duration>,
    pub read_buffer_size: usize,
}

/// Handle a new TCP connection
///
/// Returns an error only when the client never got admitted; nothing was
/// reported to the event loop in that case. Once admitted, failures are
/// reported as `ClientReadFailed` and the function returns `Ok`.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: ConnectionContext,
) -> Result<(), AuthError> {
    let (mut reader, writer) = stream.into_split();
    let mut buf = vec![0u8; ctx.read_buffer_size];
    let mut decoder = ChunkDecoder::new();

    let chunk = read_auth_chunk(&mut reader, &mut buf, &mut decoder, &ctx).await?;
    let (line, rest) = split_first_line(&chunk);
    let (user, room) = ctx.hooks.on_auth(line)?;
    let pending: Vec<String> = split_messages(rest).map(str::to_string).collect();

    let id = ClientId::new();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let closer = ctx.shutdown.child_token();
    let client = Client::new(id, user.clone(), room.clone(), outbox_tx, closer.clone());

    // Wait for the loop to register us before reading any message
    let (ack, admitted) = oneshot::channel();
    ctx.events
        .send(Event::ClientJoined { client, ack })
        .await
        .map_err(|_| AuthError::ServerClosed)?;
    match admitted.await {
        Ok(true) => {}
        Ok(false) => return Err(AuthError::UserTaken(user)),
        Err(_) => return Err(AuthError::ServerClosed),
    }

    info!("Client {} ({} in {}) connected from {}", id, user, room, peer);

    let session = Session {
        id,
        user,
        room,
        closer,
    };
    tokio::join!(
        session.read_loop(reader, buf, decoder, pending, &ctx),
        write_loop(writer, outbox_rx, ctx.shutdown.clone(), id),
    );

    debug!("Connection task ended for {}", id);
    Ok(())
}

/// Read the first chunk, bounded by the auth deadline and by shutdown
async fn read_auth_chunk(
    reader: &mut OwnedReadHalf,
    buf: &mut [u8],
    decoder: &mut ChunkDecoder,
    ctx: &ConnectionContext,
) -> Result<String, AuthError> {
    let read = async {
        match ctx.auth_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, reader.read(buf)).await {
                Ok(read) => read.map_err(AuthError::from),
                Err(_) => Err(AuthError::Timeout),
            },
            None => reader.read(buf).await.map_err(AuthError::from),
        }
    };

    let n = tokio::select! {
        _ = ctx.shutdown.cancelled() => return Err(AuthError::ServerClosed),
        n = read => n?,
    };
    if n == 0 {
        return Err(AuthError::Closed);
    }

    Ok(decoder.decode(&buf[..n]))
}

/// Read-side state of an admitted client
struct Session {
    id: ClientId,
    user: String,
    room: String,
    /// Cancelled when the event loop closes this client
    closer: CancellationToken,
}

impl Session {
    async fn read_loop(
        &self,
        mut reader: OwnedReadHalf,
        mut buf: Vec<u8>,
        mut decoder: ChunkDecoder,
        pending: Vec<String>,
        ctx: &ConnectionContext,
    ) {
        for text in pending {
            if !self.forward(text, ctx).await {
                return;
            }
        }

        loop {
            let read = tokio::select! {
                _ = self.closer.cancelled() => {
                    debug!("Client {} closed by server", self.id);
                    return;
                }
                read = reader.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    debug!("Client {} closed the connection", self.id);
                    break;
                }
                Ok(n) => {
                    let chunk = decoder.decode(&buf[..n]);
                    for text in split_messages(&chunk) {
                        if !self.forward(text.to_string(), ctx).await {
                            return;
                        }
                    }
                }
                Err(e) => {
                    debug!("read error for {}: {}", self.id, e);
                    break;
                }
            }
        }

        // The loop is already closing every client during shutdown
        if ctx.shutdown.is_cancelled() || self.closer.is_cancelled() {
            return;
        }
        let _ = ctx
            .events
            .send(Event::ClientReadFailed {
                id: self.id,
                user: self.user.clone(),
            })
            .await;
    }

    /// Returns false once the event loop is gone
    async fn forward(&self, text: String, ctx: &ConnectionContext) -> bool {
        ctx.events
            .send(Event::MessageReceived {
                id: self.id,
                user: self.user.clone(),
                room: self.room.clone(),
                text,
            })
            .await
            .is_ok()
    }
}

/// Drain the outbox into the socket until the registry drops the client
///
/// Write errors are not reported; the entry stays registered until its read
/// side fails. A write stuck on a stalled peer is abandoned at shutdown.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
    id: ClientId,
) {
    while let Some(bytes) = outbox.recv().await {
        let written = tokio::select! {
            biased;
            written = writer.write_all(&bytes) => written,
            _ = shutdown.cancelled() => {
                debug!("Write to {} abandoned at shutdown", id);
                return;
            }
        };
        if let Err(e) = written {
            debug!("write error for {}: {}", id, e);
            return;
        }
    }

    let _ = writer.shutdown().await;
    debug!("Write task ended for {}", id);
}
