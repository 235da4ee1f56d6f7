//! Accept loop
//!
//! Owns the listening socket and spawns one connection task per inbound
//! socket until shutdown.

use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::handler::{handle_connection, ConnectionContext};

/// Accept connections until the shutdown token fires
///
/// Connection tasks are spawned on `tracker` so shutdown can wait for them.
/// The listener is dropped (closed) on return.
pub async fn run(listener: TcpListener, ctx: ConnectionContext, tracker: TaskTracker) {
    loop {
        let accepted = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        // An accept that raced the shutdown is discarded
        if ctx.shutdown.is_cancelled() {
            debug!("Accept returned during shutdown, dropping connection");
            break;
        }

        match accepted {
            Ok((stream, peer)) => {
                debug!("New TCP connection from {}", peer);
                let ctx = ctx.clone();
                tracker.spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, ctx).await {
                        warn!("auth error from {}: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }

    drop(listener);
    info!("Acceptor stopped");
}
