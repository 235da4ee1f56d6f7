//! Server lifecycle
//!
//! Starts the acceptor and the event loop, and coordinates shutdown:
//! `Running → Draining → Stopped`. Stopping flips the shutdown token (which
//! also closes the listener), asks the event loop to disconnect everyone,
//! then waits until every tracked task has exited.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::acceptor;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handler::ConnectionContext;
use crate::hooks::Hooks;
use crate::relay::ServerHandle;
use crate::server::{EventLoop, Stats};

/// Shutdown state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    Draining,
    Stopped,
}

/// A running relay
///
/// Dropping a server that was never stopped starts its shutdown without
/// waiting for it.
#[derive(Debug)]
pub struct Server {
    state: Lifecycle,
    local_addr: SocketAddr,
    handle: ServerHandle,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Server {
    /// Listen on every interface at `port`
    pub async fn start(port: u16, hooks: impl Hooks) -> Result<Self, ServerError> {
        Self::start_with_config(ServerConfig::with_port(port), hooks).await
    }

    /// Bind, then spawn the event loop and the acceptor
    ///
    /// Fails with [`ServerError::Bind`] and leaves nothing running if the
    /// address cannot be bound.
    pub async fn start_with_config(
        config: ServerConfig,
        hooks: impl Hooks,
    ) -> Result<Self, ServerError> {
        info!("starting server on {}", config.addr);
        let listener = TcpListener::bind(config.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let hooks: Arc<dyn Hooks> = Arc::new(hooks);
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let handle = ServerHandle::new(events_tx.clone(), tracker.clone());

        let event_loop = EventLoop::new(
            events_rx,
            handle.clone(),
            Arc::clone(&hooks),
            shutdown.clone(),
        );
        tracker.spawn(event_loop.run());

        let ctx = ConnectionContext {
            hooks,
            events: events_tx,
            shutdown: shutdown.clone(),
            auth_timeout: config.effective_auth_timeout(),
            read_buffer_size: config.read_buffer_size,
        };
        tracker.spawn(acceptor::run(listener, ctx, tracker.clone()));

        info!("listening on {}", local_addr);
        Ok(Self {
            state: Lifecycle::Running,
            local_addr,
            handle,
            shutdown,
            tracker,
        })
    }

    /// Run until SIGINT or SIGTERM, then stop
    ///
    /// SIGQUIT logs uptime and the connection count and keeps running.
    pub async fn start_and_wait_for_signal(
        port: u16,
        hooks: impl Hooks,
    ) -> Result<(), ServerError> {
        Self::start_with_config_and_wait_for_signal(ServerConfig::with_port(port), hooks).await
    }

    /// [`Server::start_and_wait_for_signal`] with explicit settings
    pub async fn start_with_config_and_wait_for_signal(
        config: ServerConfig,
        hooks: impl Hooks,
    ) -> Result<(), ServerError> {
        let mut server = Self::start_with_config(config, hooks).await?;
        let waited = server.wait_for_signal().await;
        server.stop().await;
        waited
    }

    #[cfg(unix)]
    async fn wait_for_signal(&self) -> Result<(), ServerError> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigquit = signal(SignalKind::quit())?;

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("SIGINT received - shutting down");
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received - shutting down");
                    return Ok(());
                }
                _ = sigquit.recv() => self.dump_stats().await,
            }
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_signal(&self) -> Result<(), ServerError> {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl+C received - shutting down");
        Ok(())
    }

    /// Stop accepting, disconnect every client and wait for all tasks
    ///
    /// Returns once fully drained. Calling it again is a no-op.
    pub async fn stop(&mut self) {
        if self.state == Lifecycle::Stopped {
            return;
        }

        info!("shutting down...");
        self.state = Lifecycle::Draining;
        self.shutdown.cancel();

        if let Err(e) = self.handle.request_shutdown().await {
            debug!("shutdown request not delivered: {}", e);
        }

        self.tracker.close();
        self.tracker.wait().await;
        self.state = Lifecycle::Stopped;
        info!("bye!");
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// Address actually bound (useful when started on port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for issuing commands from other tasks
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Number of live tasks: acceptor, event loop, connections and helpers
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    pub fn send_to(&self, user: &str, bytes: impl Into<Bytes>) {
        self.handle.send_to(user, bytes);
    }

    pub fn send_to_room(&self, room: &str, bytes: impl Into<Bytes>) {
        self.handle.send_to_room(room, bytes);
    }

    pub async fn stats(&self) -> Result<Stats, ServerError> {
        if self.state == Lifecycle::Stopped {
            return Err(ServerError::AlreadyStopped);
        }
        self.handle.stats().await
    }

    /// Log uptime and connected clients
    pub async fn dump_stats(&self) {
        match self.stats().await {
            Ok(stats) => info!(
                "uptime: {:?}, connected clients: {}",
                stats.uptime, stats.clients
            ),
            Err(e) => warn!("stats unavailable: {}", e),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.state == Lifecycle::Running {
            self.shutdown.cancel();
            if !self.handle.try_request_shutdown() {
                warn!("server dropped while running; event loop did not get the shutdown request");
            }
            self.tracker.close();
        }
    }
}
