//! Command relay
//!
//! Embedders issue sends and disconnects through the [`Relay`] trait. There
//! are two implementations, picked by where the caller runs:
//!
//! - [`LoopContext`] is handed to hooks while the event loop is running
//!   them. It mutates the registry directly, so effects are visible before
//!   the hook returns.
//! - [`ServerHandle`] works from any other task. Each call becomes an
//!   [`Event`] submitted by a short-lived helper task, so the caller never
//!   waits on the loop and cannot deadlock it.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::error::ServerError;
use crate::hooks::Hooks;
use crate::registry::Registry;
use crate::server::{Event, Stats};
use crate::types::ClientId;

/// Commands an embedder can issue against the connection set
///
/// Targets that are not connected are silently ignored: the user may have
/// left between issuing the command and it being applied.
pub trait Relay {
    /// Write raw bytes to one user
    fn send_to_user(&mut self, user: &str, bytes: impl Into<Bytes>);

    /// Write raw bytes to every user in a room
    fn send_to_room(&mut self, room: &str, bytes: impl Into<Bytes>);

    /// Close a user's connection and fire its disconnect hook
    fn disconnect_user(&mut self, user: &str);

    /// Disconnect every user of a room, one by one, over a snapshot of the
    /// room's user names
    fn disconnect_room(&mut self, room: &str);
}

/// Direct access to the relay from inside a hook
///
/// Only exists on the event loop's task; it borrows the registry for the
/// duration of one hook call.
pub struct LoopContext<'a> {
    registry: &'a mut Registry,
    hooks: &'a dyn Hooks,
    handle: &'a ServerHandle,
}

impl<'a> LoopContext<'a> {
    pub(crate) fn new(
        registry: &'a mut Registry,
        hooks: &'a dyn Hooks,
        handle: &'a ServerHandle,
    ) -> Self {
        Self {
            registry,
            hooks,
            handle,
        }
    }

    /// Queued handle, for work that outlives the current hook call
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Number of connected clients
    pub fn count(&self) -> usize {
        self.registry.count()
    }

    pub fn room_count(&self, room: &str) -> usize {
        self.registry.room_count(room)
    }

    pub fn room_user_names(&self, room: &str) -> Vec<String> {
        self.registry.room_user_names(room)
    }

    pub fn is_connected(&self, user: &str) -> bool {
        self.registry.by_name(user).is_some()
    }

    /// Close and remove one client, then fire its disconnect hook
    ///
    /// Returns false if the client was already gone.
    pub(crate) fn disconnect(&mut self, id: ClientId) -> bool {
        let Some(client) = self.registry.remove(id) else {
            return false;
        };

        let user = client.user.clone();
        let room = client.room.clone();
        client.close();
        info!("[audit] {}: {} disconnects", room, user);
        debug!("Total clients: {}", self.registry.count());

        let hooks = self.hooks;
        hooks.on_disconnect(self, &user, &room);
        true
    }
}

impl Relay for LoopContext<'_> {
    fn send_to_user(&mut self, user: &str, bytes: impl Into<Bytes>) {
        let Some(client) = self.registry.by_name(user) else {
            debug!("send to {} dropped: not connected", user);
            return;
        };

        let bytes = bytes.into();
        if client.send(bytes.clone()) {
            debug!("[audit] {}: {} <- {:?}", client.room, client.user, bytes);
        } else {
            debug!("write to {} failed: writer gone", client.user);
        }
    }

    fn send_to_room(&mut self, room: &str, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        for client in self.registry.by_room(room) {
            if !client.send(bytes.clone()) {
                debug!("write to {} failed: writer gone", client.user);
            }
        }
        debug!("[audit] {}: * <- {:?}", room, bytes);
    }

    fn disconnect_user(&mut self, user: &str) {
        match self.registry.by_name(user).map(|client| client.id) {
            Some(id) => {
                self.disconnect(id);
            }
            None => debug!("disconnect of {} ignored: not connected", user),
        }
    }

    fn disconnect_room(&mut self, room: &str) {
        for user in self.registry.room_user_names(room) {
            self.disconnect_user(&user);
        }
    }
}

/// Cloneable handle for issuing commands from any task
///
/// Must be used from within the tokio runtime the server runs on.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    events: mpsc::Sender<Event>,
    tracker: TaskTracker,
}

impl ServerHandle {
    pub(crate) fn new(events: mpsc::Sender<Event>, tracker: TaskTracker) -> Self {
        Self { events, tracker }
    }

    /// Hand an event to a helper task and return immediately
    fn submit(&self, event: Event) {
        let events = self.events.clone();
        self.tracker.spawn(async move {
            if events.send(event).await.is_err() {
                debug!("event loop closed, command dropped");
            }
        });
    }

    pub fn send_to(&self, user: &str, bytes: impl Into<Bytes>) {
        self.submit(Event::SendToUser {
            user: user.to_string(),
            bytes: bytes.into(),
        });
    }

    pub fn send_to_room(&self, room: &str, bytes: impl Into<Bytes>) {
        self.submit(Event::SendToRoom {
            room: room.to_string(),
            bytes: bytes.into(),
        });
    }

    pub fn disconnect_user(&self, user: &str) {
        self.submit(Event::DisconnectUser {
            user: user.to_string(),
        });
    }

    /// The room's user names are snapshotted when the loop processes this
    pub fn disconnect_room(&self, room: &str) {
        self.submit(Event::DisconnectRoom {
            room: room.to_string(),
        });
    }

    /// Ask the loop for uptime and client count
    ///
    /// Awaits the loop, so it must not be awaited from a hook's own task.
    pub async fn stats(&self) -> Result<Stats, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(Event::Stats { reply })
            .await
            .map_err(|_| ServerError::LoopClosed)?;
        rx.await.map_err(|_| ServerError::LoopClosed)
    }

    pub(crate) async fn request_shutdown(&self) -> Result<(), ServerError> {
        self.events
            .send(Event::ShutdownRequested)
            .await
            .map_err(|_| ServerError::LoopClosed)
    }

    pub(crate) fn try_request_shutdown(&self) -> bool {
        self.try_submit(Event::ShutdownRequested)
    }

    /// Enqueue without a helper task; false if the queue is full or closed
    pub(crate) fn try_submit(&self, event: Event) -> bool {
        self.events.try_send(event).is_ok()
    }
}

impl Relay for ServerHandle {
    fn send_to_user(&mut self, user: &str, bytes: impl Into<Bytes>) {
        self.send_to(user, bytes);
    }

    fn send_to_room(&mut self, room: &str, bytes: impl Into<Bytes>) {
        ServerHandle::send_to_room(self, room, bytes);
    }

    fn disconnect_user(&mut self, user: &str) {
        ServerHandle::disconnect_user(self, user);
    }

    fn disconnect_room(&mut self, room: &str) {
        ServerHandle::disconnect_room(self, room);
    }
}
