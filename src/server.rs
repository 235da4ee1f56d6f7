//! Event loop
//!
//! The single task that owns the client registry. Connection tasks, the
//! command relay and the shutdown coordinator all talk to it through one
//! bounded `mpsc` queue, so every room and roster change, every hook call
//! and every outbound write is serialized here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::hooks::Hooks;
use crate::registry::Registry;
use crate::relay::{LoopContext, Relay, ServerHandle};
use crate::types::ClientId;

/// Events consumed by the event loop
#[derive(Debug)]
pub enum Event {
    /// Authenticated connection asking to be admitted
    ///
    /// `ack` answers whether the client was registered.
    ClientJoined {
        client: Client,
        ack: oneshot::Sender<bool>,
    },
    /// One message read from a client
    MessageReceived {
        id: ClientId,
        user: String,
        room: String,
        text: String,
    },
    /// Reading from a client failed or the peer closed
    ClientReadFailed { id: ClientId, user: String },
    /// Write bytes to one user
    SendToUser { user: String, bytes: Bytes },
    /// Write bytes to every user in a room
    SendToRoom { room: String, bytes: Bytes },
    /// Close one user's connection
    DisconnectUser { user: String },
    /// Close every connection in a room
    DisconnectRoom { room: String },
    /// Report uptime and client count
    Stats { reply: oneshot::Sender<Stats> },
    /// Disconnect everyone and exit
    ShutdownRequested,
}

/// Point-in-time server statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub uptime: Duration,
    pub clients: usize,
}

/// The event loop actor
pub struct EventLoop {
    registry: Registry,
    hooks: Arc<dyn Hooks>,
    /// Handed to hooks for queued commands
    handle: ServerHandle,
    receiver: mpsc::Receiver<Event>,
    /// Server-wide shutdown flag
    shutdown: CancellationToken,
    started_at: Instant,
}

impl EventLoop {
    pub fn new(
        receiver: mpsc::Receiver<Event>,
        handle: ServerHandle,
        hooks: Arc<dyn Hooks>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry: Registry::new(),
            hooks,
            handle,
            receiver,
            shutdown,
            started_at: Instant::now(),
        }
    }

    /// Run until `ShutdownRequested` is processed
    ///
    /// The loop holds a sender to its own queue, so the queue never closes.
    /// Once the shutdown token fires the loop also exits as soon as the
    /// queue is empty, even if `ShutdownRequested` never made it in.
    pub async fn run(mut self) {
        info!("event loop started");

        loop {
            let event = tokio::select! {
                biased;
                event = self.receiver.recv() => event,
                _ = self.shutdown.cancelled() => None,
            };

            let Some(event) = event else {
                break;
            };
            if !self.handle_event(event) {
                info!("event loop shutting down");
                return;
            }
        }

        info!("event loop shutting down, queue drained");
        self.disconnect_all();
    }

    /// Process a single event. Returns false once the loop should exit.
    fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::ClientJoined { client, ack } => self.handle_join(client, ack),
            Event::MessageReceived {
                id,
                user,
                room,
                text,
            } => self.handle_message(id, &user, &room, &text),
            Event::ClientReadFailed { id, user } => self.handle_read_failed(id, &user),
            Event::SendToUser { user, bytes } => self.context().send_to_user(&user, bytes),
            Event::SendToRoom { room, bytes } => self.context().send_to_room(&room, bytes),
            Event::DisconnectUser { user } => self.context().disconnect_user(&user),
            Event::DisconnectRoom { room } => self.context().disconnect_room(&room),
            Event::Stats { reply } => {
                let _ = reply.send(Stats {
                    uptime: self.started_at.elapsed(),
                    clients: self.registry.count(),
                });
            }
            Event::ShutdownRequested => {
                info!("disconnecting all clients");
                self.disconnect_all();
                return false;
            }
        }
        true
    }

    fn context(&mut self) -> LoopContext<'_> {
        LoopContext::new(&mut self.registry, self.hooks.as_ref(), &self.handle)
    }

    fn handle_join(&mut self, client: Client, ack: oneshot::Sender<bool>) {
        let id = client.id;
        let user = client.user.clone();
        let room = client.room.clone();

        if let Err(client) = self.registry.add(client) {
            warn!("{} refused: name already connected", client.user);
            let _ = ack.send(false);
            return;
        }

        if ack.send(true).is_err() {
            // Connection task went away before hearing back
            self.registry.remove(id);
            return;
        }

        info!("[audit] {}: {} joins", room, user);
        debug!("Total clients: {}", self.registry.count());

        let hooks = Arc::clone(&self.hooks);
        hooks.on_connect(&mut self.context(), &user, &room);
    }

    fn handle_message(&mut self, id: ClientId, user: &str, room: &str, text: &str) {
        if self.registry.get(id).is_none() {
            debug!("message from {} dropped: no longer connected", user);
            return;
        }

        info!("[audit] {}: {} -> {}", room, user, text);
        let hooks = Arc::clone(&self.hooks);
        hooks.on_message(&mut self.context(), user, room, text);
    }

    fn handle_read_failed(&mut self, id: ClientId, user: &str) {
        // The name may already belong to someone else, or to no one
        if self.registry.by_name(user).map(|client| client.id) != Some(id) {
            debug!("read failure for {} ignored: already removed", user);
            return;
        }
        self.context().disconnect(id);
    }

    fn disconnect_all(&mut self) {
        let ids = self.registry.ids();
        let mut ctx = self.context();
        for id in ids {
            ctx.disconnect(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::task::TaskTracker;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Hooks for Recorder {
        fn on_connect(&self, _ctx: &mut LoopContext<'_>, user: &str, room: &str) {
            self.seen.lock().unwrap().push(format!("connect {} {}", user, room));
        }

        fn on_disconnect(&self, _ctx: &mut LoopContext<'_>, user: &str, room: &str) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("disconnect {} {}", user, room));
        }

        fn on_message(&self, ctx: &mut LoopContext<'_>, user: &str, room: &str, message: &str) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("message {} {} {}", user, room, message));
            if message == "kick room" {
                ctx.disconnect_room(room);
            }
        }
    }

    fn event_loop(hooks: Arc<Recorder>) -> EventLoop {
        let (tx, rx) = mpsc::channel(16);
        let handle = ServerHandle::new(tx, TaskTracker::new());
        EventLoop::new(rx, handle, hooks, CancellationToken::new())
    }

    fn join(
        event_loop: &mut EventLoop,
        user: &str,
        room: &str,
    ) -> (ClientId, mpsc::UnboundedReceiver<Bytes>, CancellationToken, bool) {
        let (tx, outbox) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let id = ClientId::new();
        let client = Client::new(id, user.to_string(), room.to_string(), tx, token.clone());
        let (ack, mut ack_rx) = oneshot::channel();

        assert!(event_loop.handle_event(Event::ClientJoined { client, ack }));
        let admitted = ack_rx.try_recv().unwrap();
        (id, outbox, token, admitted)
    }

    fn message(id: ClientId, user: &str, room: &str, text: &str) -> Event {
        Event::MessageReceived {
            id,
            user: user.to_string(),
            room: room.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_join_message_and_read_failure() {
        let hooks = Arc::new(Recorder::default());
        let mut event_loop = event_loop(hooks.clone());

        let (id, _outbox, token, admitted) = join(&mut event_loop, "alice", "room1");
        assert!(admitted);

        event_loop.handle_event(message(id, "alice", "room1", "hello"));
        event_loop.handle_event(Event::ClientReadFailed {
            id,
            user: "alice".to_string(),
        });

        assert!(token.is_cancelled());
        assert_eq!(event_loop.registry.count(), 0);
        assert_eq!(
            hooks.seen(),
            vec![
                "connect alice room1",
                "message alice room1 hello",
                "disconnect alice room1"
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_user_refused() {
        let hooks = Arc::new(Recorder::default());
        let mut event_loop = event_loop(hooks.clone());

        let (_, _o1, _, first) = join(&mut event_loop, "alice", "room1");
        let (_, _o2, _, second) = join(&mut event_loop, "alice", "room2");

        assert!(first);
        assert!(!second);
        assert_eq!(event_loop.registry.count(), 1);
        assert_eq!(hooks.seen(), vec!["connect alice room1"]);
    }

    #[tokio::test]
    async fn test_late_read_failure_ignored() {
        let hooks = Arc::new(Recorder::default());
        let mut event_loop = event_loop(hooks.clone());

        let (old_id, _o1, _, _) = join(&mut event_loop, "alice", "room1");
        event_loop.handle_event(Event::DisconnectUser {
            user: "alice".to_string(),
        });
        let (_, _o2, new_token, _) = join(&mut event_loop, "alice", "room1");

        // Stale failure from the first connection, plus a message it had queued
        event_loop.handle_event(Event::ClientReadFailed {
            id: old_id,
            user: "alice".to_string(),
        });
        event_loop.handle_event(message(old_id, "alice", "room1", "late"));

        assert!(!new_token.is_cancelled());
        assert_eq!(event_loop.registry.count(), 1);
        assert_eq!(
            hooks.seen(),
            vec![
                "connect alice room1",
                "disconnect alice room1",
                "connect alice room1"
            ]
        );
    }

    #[tokio::test]
    async fn test_commands_against_absent_targets() {
        let hooks = Arc::new(Recorder::default());
        let mut event_loop = event_loop(hooks.clone());
        let (_, mut outbox, _, _) = join(&mut event_loop, "alice", "room1");

        event_loop.handle_event(Event::SendToUser {
            user: "ghost".to_string(),
            bytes: Bytes::from_static(b"x"),
        });
        event_loop.handle_event(Event::SendToRoom {
            room: "empty".to_string(),
            bytes: Bytes::from_static(b"x"),
        });
        event_loop.handle_event(Event::DisconnectUser {
            user: "ghost".to_string(),
        });
        event_loop.handle_event(Event::DisconnectRoom {
            room: "empty".to_string(),
        });

        assert_eq!(event_loop.registry.count(), 1);
        assert!(outbox.try_recv().is_err());
        assert_eq!(hooks.seen(), vec!["connect alice room1"]);
    }

    #[tokio::test]
    async fn test_send_to_room_only_reaches_room() {
        let hooks = Arc::new(Recorder::default());
        let mut event_loop = event_loop(hooks);
        let (_, mut alice, _, _) = join(&mut event_loop, "alice", "room1");
        let (_, mut bob, _, _) = join(&mut event_loop, "bob", "room1");
        let (_, mut carol, _, _) = join(&mut event_loop, "carol", "room2");

        event_loop.handle_event(Event::SendToRoom {
            room: "room1".to_string(),
            bytes: Bytes::from_static(b"x"),
        });

        assert_eq!(alice.try_recv().unwrap(), Bytes::from_static(b"x"));
        assert_eq!(bob.try_recv().unwrap(), Bytes::from_static(b"x"));
        assert!(carol.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_room_from_hook_during_joins() {
        let hooks = Arc::new(Recorder::default());
        let mut event_loop = event_loop(hooks.clone());

        let (alice, _o1, _, _) = join(&mut event_loop, "alice", "room1");
        let _bob = join(&mut event_loop, "bob", "room1");
        event_loop.handle_event(message(alice, "alice", "room1", "kick room"));
        let _carol = join(&mut event_loop, "carol", "room1");

        // Only the join processed after the kick survives
        assert_eq!(event_loop.registry.room_count("room1"), 1);
        assert_eq!(event_loop.registry.room_user_names("room1"), vec!["carol"]);
        assert_eq!(
            hooks
                .seen()
                .iter()
                .filter(|s| s.starts_with("disconnect"))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_stats() {
        let hooks = Arc::new(Recorder::default());
        let mut event_loop = event_loop(hooks);
        let _alice = join(&mut event_loop, "alice", "room1");

        let (reply, mut rx) = oneshot::channel();
        event_loop.handle_event(Event::Stats { reply });

        assert_eq!(rx.try_recv().unwrap().clients, 1);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_everyone_once() {
        let hooks = Arc::new(Recorder::default());
        let mut event_loop = event_loop(hooks.clone());
        let (_, _o1, t1, _) = join(&mut event_loop, "alice", "room1");
        let (_, _o2, t2, _) = join(&mut event_loop, "bob", "room2");

        assert!(!event_loop.handle_event(Event::ShutdownRequested));

        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
        assert_eq!(event_loop.registry.count(), 0);
        let mut disconnects: Vec<String> = hooks
            .seen()
            .into_iter()
            .filter(|s| s.starts_with("disconnect"))
            .collect();
        disconnects.sort();
        assert_eq!(disconnects, vec!["disconnect alice room1", "disconnect bob room2"]);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown_with_full_queue() {
        let hooks = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let handle = ServerHandle::new(tx.clone(), TaskTracker::new());
        let mut event_loop = EventLoop::new(rx, handle, hooks.clone(), shutdown.clone());
        let (_, mut outbox, token, _) = join(&mut event_loop, "alice", "room1");

        tx.try_send(Event::SendToUser {
            user: "alice".to_string(),
            bytes: Bytes::from_static(b"last"),
        })
        .unwrap();
        // No room left for the shutdown request
        assert!(tx.try_send(Event::ShutdownRequested).is_err());
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), event_loop.run())
            .await
            .expect("event loop kept running after shutdown");

        // Queued work is still applied before everyone is closed
        assert_eq!(outbox.recv().await.unwrap(), Bytes::from_static(b"last"));
        assert!(outbox.recv().await.is_none());
        assert!(token.is_cancelled());
        assert_eq!(
            hooks.seen(),
            vec!["connect alice room1", "disconnect alice room1"]
        );
    }

    #[tokio::test]
    async fn test_idle_run_exits_on_shutdown() {
        let hooks = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let handle = ServerHandle::new(tx, TaskTracker::new());
        let event_loop = EventLoop::new(rx, handle, hooks, shutdown.clone());

        let running = tokio::spawn(event_loop.run());
        tokio::task::yield_now().await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .expect("event loop kept running after shutdown")
            .unwrap();
    }
}
