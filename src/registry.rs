//! Client registry
//!
//! In-memory index of admitted clients. Three views over the same set:
//! every client by id, the id registered under each user name, and the
//! ids in each room in join order. The registry lives inside the event
//! loop and is never shared, so the views need no synchronization; every
//! mutation updates all three before returning.

use std::collections::HashMap;

use crate::client::Client;
use crate::types::ClientId;

#[derive(Debug, Default)]
pub struct Registry {
    /// All admitted clients: ClientId -> Client
    clients: HashMap<ClientId, Client>,
    /// User name -> ClientId (unique key)
    by_name: HashMap<String, ClientId>,
    /// Room name -> ClientIds in insertion order
    by_room: HashMap<String, Vec<ClientId>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a client into all three views
    ///
    /// Hands the client back if its name (or id) is already registered.
    pub fn add(&mut self, client: Client) -> Result<(), Client> {
        if self.by_name.contains_key(&client.user) || self.clients.contains_key(&client.id) {
            return Err(client);
        }

        self.by_name.insert(client.user.clone(), client.id);
        self.by_room
            .entry(client.room.clone())
            .or_default()
            .push(client.id);
        self.clients.insert(client.id, client);
        Ok(())
    }

    /// Remove the client with this id from every view
    ///
    /// Returns `None` (and changes nothing) if it is not registered.
    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        let client = self.clients.remove(&id)?;

        if let Some(bucket) = self.by_room.get_mut(&client.room) {
            if let Some(pos) = bucket.iter().position(|member| *member == id) {
                bucket.remove(pos);
            }
            if bucket.is_empty() {
                self.by_room.remove(&client.room);
            }
        }

        if self.by_name.get(&client.user) == Some(&id) {
            self.by_name.remove(&client.user);
        }

        Some(client)
    }

    /// Remove every client currently in `room`, in join order
    pub fn remove_room(&mut self, room: &str) -> Vec<Client> {
        let ids = self.by_room.get(room).cloned().unwrap_or_default();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn by_name(&self, user: &str) -> Option<&Client> {
        self.by_name.get(user).and_then(|id| self.clients.get(id))
    }

    /// Clients in `room`, in join order. Empty for an unknown room.
    pub fn by_room(&self, room: &str) -> Vec<&Client> {
        self.by_room
            .get(room)
            .map(|ids| ids.iter().filter_map(|id| self.clients.get(id)).collect())
            .unwrap_or_default()
    }

    /// Snapshot of the user names in `room`
    pub fn room_user_names(&self, room: &str) -> Vec<String> {
        self.by_room(room)
            .into_iter()
            .map(|client| client.user.clone())
            .collect()
    }

    pub fn room_count(&self, room: &str) -> usize {
        self.by_room.get(room).map_or(0, Vec::len)
    }

    pub fn all(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    /// Snapshot of every registered id
    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn client(user: &str, room: &str) -> Client {
        let (tx, _rx) = mpsc::unbounded_channel();
        Client::new(
            ClientId::new(),
            user.to_string(),
            room.to_string(),
            tx,
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_add_and_remove() {
        let mut registry = Registry::new();
        let c = client("foo", "1");
        let id = c.id;

        registry.add(c).unwrap();
        assert_eq!(registry.count(), 1);

        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.user, "foo");
        assert_eq!(registry.count(), 0);
        assert!(registry.by_name("foo").is_none());
        assert_eq!(registry.room_count("1"), 0);
    }

    #[test]
    fn test_all() {
        let mut registry = Registry::new();
        let c1 = client("foo", "1");
        let id1 = c1.id;
        registry.add(c1).unwrap();
        registry.add(client("bar", "2")).unwrap();

        assert_eq!(registry.all().count(), 2);

        registry.remove(id1);
        let users: Vec<&str> = registry.all().map(|c| c.user.as_str()).collect();
        assert_eq!(users, vec!["bar"]);
    }

    #[test]
    fn test_by_name() {
        let mut registry = Registry::new();
        let c1 = client("foo", "1");
        let id1 = c1.id;
        registry.add(c1).unwrap();
        registry.add(client("bar", "1")).unwrap();

        assert_eq!(registry.by_name("foo").map(|c| c.id), Some(id1));

        registry.remove(id1);
        assert!(registry.by_name("foo").is_none());
        assert!(registry.by_name("bar").is_some());
    }

    #[test]
    fn test_by_room_keeps_join_order() {
        let mut registry = Registry::new();
        let c1 = client("foo", "1");
        let id1 = c1.id;
        registry.add(c1).unwrap();
        registry.add(client("bar", "1")).unwrap();
        registry.add(client("baz", "1")).unwrap();
        registry.add(client("qux", "2")).unwrap();

        assert_eq!(registry.room_user_names("1"), vec!["foo", "bar", "baz"]);

        registry.remove(id1);
        assert_eq!(registry.room_user_names("1"), vec!["bar", "baz"]);
        assert_eq!(registry.room_count("1"), 2);
        assert_eq!(registry.room_count("2"), 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = Registry::new();
        registry.add(client("foo", "1")).unwrap();

        let rejected = registry.add(client("foo", "2")).unwrap_err();
        assert_eq!(rejected.room, "2");
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.room_count("2"), 0);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut registry = Registry::new();
        registry.add(client("foo", "1")).unwrap();

        assert!(registry.remove(ClientId::new()).is_none());
        assert!(registry.remove_room("nope").is_empty());
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.room_count("1"), 1);
    }

    #[test]
    fn test_remove_twice() {
        let mut registry = Registry::new();
        let c = client("foo", "1");
        let id = c.id;
        registry.add(c).unwrap();

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reused_name_not_cleared_by_stale_remove() {
        let mut registry = Registry::new();
        let old = client("foo", "1");
        let old_id = old.id;
        registry.add(old).unwrap();
        registry.remove(old_id);

        let new = client("foo", "1");
        let new_id = new.id;
        registry.add(new).unwrap();

        assert!(registry.remove(old_id).is_none());
        assert_eq!(registry.by_name("foo").map(|c| c.id), Some(new_id));
    }

    #[test]
    fn test_remove_room() {
        let mut registry = Registry::new();
        registry.add(client("foo", "1")).unwrap();
        registry.add(client("bar", "1")).unwrap();
        registry.add(client("baz", "2")).unwrap();

        let removed: Vec<String> = registry
            .remove_room("1")
            .into_iter()
            .map(|c| c.user)
            .collect();

        assert_eq!(removed, vec!["foo", "bar"]);
        assert_eq!(registry.count(), 1);
        assert!(registry.by_room("1").is_empty());
        assert!(registry.by_name("foo").is_none());
        assert!(registry.by_name("baz").is_some());
    }

    #[test]
    fn test_count_tracks_adds_minus_removes() {
        let mut registry = Registry::new();
        let mut ids = Vec::new();
        for i in 0..10 {
            let c = client(&format!("user{}", i), &format!("room{}", i % 3));
            ids.push(c.id);
            registry.add(c).unwrap();
        }

        let mut removed = 0;
        for id in ids.iter().step_by(2) {
            if registry.remove(*id).is_some() {
                removed += 1;
            }
        }
        // Removing again matches nothing
        for id in ids.iter().step_by(2) {
            assert!(registry.remove(*id).is_none());
        }

        assert_eq!(registry.count(), 10 - removed);
        let per_room: usize = (0..3).map(|r| registry.room_count(&format!("room{}", r))).sum();
        assert_eq!(per_room, registry.count());
        for (i, id) in ids.iter().enumerate() {
            let present = registry.get(*id).is_some();
            assert_eq!(present, i % 2 == 1);
            assert_eq!(registry.by_name(&format!("user{}", i)).is_some(), present);
        }
    }
}
